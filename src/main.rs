use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::mpsc;

use poster_overlay::config::{load_pipeline_config, PipelineConfig};
use poster_overlay::description_fetcher::DescriptionExtractor;
use poster_overlay::description_transport::{ChannelTransport, DescriptionTransport, UreqTransport};
use poster_overlay::dom::{Document, NodeId, Selector};
use poster_overlay::page_runtime::{run_page, PageChannels, PageInspector};
use poster_overlay::pipeline::Pipeline;
use poster_overlay::poster_renderer::OVERLAY_CLASS;
use poster_overlay::protocol::{FetchError, PageEvent};
use poster_overlay::settings::{
    save_settings, MemorySettingsBackend, SearchMode, Settings, SettingsBackend, SettingsDelta,
    SettingsStore, StoredValues,
};
use poster_overlay::settings_persistence::TomlSettingsBackend;

#[derive(Debug, Parser)]
#[command(name = "poster-overlay", version, about = "Augments movie-catalog pages with poster overlays")]
struct Cli {
    /// Pipeline tuning file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Settings store; defaults to the platform config directory.
    #[arg(long, global = true)]
    settings_file: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render overlays into a page and print the resulting HTML.
    Augment {
        /// File path or http(s) URL.
        page: String,
        /// Location used to resolve relative links on a local file.
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Fetch and print the synopsis of one film page.
    Describe { url: String },
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Run the live page loop, driven by commands on stdin.
    Simulate {
        page: String,
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        show_action: Option<bool>,
        /// search, category, imdb, wikipedia or web.
        #[arg(long)]
        mode: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        opacity: Option<u8>,
    },
}

/// Used where no hover can happen; every request is refused.
struct OfflineTransport;

impl DescriptionTransport for OfflineTransport {
    fn submit(&self, _url: &str) -> Result<(), FetchError> {
        Err(FetchError::Abandoned)
    }
}

fn settings_backend(path: Option<&Path>) -> Box<dyn SettingsBackend> {
    match path {
        Some(path) => Box::new(TomlSettingsBackend::new(path)),
        None => match TomlSettingsBackend::at_default_location() {
            Some(backend) => Box::new(backend),
            None => {
                warn!("No config directory available. Settings will not persist");
                Box::new(MemorySettingsBackend::default())
            }
        },
    }
}

fn is_remote(page: &str) -> bool {
    page.starts_with("http://") || page.starts_with("https://")
}

fn load_page(page: &str, base_url: Option<&str>, config: &PipelineConfig) -> anyhow::Result<Document> {
    if is_remote(page) {
        let response = UreqTransport::new(&config.description)
            .fetch_page(page)
            .with_context(|| format!("failed to fetch {page}"))?;
        return Ok(Document::parse_html(&response.body, page));
    }
    let source =
        std::fs::read_to_string(page).with_context(|| format!("failed to read {page}"))?;
    let location = base_url.unwrap_or(&config.discovery.site_base_url);
    Ok(Document::parse_html(&source, location))
}

fn augment(page: &str, base_url: Option<&str>, config: PipelineConfig, store: SettingsStore) -> anyhow::Result<()> {
    let document = load_page(page, base_url, &config)?;
    let mut pipeline = Pipeline::new(document, config, store, Box::new(OfflineTransport))?;
    pipeline.start(std::time::Duration::ZERO);
    println!("{}", pipeline.document().to_html());
    pipeline.teardown();
    Ok(())
}

fn describe(url: &str, config: &PipelineConfig) -> anyhow::Result<()> {
    let response = UreqTransport::new(&config.description)
        .fetch_page(url)
        .with_context(|| format!("failed to fetch {url}"))?;
    let text = DescriptionExtractor::new(&config.description)
        .extract(&response.body)
        .unwrap_or_else(|| config.description.placeholder_text.clone());
    println!("{text}");
    Ok(())
}

fn settings_command(action: SettingsCommand, backend: &mut dyn SettingsBackend) -> anyhow::Result<()> {
    let store = SettingsStore::load(Some(&*backend));
    let mut settings = store.current().clone();
    if let SettingsCommand::Set {
        show_action,
        mode,
        opacity,
    } = action
    {
        if let Some(show_action) = show_action {
            settings.show_action = show_action;
        }
        if let Some(mode) = mode {
            settings.mode = SearchMode::from_storage(&mode);
        }
        if let Some(opacity) = opacity {
            settings.opacity = opacity;
        }
        save_settings(backend, &settings).context("failed to save settings")?;
    }
    for (key, value) in settings.to_stored() {
        println!("{key} = {value}");
    }
    Ok(())
}

fn parse_stored_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Translates stdin lines into page traffic until `quit` or end of input.
fn read_commands(
    posters: Vec<NodeId>,
    events: mpsc::UnboundedSender<PageEvent>,
    inspections: mpsc::UnboundedSender<PageInspector>,
    mut backend: Box<dyn SettingsBackend>,
) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let argument = words.next();
        let poster = argument
            .and_then(|index| index.parse::<usize>().ok())
            .and_then(|index| posters.get(index).copied());
        let event = match (command, poster, argument) {
            ("", _, _) => continue,
            ("enter", Some(poster), _) => PageEvent::PointerEnter(poster),
            ("leave", Some(poster), _) => PageEvent::PointerLeave(poster),
            ("nav", _, Some(url)) => PageEvent::Navigate(url.to_string()),
            ("dump", _, _) => {
                let inspector: PageInspector =
                    Box::new(|pipeline: &Pipeline| println!("{}", pipeline.document().to_html()));
                if inspections.send(inspector).is_err() {
                    break;
                }
                continue;
            }
            ("set", _, Some(key)) => {
                let raw = words.collect::<Vec<_>>().join(" ");
                let mut values = StoredValues::new();
                values.insert(key.to_string(), parse_stored_value(&raw));
                if let Err(err) = backend.set(values) {
                    warn!("Failed to write setting {}: {}", key, err);
                }
                continue;
            }
            ("quit", _, _) => break,
            _ => {
                warn!("Unrecognized command: {}", line.trim());
                continue;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(PageEvent::Shutdown);
}

fn simulate(
    page: &str,
    base_url: Option<&str>,
    config: PipelineConfig,
    backend: Box<dyn SettingsBackend>,
) -> anyhow::Result<()> {
    let document = load_page(page, base_url, &config)?;
    let poster_selector = Selector::parse_group(&config.discovery.poster_selectors)?;
    let posters = document.query_selector_all(document.root(), &poster_selector);
    info!("Page has {} poster element(s); address them as 0..{}", posters.len(), posters.len());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build page runtime")?;
    let (event_sender, events) = mpsc::unbounded_channel();
    let (inspection_sender, inspections) = mpsc::unbounded_channel();
    let settings_changes = backend.subscribe();
    let mut store = SettingsStore::load(Some(&*backend));
    let overlay_selector = Selector::parse(&format!(".{OVERLAY_CLASS}"))?;
    store.subscribe(Box::new(move |document: &Document, _: &Settings, delta: &SettingsDelta| {
        let overlays = document
            .query_selector_all(document.root(), &overlay_selector)
            .len();
        println!(
            "applied {} ({} overlay(s) on page)",
            delta.fields().join(", "),
            overlays
        );
    }));
    let transport = ChannelTransport::new(
        UreqTransport::new(&config.description),
        event_sender.clone(),
        runtime.handle().clone(),
    );
    let pipeline = Pipeline::new(document, config, store, Box::new(transport))?;

    let reader = std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || read_commands(posters, event_sender, inspection_sender, backend))
        .context("failed to start command reader")?;
    runtime.block_on(run_page(
        pipeline,
        PageChannels {
            events,
            inspections,
            settings_changes,
        },
    ));
    if reader.is_finished() {
        let _ = reader.join();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    let config = match &cli.config {
        Some(path) => load_pipeline_config(path),
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Augment { page, base_url } => {
            let backend = settings_backend(cli.settings_file.as_deref());
            let store = SettingsStore::load(Some(&*backend));
            augment(&page, base_url.as_deref(), config, store)
        }
        Command::Describe { url } => {
            if !is_remote(&url) {
                bail!("describe needs an http(s) URL, got {url}");
            }
            describe(&url, &config)
        }
        Command::Settings { action } => {
            let mut backend = settings_backend(cli.settings_file.as_deref());
            settings_command(action, backend.as_mut())
        }
        Command::Simulate { page, base_url } => simulate(
            &page,
            base_url.as_deref(),
            config,
            settings_backend(cli.settings_file.as_deref()),
        ),
    }
}
