//! Pipeline tuning model and defaults.
//!
//! These values are not user settings (see `settings`); they fix selector sets,
//! timing, and extraction limits. Every field has a default so a partial
//! `pipeline.toml` is enough.

use std::path::Path;
use std::time::Duration;

use log::warn;

/// Root of `pipeline.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub hover: HoverConfig,
    #[serde(default)]
    pub description: DescriptionConfig,
}

/// Poster detection and change observation.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_poster_selectors")]
    pub poster_selectors: Vec<String>,
    /// Posters inside these containers are never decorated.
    #[serde(default = "default_excluded_ancestors")]
    pub excluded_ancestors: Vec<String>,
    /// Attribute changes that re-queue a poster for processing.
    #[serde(default = "default_observed_attributes")]
    pub observed_attributes: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_navigation_poll_ms")]
    pub navigation_poll_ms: u64,
    /// Used to resolve relative poster links when the page location is unusable.
    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,
}

/// Dwell and exit timing for description tooltips.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HoverConfig {
    #[serde(default = "default_hover_delay_ms")]
    pub hover_delay_ms: u64,
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

/// Remote synopsis extraction limits.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DescriptionConfig {
    /// Tried in order; the first match with enough text wins.
    #[serde(default = "default_description_selectors")]
    pub selectors: Vec<String>,
    #[serde(default = "default_min_description_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_description_chars")]
    pub max_chars: usize,
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            hover: HoverConfig::default(),
            description: DescriptionConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poster_selectors: default_poster_selectors(),
            excluded_ancestors: default_excluded_ancestors(),
            observed_attributes: default_observed_attributes(),
            debounce_ms: default_debounce_ms(),
            navigation_poll_ms: default_navigation_poll_ms(),
            site_base_url: default_site_base_url(),
        }
    }
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            hover_delay_ms: default_hover_delay_ms(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            selectors: default_description_selectors(),
            min_chars: default_min_description_chars(),
            max_chars: default_max_description_chars(),
            placeholder_text: default_placeholder_text(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl DiscoveryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn navigation_poll(&self) -> Duration {
        Duration::from_millis(self.navigation_poll_ms.max(1))
    }
}

impl HoverConfig {
    pub fn hover_delay(&self) -> Duration {
        Duration::from_millis(self.hover_delay_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

fn default_poster_selectors() -> Vec<String> {
    vec![
        ".poster-container".to_string(),
        ".react-component.poster.film-poster".to_string(),
    ]
}

fn default_excluded_ancestors() -> Vec<String> {
    vec![
        "section.list.-overlapped".to_string(),
        "section.list.-stacked".to_string(),
    ]
}

fn default_observed_attributes() -> Vec<String> {
    [
        "data-film-name",
        "data-film-slug",
        "data-film-release-year",
        "data-target-link",
        "class",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_debounce_ms() -> u64 {
    150
}

fn default_navigation_poll_ms() -> u64 {
    1_000
}

fn default_site_base_url() -> String {
    "https://letterboxd.com".to_string()
}

fn default_hover_delay_ms() -> u64 {
    1_000
}

fn default_exit_grace_ms() -> u64 {
    300
}

fn default_description_selectors() -> Vec<String> {
    [
        ".review.body-text .truncate p",
        "section.production-synopsis .truncate p",
        ".film-synopsis p",
        "div.truncate p",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_min_description_chars() -> usize {
    40
}

fn default_max_description_chars() -> usize {
    300
}

fn default_placeholder_text() -> String {
    "No description available.".to_string()
}

fn default_request_timeout_secs() -> u64 {
    7
}

fn default_user_agent() -> String {
    concat!("poster-overlay/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Loads `pipeline.toml`, falling back to defaults when it is missing or
/// malformed.
pub fn load_pipeline_config(path: &Path) -> PipelineConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read pipeline config {}. Using defaults. error={}",
                path.display(),
                err
            );
            return PipelineConfig::default();
        }
    };
    match toml::from_str::<PipelineConfig>(&content) {
        Ok(config) => sanitize_pipeline_config(config),
        Err(err) => {
            warn!(
                "Failed to parse pipeline config {}. Using defaults. error={}",
                path.display(),
                err
            );
            PipelineConfig::default()
        }
    }
}

/// Restores defaults for values that would disable the pipeline outright.
pub fn sanitize_pipeline_config(mut config: PipelineConfig) -> PipelineConfig {
    if config.discovery.poster_selectors.is_empty() {
        config.discovery.poster_selectors = default_poster_selectors();
    }
    if config.description.max_chars == 0 {
        config.description.max_chars = default_max_description_chars();
    }
    if config.description.placeholder_text.trim().is_empty() {
        config.description.placeholder_text = default_placeholder_text();
    }
    config
}
