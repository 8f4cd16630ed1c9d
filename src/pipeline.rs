//! The page-lifetime augmentation pipeline.
//!
//! `Pipeline` is synchronous; every entry point takes the current page time.
//! The caller feeds it `PageEvent`s and calls `advance_to` whenever
//! `next_deadline` passes.

use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::description_fetcher::DescriptionFetcher;
use crate::description_transport::DescriptionTransport;
use crate::dom::{Document, NodeId, SelectorError};
use crate::hover_tooltip::{HoverController, HoverTimer};
use crate::navigation::{NavigationSignal, UrlPoller};
use crate::poster_discovery::{DiscoveryFlush, PosterDiscovery};
use crate::poster_record::RecordExtractor;
use crate::poster_renderer::{PosterRenderer, RenderOutcome};
use crate::protocol::{FetchError, PageEvent, PageResponse, StorageChangeSet};
use crate::settings::{Settings, SettingsStore};
use crate::timers::TimerQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineTimer {
    DiscoveryFlush,
    Hover(HoverTimer),
    NavigationPoll,
}

impl From<DiscoveryFlush> for PipelineTimer {
    fn from(_: DiscoveryFlush) -> Self {
        Self::DiscoveryFlush
    }
}

impl From<HoverTimer> for PipelineTimer {
    fn from(timer: HoverTimer) -> Self {
        Self::Hover(timer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid selector in pipeline configuration: {0}")]
    Selector(#[from] SelectorError),
}

pub struct Pipeline {
    document: Document,
    config: PipelineConfig,
    settings: SettingsStore,
    discovery: PosterDiscovery,
    renderer: PosterRenderer,
    hover: HoverController,
    fetcher: DescriptionFetcher,
    navigation: Box<dyn NavigationSignal>,
    timers: TimerQueue<PipelineTimer>,
    started: bool,
}

impl Pipeline {
    pub fn new(
        document: Document,
        config: PipelineConfig,
        settings: SettingsStore,
        transport: Box<dyn DescriptionTransport>,
    ) -> Result<Self, PipelineError> {
        let extractor = RecordExtractor::new(&config.discovery.site_base_url)?;
        let renderer = PosterRenderer::new(extractor, &config.discovery.excluded_ancestors)?;
        let discovery = PosterDiscovery::new(&config.discovery)?;
        let navigation = Box::new(UrlPoller::new(document.location()));
        Ok(Self {
            hover: HoverController::new(&config.hover),
            fetcher: DescriptionFetcher::new(&config.description, transport),
            document,
            settings,
            discovery,
            renderer,
            navigation,
            timers: TimerQueue::new(),
            started: false,
            config,
        })
    }

    /// Swaps the URL poller for another navigation source.
    pub fn with_navigation(mut self, mut navigation: Box<dyn NavigationSignal>) -> Self {
        navigation.reset(self.document.location());
        self.navigation = navigation;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Host-side access. Changes are picked up on the next `DomChanged` or
    /// `advance_to`.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn settings(&self) -> &Settings {
        self.settings.current()
    }

    pub fn settings_store_mut(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    pub fn hover(&self) -> &HoverController {
        &self.hover
    }

    pub fn renderer(&self) -> &PosterRenderer {
        &self.renderer
    }

    pub fn fetcher(&self) -> &DescriptionFetcher {
        &self.fetcher
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Scans the page and starts observing it. A second call is a no-op.
    pub fn start(&mut self, now: Duration) -> bool {
        if self.started {
            debug!("Pipeline already started; ignoring");
            return false;
        }
        self.started = true;
        self.navigation.reset(self.document.location());
        let found = self.discovery.attach(&mut self.document);
        let rendered = self.dispatch_all(found);
        self.timers.schedule(
            now + self.config.discovery.navigation_poll(),
            PipelineTimer::NavigationPoll,
        );
        info!(
            "Pipeline started on {} ({} overlay(s))",
            self.document.location(),
            rendered
        );
        true
    }

    pub fn handle_event(&mut self, now: Duration, event: PageEvent) -> ControlFlow<()> {
        if !self.started && !matches!(event, PageEvent::Shutdown) {
            debug!("Pipeline not started; dropping {:?}", event);
            return ControlFlow::Continue(());
        }
        match event {
            PageEvent::PointerEnter(element) => {
                self.hover.pointer_enter(now, &mut self.timers, element);
            }
            PageEvent::PointerLeave(element) => {
                self.hover.pointer_leave(now, &mut self.timers, element);
            }
            PageEvent::DomChanged => self.pump_mutations(now),
            PageEvent::Navigate(location) => {
                self.document.set_location(location);
                self.check_navigation();
            }
            PageEvent::StorageChanged(change_set) => self.apply_settings_change(&change_set),
            PageEvent::DescriptionResponse { url, result } => {
                self.complete_description(&url, result);
            }
            PageEvent::Shutdown => {
                self.teardown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Reads queued mutation records into discovery.
    pub fn pump_mutations(&mut self, now: Duration) {
        let records = self.document.take_records();
        if records.is_empty() || !self.started {
            return;
        }
        let summary =
            self.discovery
                .record_mutations(now, &self.document, &mut self.timers, &records);
        for element in summary.removed {
            self.forget_poster(element);
        }
    }

    /// Runs every timer due at or before `now`, earliest first.
    pub fn advance_to(&mut self, now: Duration) {
        self.pump_mutations(now);
        while let Some((timer_id, timer)) = self.timers.pop_due(now) {
            match timer {
                PipelineTimer::DiscoveryFlush => {
                    let ready = self.discovery.flush(timer_id, &self.document);
                    self.dispatch_all(ready);
                }
                PipelineTimer::Hover(timer) => self.hover.timer_fired(
                    &mut self.document,
                    &mut self.timers,
                    &mut self.fetcher,
                    self.settings.current(),
                    timer_id,
                    timer,
                ),
                PipelineTimer::NavigationPoll => {
                    self.check_navigation();
                    self.timers.schedule(
                        now + self.config.discovery.navigation_poll(),
                        PipelineTimer::NavigationPoll,
                    );
                }
            }
        }
    }

    /// Releases everything tied to the page: observer, timers, tooltips,
    /// hover sessions and cached descriptions.
    pub fn teardown(&mut self) {
        self.discovery.detach(&mut self.document, &mut self.timers);
        self.hover.clear(&mut self.document, &mut self.timers);
        self.timers.clear();
        self.fetcher.clear();
        self.renderer.clear();
        self.started = false;
        info!("Pipeline torn down");
    }

    fn dispatch_all(&mut self, elements: Vec<NodeId>) -> usize {
        elements
            .into_iter()
            .filter(|element| self.dispatch(*element))
            .count()
    }

    fn dispatch(&mut self, element: NodeId) -> bool {
        match self
            .renderer
            .render(&mut self.document, element, self.settings.current())
        {
            Ok(RenderOutcome::Rendered(record)) => {
                match record.resource_url.as_deref() {
                    Some(url) => self.hover.attach(element, url),
                    None => self.hover.detach(&mut self.document, &mut self.timers, element),
                }
                true
            }
            Ok(RenderOutcome::Skipped) => false,
            Err(err) => {
                warn!("Failed to process poster {:?}: {}", element, err);
                false
            }
        }
    }

    fn forget_poster(&mut self, element: NodeId) {
        self.renderer.forget(element);
        self.hover
            .detach(&mut self.document, &mut self.timers, element);
    }

    fn check_navigation(&mut self) {
        let Some(location) = self.navigation.poll(&self.document) else {
            return;
        };
        info!("Navigation to {} detected; rescanning", location);
        let found = self
            .discovery
            .reinitialize(&mut self.document, &mut self.timers);
        let stale: Vec<NodeId> = self
            .hover_and_rendered()
            .into_iter()
            .filter(|element| !self.document.is_connected(*element))
            .collect();
        for element in stale {
            self.forget_poster(element);
        }
        self.dispatch_all(found);
    }

    fn hover_and_rendered(&self) -> Vec<NodeId> {
        let mut elements = self.renderer.rendered_elements();
        elements.extend(self.hover.session_elements());
        elements.sort_unstable();
        elements.dedup();
        elements
    }

    fn apply_settings_change(&mut self, change_set: &StorageChangeSet) {
        let renderer = &mut self.renderer;
        let hover = &mut self.hover;
        self.settings
            .apply_changes(change_set, &mut self.document, |document, settings, _| {
                let rebuilt = renderer.rerender_all(document, settings);
                hover.restyle(document, settings);
                debug!("Re-rendered {} overlay(s) after settings change", rebuilt);
            });
    }

    fn complete_description(&mut self, url: &str, result: Result<PageResponse, FetchError>) {
        let completion = self.fetcher.complete(url, result);
        for waiter in completion.waiters {
            self.hover.description_ready(
                &mut self.document,
                &mut self.timers,
                self.settings.current(),
                waiter,
                &completion.text,
            );
        }
    }
}
