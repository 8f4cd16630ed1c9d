//! Per-poster hover state machine and tooltip DOM.
//!
//! Sessions live in a side table keyed by poster element. Timers are owned by
//! the caller's `TimerQueue`; this module only schedules and cancels them.
//! Pointer presence is re-checked at every completion point, which is how a
//! stale dwell timer or a late description is cancelled.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, warn};

use crate::config::HoverConfig;
use crate::description_fetcher::{DescriptionFetcher, FetchOutcome};
use crate::dom::{Document, DomError, NodeId};
use crate::poster_renderer::strip_background;
use crate::settings::Settings;
use crate::timers::{TimerId, TimerQueue};

pub const TOOLTIP_CLASS: &str = "poster-description-tooltip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverPhase {
    Idle,
    /// Pointer inside, dwell timer running.
    Pending,
    /// Dwell elapsed, description outstanding.
    Fetching,
    Visible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HoverTimer {
    Dwell(NodeId),
    ExitGrace(NodeId),
}

#[derive(Debug, Clone)]
pub struct HoverSession {
    phase: HoverPhase,
    pending_timer: Option<TimerId>,
    pointer_inside: bool,
    tooltip: Option<NodeId>,
    resource_url: String,
}

impl HoverSession {
    fn new(resource_url: String) -> Self {
        Self {
            phase: HoverPhase::Idle,
            pending_timer: None,
            pointer_inside: false,
            tooltip: None,
            resource_url,
        }
    }

    pub fn phase(&self) -> HoverPhase {
        self.phase
    }

    pub fn pointer_inside(&self) -> bool {
        self.pointer_inside
    }

    pub fn tooltip_visible(&self) -> bool {
        self.tooltip.is_some()
    }

    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }
}

pub struct HoverController {
    hover_delay: Duration,
    exit_grace: Duration,
    sessions: BTreeMap<NodeId, HoverSession>,
}

fn cancel_pending<T>(session: &mut HoverSession, timers: &mut TimerQueue<T>) {
    if let Some(timer) = session.pending_timer.take() {
        timers.cancel(timer);
    }
}

fn hide_tooltip(document: &mut Document, session: &mut HoverSession) {
    if let Some(tooltip) = session.tooltip.take() {
        document.remove(tooltip);
    }
}

fn tooltips_of(document: &Document, element: NodeId) -> Vec<NodeId> {
    document
        .children(element)
        .iter()
        .copied()
        .filter(|child| document.has_class(*child, TOOLTIP_CLASS))
        .collect()
}

fn style_tooltip(document: &mut Document, tooltip: NodeId, opacity: u8) -> Result<(), DomError> {
    let background = strip_background(opacity);
    for (property, value) in [
        ("position", "absolute"),
        ("left", "0"),
        ("right", "0"),
        ("bottom", "0"),
        ("z-index", "3"),
        ("padding", "6px 8px"),
        ("background", background.as_str()),
        ("color", "#fff"),
        ("font-size", "0.8rem"),
        ("line-height", "1.3"),
        ("pointer-events", "none"),
    ] {
        document.set_style(tooltip, property, value)?;
    }
    Ok(())
}

fn show_tooltip(
    document: &mut Document,
    element: NodeId,
    text: &str,
    settings: &Settings,
) -> Result<NodeId, DomError> {
    for stale in tooltips_of(document, element) {
        document.remove(stale);
    }
    let tooltip = document.create_element("div");
    document.set_attribute(tooltip, "class", TOOLTIP_CLASS)?;
    style_tooltip(document, tooltip, settings.opacity)?;
    document.set_text(tooltip, text)?;
    document.append_child(element, tooltip)?;
    Ok(tooltip)
}

impl HoverController {
    pub fn new(config: &HoverConfig) -> Self {
        Self {
            hover_delay: config.hover_delay(),
            exit_grace: config.exit_grace(),
            sessions: BTreeMap::new(),
        }
    }

    pub fn session(&self, element: NodeId) -> Option<&HoverSession> {
        self.sessions.get(&element)
    }

    pub fn session_elements(&self) -> Vec<NodeId> {
        self.sessions.keys().copied().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Creates an idle session, or points an existing one at a new URL.
    pub fn attach(&mut self, element: NodeId, resource_url: &str) {
        match self.sessions.get_mut(&element) {
            Some(session) => {
                if session.resource_url != resource_url {
                    session.resource_url = resource_url.to_string();
                }
            }
            None => {
                self.sessions
                    .insert(element, HoverSession::new(resource_url.to_string()));
            }
        }
    }

    pub fn detach<T>(&mut self, document: &mut Document, timers: &mut TimerQueue<T>, element: NodeId) {
        if let Some(mut session) = self.sessions.remove(&element) {
            cancel_pending(&mut session, timers);
            hide_tooltip(document, &mut session);
            debug!("Dropped hover session for {:?}", element);
        }
    }

    pub fn pointer_enter<T: From<HoverTimer>>(
        &mut self,
        now: Duration,
        timers: &mut TimerQueue<T>,
        element: NodeId,
    ) {
        let Some(session) = self.sessions.get_mut(&element) else {
            return;
        };
        session.pointer_inside = true;
        match session.phase {
            HoverPhase::Idle => {
                session.phase = HoverPhase::Pending;
                session.pending_timer =
                    Some(timers.schedule(now + self.hover_delay, HoverTimer::Dwell(element).into()));
            }
            HoverPhase::Pending => {}
            // Re-entry during the exit grace keeps the current tooltip/fetch.
            HoverPhase::Fetching | HoverPhase::Visible => cancel_pending(session, timers),
        }
    }

    pub fn pointer_leave<T: From<HoverTimer>>(
        &mut self,
        now: Duration,
        timers: &mut TimerQueue<T>,
        element: NodeId,
    ) {
        let Some(session) = self.sessions.get_mut(&element) else {
            return;
        };
        session.pointer_inside = false;
        match session.phase {
            HoverPhase::Idle => {}
            HoverPhase::Pending => {
                cancel_pending(session, timers);
                session.phase = HoverPhase::Idle;
            }
            HoverPhase::Fetching | HoverPhase::Visible => {
                if session.pending_timer.is_none() {
                    session.pending_timer = Some(
                        timers.schedule(now + self.exit_grace, HoverTimer::ExitGrace(element).into()),
                    );
                }
            }
        }
    }

    /// Handles a popped hover timer. Timers that no longer belong to their
    /// session are ignored.
    pub fn timer_fired<T>(
        &mut self,
        document: &mut Document,
        timers: &mut TimerQueue<T>,
        fetcher: &mut DescriptionFetcher,
        settings: &Settings,
        timer_id: TimerId,
        timer: HoverTimer,
    ) {
        let element = match timer {
            HoverTimer::Dwell(element) | HoverTimer::ExitGrace(element) => element,
        };
        let Some(session) = self.sessions.get_mut(&element) else {
            return;
        };
        if session.pending_timer != Some(timer_id) {
            return;
        }
        session.pending_timer = None;
        match timer {
            HoverTimer::Dwell(_) => self.dwell_elapsed(document, timers, fetcher, settings, element),
            HoverTimer::ExitGrace(_) => {
                if !session.pointer_inside {
                    hide_tooltip(document, session);
                    session.phase = HoverPhase::Idle;
                    debug!("Hover on {:?} ended", element);
                }
            }
        }
    }

    fn dwell_elapsed<T>(
        &mut self,
        document: &mut Document,
        timers: &mut TimerQueue<T>,
        fetcher: &mut DescriptionFetcher,
        settings: &Settings,
        element: NodeId,
    ) {
        let Some(session) = self.sessions.get_mut(&element) else {
            return;
        };
        if session.phase != HoverPhase::Pending {
            return;
        }
        if !session.pointer_inside {
            session.phase = HoverPhase::Idle;
            return;
        }
        session.phase = HoverPhase::Fetching;
        let url = session.resource_url.clone();
        match fetcher.fetch(&url, element) {
            FetchOutcome::Cached(text) | FetchOutcome::Unavailable(text) => {
                self.description_ready(document, timers, settings, element, &text);
            }
            FetchOutcome::Started | FetchOutcome::Joined => {}
        }
    }

    /// Delivers text to a waiting poster. Shown only while the pointer is
    /// still inside; otherwise the session returns to idle.
    pub fn description_ready<T>(
        &mut self,
        document: &mut Document,
        timers: &mut TimerQueue<T>,
        settings: &Settings,
        element: NodeId,
        text: &str,
    ) {
        let Some(session) = self.sessions.get_mut(&element) else {
            return;
        };
        if session.phase != HoverPhase::Fetching {
            return;
        }
        if !session.pointer_inside {
            cancel_pending(session, timers);
            session.phase = HoverPhase::Idle;
            debug!("Discarding description for {:?}; pointer left", element);
            return;
        }
        match show_tooltip(document, element, text, settings) {
            Ok(tooltip) => {
                session.tooltip = Some(tooltip);
                session.phase = HoverPhase::Visible;
            }
            Err(err) => {
                warn!("Failed to show tooltip on {:?}: {}", element, err);
                session.phase = HoverPhase::Idle;
            }
        }
    }

    /// Applies a new opacity to visible tooltips.
    pub fn restyle(&mut self, document: &mut Document, settings: &Settings) {
        for (element, session) in &self.sessions {
            if let Some(tooltip) = session.tooltip {
                if let Err(err) = style_tooltip(document, tooltip, settings.opacity) {
                    warn!("Failed to restyle tooltip on {:?}: {}", element, err);
                }
            }
        }
    }

    pub fn clear<T>(&mut self, document: &mut Document, timers: &mut TimerQueue<T>) {
        for session in self.sessions.values_mut() {
            cancel_pending(session, timers);
            hide_tooltip(document, session);
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{HoverController, HoverPhase, HoverTimer, TOOLTIP_CLASS};
    use crate::config::{DescriptionConfig, HoverConfig};
    use crate::description_fetcher::DescriptionFetcher;
    use crate::description_transport::testing::RecordingTransport;
    use crate::dom::{Document, NodeId};
    use crate::protocol::PageResponse;
    use crate::settings::Settings;
    use crate::timers::TimerQueue;

    const URL: &str = "https://letterboxd.com/film/alien/";

    struct Harness {
        document: Document,
        timers: TimerQueue<HoverTimer>,
        fetcher: DescriptionFetcher,
        transport: RecordingTransport,
        controller: HoverController,
        poster: NodeId,
        settings: Settings,
    }

    impl Harness {
        fn new() -> Self {
            let mut document = Document::new("https://letterboxd.com/");
            let body = document.body();
            let poster = document.create_element("li");
            document.append_child(body, poster).expect("append poster");
            let transport = RecordingTransport::default();
            let fetcher =
                DescriptionFetcher::new(&DescriptionConfig::default(), Box::new(transport.clone()));
            let mut controller = HoverController::new(&HoverConfig::default());
            controller.attach(poster, URL);
            Self {
                document,
                timers: TimerQueue::new(),
                fetcher,
                transport,
                controller,
                poster,
                settings: Settings::default(),
            }
        }

        fn advance(&mut self, now: Duration) {
            while let Some((id, timer)) = self.timers.pop_due(now) {
                self.controller.timer_fired(
                    &mut self.document,
                    &mut self.timers,
                    &mut self.fetcher,
                    &self.settings,
                    id,
                    timer,
                );
            }
        }

        fn deliver(&mut self, body: &str) {
            let completion = self.fetcher.complete(
                URL,
                Ok(PageResponse {
                    status: 200,
                    body: body.to_string(),
                }),
            );
            for waiter in completion.waiters {
                self.controller.description_ready(
                    &mut self.document,
                    &mut self.timers,
                    &self.settings,
                    waiter,
                    &completion.text,
                );
            }
        }

        fn phase(&self) -> HoverPhase {
            self.controller.session(self.poster).expect("session").phase()
        }

        fn tooltip_count(&self) -> usize {
            self.tooltips_on(self.poster)
        }

        fn tooltips_on(&self, poster: NodeId) -> usize {
            self.document
                .children(poster)
                .iter()
                .filter(|child| self.document.has_class(**child, TOOLTIP_CLASS))
                .count()
        }

        /// Adds another poster linking to the same film page.
        fn add_poster(&mut self) -> NodeId {
            let body = self.document.body();
            let poster = self.document.create_element("li");
            self.document.append_child(body, poster).expect("append poster");
            self.controller.attach(poster, URL);
            poster
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    const SYNOPSIS_PAGE: &str = "<html><head><meta name=\"description\" content=\"A crew answers a distress call.\"></head></html>";

    #[test]
    fn test_transient_hover_never_fetches() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        assert_eq!(harness.phase(), HoverPhase::Pending);
        harness.advance(ms(600));
        harness.controller.pointer_leave(ms(600), &mut harness.timers, poster);
        harness.advance(ms(5_000));
        assert_eq!(harness.phase(), HoverPhase::Idle);
        assert!(harness.transport.submitted().is_empty());
        assert!(harness.timers.is_empty());
    }

    #[test]
    fn test_sustained_hover_fetches_once_and_shows_tooltip() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.controller.pointer_enter(ms(200), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        assert_eq!(harness.phase(), HoverPhase::Fetching);
        assert_eq!(harness.transport.submitted(), vec![URL.to_string()]);

        harness.deliver(SYNOPSIS_PAGE);
        assert_eq!(harness.phase(), HoverPhase::Visible);
        assert_eq!(harness.tooltip_count(), 1);
    }

    #[test]
    fn test_late_description_is_discarded_after_exit() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        harness.controller.pointer_leave(ms(1_100), &mut harness.timers, poster);
        harness.deliver(SYNOPSIS_PAGE);
        assert_eq!(harness.phase(), HoverPhase::Idle);
        assert_eq!(harness.tooltip_count(), 0);
        assert!(harness.timers.is_empty());
        assert!(harness.fetcher.cache().get(URL).is_some());
    }

    #[test]
    fn test_grace_expiring_during_fetch_leaves_response_unshown() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        assert_eq!(harness.phase(), HoverPhase::Fetching);

        harness.controller.pointer_leave(ms(1_100), &mut harness.timers, poster);
        harness.advance(ms(1_400));
        assert_eq!(harness.phase(), HoverPhase::Idle);
        assert!(harness.timers.is_empty());

        harness.deliver(SYNOPSIS_PAGE);
        assert_eq!(harness.phase(), HoverPhase::Idle);
        assert_eq!(harness.tooltip_count(), 0);
        assert_eq!(
            harness.fetcher.cache().get(URL),
            Some("A crew answers a distress call.")
        );
        assert_eq!(harness.transport.submitted().len(), 1);
    }

    #[test]
    fn test_posters_sharing_a_film_join_one_request() {
        let mut harness = Harness::new();
        let first = harness.poster;
        let second = harness.add_poster();
        harness.controller.pointer_enter(ms(0), &mut harness.timers, first);
        harness.controller.pointer_enter(ms(100), &mut harness.timers, second);
        harness.advance(ms(1_100));
        assert_eq!(harness.transport.submitted(), vec![URL.to_string()]);
        for poster in [first, second] {
            assert_eq!(
                harness.controller.session(poster).expect("session").phase(),
                HoverPhase::Fetching
            );
        }

        harness.deliver(SYNOPSIS_PAGE);
        for poster in [first, second] {
            assert_eq!(
                harness.controller.session(poster).expect("session").phase(),
                HoverPhase::Visible
            );
            assert_eq!(harness.tooltips_on(poster), 1);
        }
        assert_eq!(harness.transport.submitted().len(), 1);
    }

    #[test]
    fn test_reentry_within_grace_keeps_tooltip() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        harness.deliver(SYNOPSIS_PAGE);

        harness.controller.pointer_leave(ms(2_000), &mut harness.timers, poster);
        harness.advance(ms(2_200));
        harness.controller.pointer_enter(ms(2_200), &mut harness.timers, poster);
        harness.advance(ms(4_000));
        assert_eq!(harness.phase(), HoverPhase::Visible);
        assert_eq!(harness.tooltip_count(), 1);

        harness.controller.pointer_leave(ms(4_000), &mut harness.timers, poster);
        harness.advance(ms(4_300));
        assert_eq!(harness.phase(), HoverPhase::Idle);
        assert_eq!(harness.tooltip_count(), 0);
    }

    #[test]
    fn test_cached_description_shows_without_new_request() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        harness.deliver(SYNOPSIS_PAGE);
        harness.controller.pointer_leave(ms(1_500), &mut harness.timers, poster);
        harness.advance(ms(1_800));

        harness.controller.pointer_enter(ms(3_000), &mut harness.timers, poster);
        harness.advance(ms(4_000));
        assert_eq!(harness.phase(), HoverPhase::Visible);
        assert_eq!(harness.transport.submitted().len(), 1);
    }

    #[test]
    fn test_detach_removes_tooltip_and_timers() {
        let mut harness = Harness::new();
        let poster = harness.poster;
        harness.controller.pointer_enter(ms(0), &mut harness.timers, poster);
        harness.advance(ms(1_000));
        harness.deliver(SYNOPSIS_PAGE);
        harness.controller.pointer_leave(ms(1_200), &mut harness.timers, poster);

        harness
            .controller
            .detach(&mut harness.document, &mut harness.timers, poster);
        assert!(harness.controller.session(poster).is_none());
        assert_eq!(harness.tooltip_count(), 0);
        assert!(harness.timers.is_empty());
    }
}
