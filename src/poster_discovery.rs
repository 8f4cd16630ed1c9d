//! Finds poster elements as the host page inserts or rewrites them.

use std::collections::BTreeSet;
use std::time::Duration;

use log::{debug, info};

use crate::config::DiscoveryConfig;
use crate::dom::{Document, MutationRecord, NodeId, ObserverOptions, Selector, SelectorError};
use crate::poster_renderer::has_overlay;
use crate::timers::{TimerId, TimerQueue};

/// Payload of the debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryFlush;

/// What one batch of mutation records meant for discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationSummary {
    /// Elements newly added to the pending set.
    pub queued: usize,
    /// Posters that left the document.
    pub removed: Vec<NodeId>,
}

pub struct PosterDiscovery {
    posters: Selector,
    observer_options: ObserverOptions,
    debounce: Duration,
    pending: BTreeSet<NodeId>,
    flush_timer: Option<TimerId>,
}

impl PosterDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            posters: Selector::parse_group(&config.poster_selectors)?,
            observer_options: ObserverOptions {
                child_list: true,
                subtree: true,
                attribute_filter: Some(config.observed_attributes.clone()),
            },
            debounce: config.debounce(),
            pending: BTreeSet::new(),
            flush_timer: None,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn flush_scheduled(&self) -> bool {
        self.flush_timer.is_some()
    }

    /// Observes `body` and returns every undecorated poster already present,
    /// in document order.
    pub fn attach(&mut self, document: &mut Document) -> Vec<NodeId> {
        let body = document.body();
        document.observe(body, self.observer_options.clone());
        let found: Vec<NodeId> = document
            .query_selector_all(body, &self.posters)
            .into_iter()
            .filter(|element| !has_overlay(document, *element))
            .collect();
        info!("Discovery attached; {} poster(s) present", found.len());
        found
    }

    /// Drops pending work and the observer registration.
    pub fn detach<T>(&mut self, document: &mut Document, timers: &mut TimerQueue<T>) {
        document.disconnect();
        // Records queued before the disconnect belong to the old registration.
        document.take_records();
        self.pending.clear();
        if let Some(timer) = self.flush_timer.take() {
            timers.cancel(timer);
        }
    }

    /// Tears down and re-runs discovery from scratch.
    pub fn reinitialize<T>(&mut self, document: &mut Document, timers: &mut TimerQueue<T>) -> Vec<NodeId> {
        self.detach(document, timers);
        self.attach(document)
    }

    fn enqueue_with_descendants(&mut self, document: &Document, node: NodeId) -> usize {
        if !document.is_element(node) {
            return 0;
        }
        let mut queued = 0;
        if document.matches(node, &self.posters) && self.pending.insert(node) {
            queued += 1;
        }
        for poster in document.query_selector_all(node, &self.posters) {
            if self.pending.insert(poster) {
                queued += 1;
            }
        }
        queued
    }

    fn removed_posters(&self, document: &Document, node: NodeId, into: &mut Vec<NodeId>) {
        if !document.is_element(node) || document.is_connected(node) {
            return;
        }
        if document.matches(node, &self.posters) {
            into.push(node);
        }
        into.extend(document.query_selector_all(node, &self.posters));
    }

    /// Folds mutation records into the pending set and restarts the debounce
    /// timer if anything was seen.
    pub fn record_mutations<T: From<DiscoveryFlush>>(
        &mut self,
        now: Duration,
        document: &Document,
        timers: &mut TimerQueue<T>,
        records: &[MutationRecord],
    ) -> MutationSummary {
        let mut summary = MutationSummary::default();
        let mut relevant = false;
        for record in records {
            match record {
                MutationRecord::ChildList { added, removed, .. } => {
                    for node in added {
                        let queued = self.enqueue_with_descendants(document, *node);
                        relevant |= queued > 0;
                        summary.queued += queued;
                    }
                    for node in removed {
                        self.removed_posters(document, *node, &mut summary.removed);
                    }
                }
                MutationRecord::Attributes { target, name } => {
                    let Some(poster) = document.closest(*target, &self.posters) else {
                        continue;
                    };
                    debug!("Attribute '{}' changed on poster {:?}", name, poster);
                    relevant = true;
                    if self.pending.insert(poster) {
                        summary.queued += 1;
                    }
                }
            }
        }
        summary.removed.sort_unstable();
        summary.removed.dedup();
        if relevant {
            if let Some(timer) = self.flush_timer.take() {
                timers.cancel(timer);
            }
            self.flush_timer = Some(timers.schedule(now + self.debounce, DiscoveryFlush.into()));
        }
        summary
    }

    /// Drains the pending set once the debounce timer fires. Elements that
    /// left the document or already carry an overlay are dropped.
    pub fn flush(&mut self, timer_id: TimerId, document: &Document) -> Vec<NodeId> {
        if self.flush_timer != Some(timer_id) {
            return Vec::new();
        }
        self.flush_timer = None;
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        let ready: Vec<NodeId> = pending
            .into_iter()
            .filter(|element| document.is_connected(*element) && !has_overlay(document, *element))
            .collect();
        debug!("Discovery flush: {} of {} pending element(s) dispatched", ready.len(), total);
        ready
    }
}
