//! Memoized synopsis text keyed by resource URL.
//!
//! A URL is either ready (text fetched successfully, never replaced) or in
//! flight (one retrieval outstanding, with every poster waiting on it). The
//! in-flight marker makes check-then-fetch atomic: a second poster asking for
//! the same URL joins the outstanding retrieval instead of issuing another.

use std::collections::HashMap;

use crate::dom::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheEntry {
    Ready(String),
    InFlight(Vec<NodeId>),
}

/// Result of asking the cache to serve `url` for a waiting poster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Cached(String),
    /// The caller must start the retrieval.
    Started,
    /// Another retrieval is outstanding; the caller was added as a waiter.
    Joined,
}

#[derive(Debug, Default)]
pub struct DescriptionCache {
    entries: HashMap<String, CacheEntry>,
}

impl DescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        match self.entries.get(url) {
            Some(CacheEntry::Ready(text)) => Some(text),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, url: &str) -> bool {
        matches!(self.entries.get(url), Some(CacheEntry::InFlight(_)))
    }

    pub fn reserve(&mut self, url: &str, waiter: NodeId) -> Reservation {
        match self.entries.get_mut(url) {
            Some(CacheEntry::Ready(text)) => Reservation::Cached(text.clone()),
            Some(CacheEntry::InFlight(waiters)) => {
                if !waiters.contains(&waiter) {
                    waiters.push(waiter);
                }
                Reservation::Joined
            }
            None => {
                self.entries
                    .insert(url.to_string(), CacheEntry::InFlight(vec![waiter]));
                Reservation::Started
            }
        }
    }

    /// Ends the retrieval for `url` and returns its waiters in arrival order.
    ///
    /// `Some(text)` is stored permanently; `None` leaves the URL uncached so a
    /// later hover retries. A URL that is already ready keeps its first text.
    pub fn resolve(&mut self, url: &str, text: Option<String>) -> Vec<NodeId> {
        let waiters = match self.entries.remove(url) {
            Some(CacheEntry::InFlight(waiters)) => waiters,
            Some(ready @ CacheEntry::Ready(_)) => {
                self.entries.insert(url.to_string(), ready);
                return Vec::new();
            }
            None => Vec::new(),
        };
        if let Some(text) = text {
            self.entries.insert(url.to_string(), CacheEntry::Ready(text));
        }
        waiters
    }

    pub fn ready_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Ready(_)))
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
