//! Client-side navigation detection.

use crate::dom::Document;

/// Reports location changes the host made without a full reload.
pub trait NavigationSignal: Send {
    /// The new location, once per change.
    fn poll(&mut self, document: &Document) -> Option<String>;
    fn reset(&mut self, location: &str);
}

/// Compares the document location against the last one seen. Driven by a
/// fixed-interval timer, since pages expose no generic change event.
#[derive(Debug, Clone, Default)]
pub struct UrlPoller {
    last_seen: String,
}

impl UrlPoller {
    pub fn new(location: &str) -> Self {
        Self {
            last_seen: location.to_string(),
        }
    }
}

impl NavigationSignal for UrlPoller {
    fn poll(&mut self, document: &Document) -> Option<String> {
        if document.location() == self.last_seen {
            return None;
        }
        self.last_seen = document.location().to_string();
        Some(self.last_seen.clone())
    }

    fn reset(&mut self, location: &str) {
        self.last_seen = location.to_string();
    }
}
