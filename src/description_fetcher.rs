//! Synopsis retrieval and extraction on top of `DescriptionCache`.

use log::{debug, warn};
use scraper::{Html, Selector};

use crate::config::DescriptionConfig;
use crate::description_cache::{DescriptionCache, Reservation};
use crate::description_transport::DescriptionTransport;
use crate::dom::NodeId;
use crate::protocol::{FetchError, PageResponse};

const META_DESCRIPTION_SELECTORS: [&str; 2] = [
    "meta[name=\"description\"]",
    "meta[property=\"og:description\"]",
];

/// Collapses whitespace runs and cuts to `max_chars`, marking the cut with `…`.
pub fn truncate_blurb(value: &str, max_chars: usize) -> String {
    let compact = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        return compact;
    }
    compact.chars().take(max_chars).collect::<String>() + "…"
}

/// Picks synopsis text out of a remote page body.
pub struct DescriptionExtractor {
    candidates: Vec<Selector>,
    meta: Vec<Selector>,
    min_chars: usize,
    max_chars: usize,
}

impl DescriptionExtractor {
    pub fn new(config: &DescriptionConfig) -> Self {
        let candidates = config
            .selectors
            .iter()
            .filter_map(|raw| match Selector::parse(raw) {
                Ok(selector) => Some(selector),
                Err(err) => {
                    warn!("Ignoring invalid description selector '{}': {}", raw, err);
                    None
                }
            })
            .collect();
        let meta = META_DESCRIPTION_SELECTORS
            .iter()
            .filter_map(|raw| Selector::parse(raw).ok())
            .collect();
        Self {
            candidates,
            meta,
            min_chars: config.min_chars,
            max_chars: config.max_chars,
        }
    }

    /// First candidate with more than `min_chars` of normalized text, else
    /// the page's meta description. `None` when neither exists.
    pub fn extract(&self, body: &str) -> Option<String> {
        let page = Html::parse_document(body);
        let from_candidates = self.candidates.iter().find_map(|selector| {
            page.select(selector).find_map(|element| {
                let text = element.text().collect::<Vec<_>>().join(" ");
                let text = truncate_blurb(&text, usize::MAX);
                (text.chars().count() > self.min_chars).then_some(text)
            })
        });
        let text = from_candidates.or_else(|| {
            self.meta.iter().find_map(|selector| {
                page.select(selector)
                    .filter_map(|element| element.value().attr("content"))
                    .map(|content| truncate_blurb(content, usize::MAX))
                    .find(|content| !content.is_empty())
            })
        })?;
        Some(truncate_blurb(&text, self.max_chars))
    }
}

/// What `DescriptionFetcher::fetch` did for a waiting poster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached(String),
    /// The transport refused the request; the text is the placeholder.
    Unavailable(String),
    Started,
    Joined,
}

/// Text resolved for a completed retrieval and the posters waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub cached: bool,
    pub waiters: Vec<NodeId>,
}

pub struct DescriptionFetcher {
    cache: DescriptionCache,
    transport: Box<dyn DescriptionTransport>,
    extractor: DescriptionExtractor,
    placeholder: String,
}

impl DescriptionFetcher {
    pub fn new(config: &DescriptionConfig, transport: Box<dyn DescriptionTransport>) -> Self {
        Self {
            cache: DescriptionCache::new(),
            transport,
            extractor: DescriptionExtractor::new(config),
            placeholder: config.placeholder_text.clone(),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn cache(&self) -> &DescriptionCache {
        &self.cache
    }

    pub fn fetch(&mut self, url: &str, waiter: NodeId) -> FetchOutcome {
        match self.cache.reserve(url, waiter) {
            Reservation::Cached(text) => {
                debug!("Description cache hit for {}", url);
                FetchOutcome::Cached(text)
            }
            Reservation::Joined => {
                debug!("Joining outstanding description retrieval for {}", url);
                FetchOutcome::Joined
            }
            Reservation::Started => match self.transport.submit(url) {
                Ok(()) => {
                    debug!("Requested description from {}", url);
                    FetchOutcome::Started
                }
                Err(err) => {
                    warn!("Could not request description from {}: {}", url, err);
                    self.cache.resolve(url, None);
                    FetchOutcome::Unavailable(self.placeholder.clone())
                }
            },
        }
    }

    /// Resolves an outstanding retrieval. Failures and pages without a
    /// usable synopsis yield the placeholder, which is never cached.
    pub fn complete(&mut self, url: &str, result: Result<PageResponse, FetchError>) -> Completion {
        let extracted = match result {
            Ok(response) if (200..300).contains(&response.status) => {
                let text = self.extractor.extract(&response.body);
                if text.is_none() {
                    debug!("No description found on {}", url);
                }
                text
            }
            Ok(response) => {
                warn!("Description page {} answered {}", url, response.status);
                None
            }
            Err(err) => {
                warn!("Description retrieval for {} failed: {}", url, err);
                None
            }
        };
        let cached = extracted.is_some();
        let text = extracted
            .clone()
            .unwrap_or_else(|| self.placeholder.clone());
        let waiters = self.cache.resolve(url, extracted);
        Completion {
            text,
            cached,
            waiters,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
