//! Event protocol shared by the page loop and its collaborators.
//!
//! `PageEvent` is the envelope for everything that enters the pipeline from
//! outside: pointer activity, host DOM changes, navigation, settings-store
//! notifications, and completed description retrievals.

use std::collections::BTreeMap;

use crate::dom::NodeId;

/// Top-level envelope for page loop traffic.
#[derive(Debug, Clone)]
pub enum PageEvent {
    PointerEnter(NodeId),
    PointerLeave(NodeId),
    /// The host mutated the document; pending mutation records should be read.
    DomChanged,
    /// Client-side navigation replaced the page URL.
    Navigate(String),
    StorageChanged(StorageChangeSet),
    DescriptionResponse {
        url: String,
        result: Result<PageResponse, FetchError>,
    },
    Shutdown,
}

/// Storage area a change notification originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageArea {
    Local,
    Sync,
}

/// Old and new value of one changed key. `None` means absent.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageChange {
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
}

/// One change notification: every key written by a single `set`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageChangeSet {
    pub area: StorageArea,
    pub changes: BTreeMap<String, StorageChange>,
}

impl StorageChangeSet {
    pub fn local(changes: BTreeMap<String, StorageChange>) -> Self {
        Self {
            area: StorageArea::Local,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Raw remote page returned by a description transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

/// Failure to retrieve a remote description page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("description retrieval was abandoned")]
    Abandoned,
}
