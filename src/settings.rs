//! User settings model, the persistent-store seam, and the live settings store.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::dom::Document;
use crate::protocol::{StorageArea, StorageChange, StorageChangeSet};

pub const SHOW_EXPORT_BUTTON_KEY: &str = "showExportButton";
pub const SEARCH_MODE_KEY: &str = "searchMode";
pub const OVERLAY_OPACITY_KEY: &str = "overlayOpacity";
pub const SETTINGS_KEYS: [&str; 3] = [SHOW_EXPORT_BUTTON_KEY, SEARCH_MODE_KEY, OVERLAY_OPACITY_KEY];

const DEFAULT_OPACITY: u8 = 70;

/// Raw key-value contents of the persistent store.
pub type StoredValues = BTreeMap<String, Value>;

/// Destination family for the poster action control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Movie search on the catalog database.
    #[default]
    Search,
    /// The host site's own film search.
    Category,
    Imdb,
    Wikipedia,
    /// Generic web search; also what unrecognized stored values resolve to.
    WebSearch,
}

impl SearchMode {
    pub fn from_storage(value: &str) -> Self {
        match value.trim() {
            "search" => Self::Search,
            "category" => Self::Category,
            "imdb" => Self::Imdb,
            "wikipedia" => Self::Wikipedia,
            other => {
                debug!("Unrecognized search mode '{}', using web search", other);
                Self::WebSearch
            }
        }
    }

    pub fn as_storage_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Category => "category",
            Self::Imdb => "imdb",
            Self::Wikipedia => "wikipedia",
            Self::WebSearch => "web",
        }
    }
}

/// Process-wide overlay settings, one instance per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub show_action: bool,
    pub mode: SearchMode,
    /// Info strip background opacity, 0 to 100.
    pub opacity: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_action: true,
            mode: SearchMode::Search,
            opacity: DEFAULT_OPACITY,
        }
    }
}

/// Which fields an update touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsDelta {
    pub show_action: bool,
    pub mode: bool,
    pub opacity: bool,
}

impl SettingsDelta {
    pub fn is_empty(&self) -> bool {
        !(self.show_action || self.mode || self.opacity)
    }

    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.show_action {
            fields.push(SHOW_EXPORT_BUTTON_KEY);
        }
        if self.mode {
            fields.push(SEARCH_MODE_KEY);
        }
        if self.opacity {
            fields.push(OVERLAY_OPACITY_KEY);
        }
        fields
    }
}

fn coerce_show_action(value: Option<&Value>) -> bool {
    !matches!(value, Some(Value::Bool(false)))
}

fn coerce_mode(value: Option<&Value>) -> SearchMode {
    match value {
        Some(Value::String(mode)) if !mode.trim().is_empty() => SearchMode::from_storage(mode),
        _ => SearchMode::default(),
    }
}

fn coerce_opacity(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(raw) if raw.is_finite() => raw.round().clamp(0.0, 100.0) as u8,
        _ => DEFAULT_OPACITY,
    }
}

impl Settings {
    /// Defaults overlaid with whatever recognized keys the store holds.
    pub fn from_stored(stored: &StoredValues) -> Self {
        Self {
            show_action: coerce_show_action(stored.get(SHOW_EXPORT_BUTTON_KEY)),
            mode: coerce_mode(stored.get(SEARCH_MODE_KEY)),
            opacity: coerce_opacity(stored.get(OVERLAY_OPACITY_KEY)),
        }
    }

    pub fn to_stored(&self) -> StoredValues {
        let mut values = StoredValues::new();
        values.insert(
            SHOW_EXPORT_BUTTON_KEY.to_string(),
            Value::Bool(self.show_action),
        );
        values.insert(
            SEARCH_MODE_KEY.to_string(),
            Value::String(self.mode.as_storage_str().to_string()),
        );
        values.insert(
            OVERLAY_OPACITY_KEY.to_string(),
            Value::from(u64::from(self.opacity)),
        );
        values
    }

    /// Applies one changed key. A removed key reverts its field to default.
    fn apply_change(&mut self, key: &str, new_value: Option<&Value>, delta: &mut SettingsDelta) {
        match key {
            SHOW_EXPORT_BUTTON_KEY => {
                let next = coerce_show_action(new_value);
                delta.show_action |= next != self.show_action;
                self.show_action = next;
            }
            SEARCH_MODE_KEY => {
                let next = coerce_mode(new_value);
                delta.mode |= next != self.mode;
                self.mode = next;
            }
            OVERLAY_OPACITY_KEY => {
                let next = coerce_opacity(new_value);
                delta.opacity |= next != self.opacity;
                self.opacity = next;
            }
            _ => {}
        }
    }
}

/// Failure to read or write the persistent settings store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
    #[error("settings storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse stored settings: {0}")]
    Parse(String),
    #[error("failed to serialize settings: {0}")]
    Serialize(String),
}

/// Persistent key-value settings store with change notifications.
pub trait SettingsBackend: Send {
    fn get(&self, keys: &[&str]) -> Result<StoredValues, StorageError>;

    /// Writes `values` and publishes one change set for the keys that differ.
    fn set(&mut self, values: StoredValues) -> Result<(), StorageError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChangeSet>;
}

/// Keys whose stored value differs between `previous` and `incoming`.
pub(crate) fn diff_values(
    previous: &StoredValues,
    incoming: &StoredValues,
) -> BTreeMap<String, StorageChange> {
    incoming
        .iter()
        .filter(|(key, value)| previous.get(key.as_str()) != Some(*value))
        .map(|(key, value)| {
            (
                key.clone(),
                StorageChange {
                    old_value: previous.get(key.as_str()).cloned(),
                    new_value: Some(value.clone()),
                },
            )
        })
        .collect()
}

/// Ephemeral store for tests and one-shot sessions.
pub struct MemorySettingsBackend {
    values: StoredValues,
    bus: broadcast::Sender<StorageChangeSet>,
    available: bool,
}

impl Default for MemorySettingsBackend {
    fn default() -> Self {
        Self::new(StoredValues::new())
    }
}

impl MemorySettingsBackend {
    pub fn new(values: StoredValues) -> Self {
        let (bus, _) = broadcast::channel(64);
        Self {
            values,
            bus,
            available: true,
        }
    }

    /// A store whose reads and writes always fail.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    /// Removes a key and notifies subscribers, as a user clearing storage would.
    pub fn remove(&mut self, key: &str) {
        if let Some(old_value) = self.values.remove(key) {
            let mut changes = BTreeMap::new();
            changes.insert(
                key.to_string(),
                StorageChange {
                    old_value: Some(old_value),
                    new_value: None,
                },
            );
            let _ = self.bus.send(StorageChangeSet::local(changes));
        }
    }
}

impl SettingsBackend for MemorySettingsBackend {
    fn get(&self, keys: &[&str]) -> Result<StoredValues, StorageError> {
        if !self.available {
            return Err(StorageError::Unavailable("memory store disabled".to_string()));
        }
        Ok(keys
            .iter()
            .filter_map(|key| Some((key.to_string(), self.values.get(*key)?.clone())))
            .collect())
    }

    fn set(&mut self, values: StoredValues) -> Result<(), StorageError> {
        if !self.available {
            return Err(StorageError::Unavailable("memory store disabled".to_string()));
        }
        let changes = diff_values(&self.values, &values);
        self.values.extend(values);
        if !changes.is_empty() {
            let _ = self.bus.send(StorageChangeSet::local(changes));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChangeSet> {
        self.bus.subscribe()
    }
}

/// Invoked after the page has been brought in line with the new settings,
/// with only the changed fields.
pub type SettingsListener = Box<dyn FnMut(&Document, &Settings, &SettingsDelta) + Send>;

/// Live settings copy with synchronous, registration-ordered listeners.
pub struct SettingsStore {
    current: Settings,
    listeners: Vec<SettingsListener>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            current: initial,
            listeners: Vec::new(),
        }
    }

    /// Reads the persisted settings once. Any failure keeps the defaults.
    pub fn load(backend: Option<&dyn SettingsBackend>) -> Self {
        let Some(backend) = backend else {
            warn!("No settings storage available. Using default settings");
            return Self::new(Settings::default());
        };
        match backend.get(&SETTINGS_KEYS) {
            Ok(stored) => {
                let settings = Settings::from_stored(&stored);
                info!("Initial settings loaded: {:?}", settings);
                Self::new(settings)
            }
            Err(err) => {
                warn!("Failed to load settings. Using defaults. error={}", err);
                Self::new(Settings::default())
            }
        }
    }

    pub fn current(&self) -> &Settings {
        &self.current
    }

    pub fn subscribe(&mut self, listener: SettingsListener) {
        self.listeners.push(listener);
    }

    /// Applies a store notification and delivers it. `apply_to_page` runs
    /// first and synchronously, then every listener in registration order
    /// sees the resulting page. Returns the touched fields, or `None` when
    /// the notification changed nothing this store tracks.
    pub fn apply_changes<F>(
        &mut self,
        change_set: &StorageChangeSet,
        document: &mut Document,
        apply_to_page: F,
    ) -> Option<SettingsDelta>
    where
        F: FnOnce(&mut Document, &Settings, &SettingsDelta),
    {
        if change_set.area != StorageArea::Local {
            debug!("Ignoring {:?} storage change", change_set.area);
            return None;
        }
        let mut delta = SettingsDelta::default();
        for (key, change) in &change_set.changes {
            self.current
                .apply_change(key, change.new_value.as_ref(), &mut delta);
        }
        if delta.is_empty() {
            return None;
        }
        info!(
            "Settings changed ({}): {:?}",
            delta.fields().join(", "),
            self.current
        );
        apply_to_page(document, &self.current, &delta);
        for listener in &mut self.listeners {
            listener(document, &self.current, &delta);
        }
        Some(delta)
    }
}

/// Writes a full settings snapshot, as the settings editor does on every edit.
pub fn save_settings(
    backend: &mut dyn SettingsBackend,
    settings: &Settings,
) -> Result<(), StorageError> {
    debug!("Saving settings: {:?}", settings);
    backend.set(settings.to_stored()).map_err(|err| {
        log::error!("Failed to save settings: {}", err);
        err
    })
}

#[cfg(test)]
mod tests {
    use super::{
        save_settings, MemorySettingsBackend, SearchMode, Settings, SettingsBackend,
        SettingsDelta, SettingsStore, StoredValues, OVERLAY_OPACITY_KEY, SEARCH_MODE_KEY,
        SHOW_EXPORT_BUTTON_KEY,
    };
    use crate::dom::Document;
    use crate::protocol::{StorageArea, StorageChange, StorageChangeSet};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn stored(pairs: &[(&str, Value)]) -> StoredValues {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn apply(store: &mut SettingsStore, change_set: &StorageChangeSet) -> Option<SettingsDelta> {
        let mut document = Document::new("https://letterboxd.com/");
        store.apply_changes(change_set, &mut document, |_, _, _| {})
    }

    fn change_set(area: StorageArea, key: &str, new_value: Option<Value>) -> StorageChangeSet {
        let mut changes = BTreeMap::new();
        changes.insert(
            key.to_string(),
            StorageChange {
                old_value: None,
                new_value,
            },
        );
        StorageChangeSet { area, changes }
    }

    #[test]
    fn test_defaults_match_documented_keys() {
        let settings = Settings::default();
        assert!(settings.show_action);
        assert_eq!(settings.mode, SearchMode::Search);
        assert_eq!(settings.opacity, 70);
    }

    #[test]
    fn test_from_stored_coerces_like_the_editor_writes() {
        let settings = Settings::from_stored(&stored(&[
            (SHOW_EXPORT_BUTTON_KEY, json!("yes")),
            (SEARCH_MODE_KEY, json!("")),
            (OVERLAY_OPACITY_KEY, json!(140)),
        ]));
        assert!(settings.show_action);
        assert_eq!(settings.mode, SearchMode::Search);
        assert_eq!(settings.opacity, 100);

        let settings = Settings::from_stored(&stored(&[
            (SHOW_EXPORT_BUTTON_KEY, json!(false)),
            (SEARCH_MODE_KEY, json!("category")),
            (OVERLAY_OPACITY_KEY, json!("35")),
        ]));
        assert!(!settings.show_action);
        assert_eq!(settings.mode, SearchMode::Category);
        assert_eq!(settings.opacity, 35);
    }

    #[test]
    fn test_unrecognized_mode_falls_back_to_web_search() {
        assert_eq!(SearchMode::from_storage("torrent"), SearchMode::WebSearch);
        assert_eq!(
            SearchMode::from_storage(SearchMode::Wikipedia.as_storage_str()),
            SearchMode::Wikipedia
        );
    }

    #[test]
    fn test_load_keeps_defaults_when_store_fails() {
        let backend = MemorySettingsBackend::unavailable();
        let store = SettingsStore::load(Some(&backend));
        assert_eq!(store.current(), &Settings::default());
        let store = SettingsStore::load(None);
        assert_eq!(store.current(), &Settings::default());
    }

    #[test]
    fn test_load_merges_stored_over_defaults() {
        let backend =
            MemorySettingsBackend::new(stored(&[(OVERLAY_OPACITY_KEY, json!(25))]));
        let store = SettingsStore::load(Some(&backend));
        assert_eq!(
            store.current(),
            &Settings {
                opacity: 25,
                ..Settings::default()
            }
        );
    }

    #[test]
    fn test_listeners_run_in_registration_order_after_page_update() {
        let mut store = SettingsStore::new(Settings::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let calls = Arc::clone(&calls);
            store.subscribe(Box::new(move |document: &Document, settings: &Settings, delta: &SettingsDelta| {
                calls.lock().expect("calls lock poisoned").push((
                    name,
                    document.location().to_string(),
                    settings.show_action,
                    delta.fields(),
                ));
            }));
        }

        let mut document = Document::new("https://letterboxd.com/");
        let page_calls = Arc::clone(&calls);
        let delta = store
            .apply_changes(
                &change_set(StorageArea::Local, SHOW_EXPORT_BUTTON_KEY, Some(json!(false))),
                &mut document,
                move |document, settings, delta| {
                    document.set_location("https://letterboxd.com/rerendered/");
                    page_calls.lock().expect("calls lock poisoned").push((
                        "page",
                        document.location().to_string(),
                        settings.show_action,
                        delta.fields(),
                    ));
                },
            )
            .expect("visibility change should apply");
        assert!(delta.show_action);
        assert!(!delta.opacity);
        let rerendered = "https://letterboxd.com/rerendered/".to_string();
        assert_eq!(
            *calls.lock().expect("calls lock poisoned"),
            vec![
                ("page", rerendered.clone(), false, vec![SHOW_EXPORT_BUTTON_KEY]),
                ("first", rerendered.clone(), false, vec![SHOW_EXPORT_BUTTON_KEY]),
                ("second", rerendered, false, vec![SHOW_EXPORT_BUTTON_KEY]),
            ]
        );
    }

    #[test]
    fn test_non_local_and_no_op_changes_are_ignored() {
        let mut store = SettingsStore::new(Settings::default());
        assert!(apply(
            &mut store,
            &change_set(StorageArea::Sync, OVERLAY_OPACITY_KEY, Some(json!(10)))
        )
        .is_none());
        assert!(apply(
            &mut store,
            &change_set(StorageArea::Local, OVERLAY_OPACITY_KEY, Some(json!(70)))
        )
        .is_none());
        assert!(apply(
            &mut store,
            &change_set(StorageArea::Local, "unrelated", Some(json!(1)))
        )
        .is_none());
    }

    #[test]
    fn test_removed_key_reverts_to_default() {
        let mut store = SettingsStore::new(Settings {
            mode: SearchMode::Imdb,
            ..Settings::default()
        });
        let delta = apply(&mut store, &change_set(StorageArea::Local, SEARCH_MODE_KEY, None))
            .expect("removal should revert mode");
        assert!(delta.mode);
        assert_eq!(store.current().mode, SearchMode::Search);
    }

    #[test]
    fn test_memory_backend_publishes_only_changed_keys() {
        let mut backend = MemorySettingsBackend::default();
        let mut receiver = backend.subscribe();
        save_settings(&mut backend, &Settings::default()).expect("save defaults");
        let first = receiver.try_recv().expect("first save publishes");
        assert_eq!(first.changes.len(), 3);

        save_settings(
            &mut backend,
            &Settings {
                opacity: 40,
                ..Settings::default()
            },
        )
        .expect("save opacity");
        let second = receiver.try_recv().expect("second save publishes");
        assert_eq!(
            second.changes.keys().cloned().collect::<Vec<_>>(),
            vec![OVERLAY_OPACITY_KEY.to_string()]
        );
        assert_eq!(
            second.changes[OVERLAY_OPACITY_KEY].old_value,
            Some(json!(70))
        );

        save_settings(
            &mut backend,
            &Settings {
                opacity: 40,
                ..Settings::default()
            },
        )
        .expect("save unchanged");
        assert!(receiver.try_recv().is_err());
    }
}
