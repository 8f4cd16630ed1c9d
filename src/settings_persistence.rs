//! TOML-file settings backend.
//!
//! Only changed keys are rewritten, through `toml_edit`, so comments and
//! formatting a user added to `settings.toml` survive every save.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use toml_edit::{value, DocumentMut, Item};

use crate::protocol::StorageChangeSet;
use crate::settings::{diff_values, SettingsBackend, StorageError, StoredValues};

const SETTINGS_DIR_NAME: &str = "poster-overlay";
const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Default location: `<config_dir>/poster-overlay/settings.toml`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

fn json_to_toml_item(json: &Value) -> Option<Item> {
    match json {
        Value::Bool(flag) => Some(value(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Some(value(integer)),
            None => number.as_f64().map(value),
        },
        Value::String(text) => Some(value(text.as_str())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn set_value_preserving_decor(document: &mut DocumentMut, key: &str, item: Item) {
    let existing_decor = document
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    document[key] = item;
    if let Some(existing_decor) = existing_decor {
        if let Some(next_value) = document[key].as_value_mut() {
            *next_value.decor_mut() = existing_decor;
        }
    }
}

/// Parses stored settings text into untyped values.
pub fn parse_settings_text(text: &str) -> Result<StoredValues, StorageError> {
    let table = toml::from_str::<toml::Table>(text)
        .map_err(|err| StorageError::Parse(err.to_string()))?;
    let json = serde_json::to_value(&table).map_err(|err| StorageError::Parse(err.to_string()))?;
    match json {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(StoredValues::new()),
    }
}

/// Rewrites `values` into `existing_text`, leaving unrelated lines untouched.
pub fn serialize_settings_with_preserved_comments(
    existing_text: &str,
    values: &StoredValues,
) -> Result<String, StorageError> {
    let mut document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| StorageError::Parse(err.to_string()))?;
    for (key, json) in values {
        let Some(item) = json_to_toml_item(json) else {
            return Err(StorageError::Serialize(format!(
                "unsupported value for '{key}': {json}"
            )));
        };
        set_value_preserving_decor(&mut document, key, item);
    }
    Ok(document.to_string())
}

pub struct TomlSettingsBackend {
    path: PathBuf,
    bus: broadcast::Sender<StorageChangeSet>,
}

impl TomlSettingsBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (bus, _) = broadcast::channel(64);
        Self {
            path: path.into(),
            bus,
        }
    }

    /// Backend at the platform config directory, if one exists.
    pub fn at_default_location() -> Option<Self> {
        default_settings_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<StoredValues, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => parse_settings_text(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "Settings file {} not found; treating store as empty",
                    self.path.display()
                );
                Ok(StoredValues::new())
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

impl SettingsBackend for TomlSettingsBackend {
    fn get(&self, keys: &[&str]) -> Result<StoredValues, StorageError> {
        let all = self.read_all()?;
        Ok(keys
            .iter()
            .filter_map(|key| Some((key.to_string(), all.get(*key)?.clone())))
            .collect())
    }

    fn set(&mut self, values: StoredValues) -> Result<(), StorageError> {
        let existing_text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(StorageError::Io(err)),
        };
        let (previous, base_text) = match parse_settings_text(&existing_text) {
            Ok(previous) => (previous, existing_text),
            Err(err) => {
                warn!(
                    "Existing settings file {} is unreadable ({}). Rewriting it.",
                    self.path.display(),
                    err
                );
                (StoredValues::new(), String::new())
            }
        };
        let next_text = serialize_settings_with_preserved_comments(&base_text, &values)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, next_text)?;

        let changes = diff_values(&previous, &values);
        if !changes.is_empty() {
            let _ = self.bus.send(StorageChangeSet::local(changes));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChangeSet> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_settings_text, serialize_settings_with_preserved_comments, TomlSettingsBackend};
    use crate::settings::{
        save_settings, SearchMode, Settings, SettingsBackend, SettingsStore, OVERLAY_OPACITY_KEY,
    };
    use serde_json::json;

    #[test]
    fn test_serialize_preserves_comments_and_unrelated_keys() {
        let existing = "# chosen by hand\noverlayOpacity = 70 # strip alpha\ntheme = \"dark\"\n";
        let mut values = crate::settings::StoredValues::new();
        values.insert(OVERLAY_OPACITY_KEY.to_string(), json!(45));
        let text = serialize_settings_with_preserved_comments(existing, &values)
            .expect("settings should serialize");
        assert!(text.contains("# chosen by hand"));
        assert!(text.contains("overlayOpacity = 45"));
        assert!(text.contains("# strip alpha"));
        assert!(text.contains("theme = \"dark\""));
    }

    #[test]
    fn test_parse_settings_text_rejects_invalid_toml() {
        assert!(parse_settings_text("overlayOpacity = ").is_err());
        let parsed = parse_settings_text("showExportButton = false\nsearchMode = \"imdb\"")
            .expect("valid settings parse");
        assert_eq!(parsed["showExportButton"], json!(false));
        assert_eq!(parsed["searchMode"], json!("imdb"));
    }

    #[test]
    fn test_backend_round_trip_through_settings_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.toml");
        let mut backend = TomlSettingsBackend::new(&path);
        let mut receiver = backend.subscribe();

        let wanted = Settings {
            show_action: false,
            mode: SearchMode::Wikipedia,
            opacity: 12,
        };
        save_settings(&mut backend, &wanted).expect("save should succeed");
        assert!(path.exists());
        let published = receiver.try_recv().expect("save publishes a change set");
        assert_eq!(published.changes.len(), 3);

        let store = SettingsStore::load(Some(&backend));
        assert_eq!(store.current(), &wanted);
    }

    #[test]
    fn test_save_keeps_a_comment_only_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "# my hand-written notes\n").expect("seed file");
        let mut backend = TomlSettingsBackend::new(&path);

        save_settings(&mut backend, &Settings::default()).expect("save should succeed");

        let text = std::fs::read_to_string(&path).expect("settings file");
        assert!(text.contains("# my hand-written notes"));
        assert!(text.contains("overlayOpacity = 70"));
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = TomlSettingsBackend::new(dir.path().join("settings.toml"));
        let values = backend
            .get(&["showExportButton"])
            .expect("missing file is not an error");
        assert!(values.is_empty());
    }
}
