//! Preference storage backends.

use std::path::{Path, PathBuf};

use super::record::{PreferenceRecord, Preferences};

/// Preference storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceError {
    /// Storage cannot be reached at all
    Unavailable(String),
    /// The encoded record does not fit
    QuotaExceeded { needed: usize, quota: usize },
    /// A record exists but fails structural validation
    Malformed(String),
    /// Nothing saved yet
    Missing,
}

impl std::fmt::Display for PreferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Preference storage unavailable: {e}"),
            Self::QuotaExceeded { needed, quota } => {
                write!(f, "Preference storage quota exceeded: {needed} bytes > {quota} bytes")
            }
            Self::Malformed(e) => write!(f, "Malformed preference record: {e}"),
            Self::Missing => write!(f, "No preference record"),
        }
    }
}

impl std::error::Error for PreferenceError {}

/// Load/save contract for the preference record.
pub trait PreferenceStore: Send {
    fn load(&self) -> Result<PreferenceRecord, PreferenceError>;
    fn save(&mut self, record: &PreferenceRecord) -> Result<(), PreferenceError>;
}

fn encode(record: &PreferenceRecord) -> Result<String, PreferenceError> {
    serde_json::to_string(record).map_err(|e| PreferenceError::Unavailable(e.to_string()))
}

fn decode(text: &str) -> Result<PreferenceRecord, PreferenceError> {
    serde_json::from_str(text).map_err(|e| PreferenceError::Malformed(e.to_string()))
}

/// Load preferences, falling back to defaults when the record is missing,
/// malformed or unreachable. Never fails.
pub fn load_or_default<S: PreferenceStore + ?Sized>(store: &S) -> Preferences {
    match store.load() {
        Ok(record) => Preferences::from_record(record),
        Err(PreferenceError::Missing) => {
            log::debug!("No saved preferences; using defaults");
            Preferences::default()
        }
        Err(e) => {
            log::warn!("{e}; using default preferences");
            Preferences::default()
        }
    }
}

/// In-memory store with an optional byte quota and a switch to simulate
/// storage going away.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    contents: Option<String>,
    quota: Option<usize>,
    unavailable: bool,
    saves: usize,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Pre-seeded with raw stored text, valid or not.
    pub fn with_contents(text: impl Into<String>) -> Self {
        Self {
            contents: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn set_available(&mut self, available: bool) {
        self.unavailable = !available;
    }

    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<PreferenceRecord, PreferenceError> {
        if self.unavailable {
            return Err(PreferenceError::Unavailable("storage offline".into()));
        }
        decode(self.contents.as_deref().ok_or(PreferenceError::Missing)?)
    }

    fn save(&mut self, record: &PreferenceRecord) -> Result<(), PreferenceError> {
        if self.unavailable {
            return Err(PreferenceError::Unavailable("storage offline".into()));
        }
        let text = encode(record)?;
        if let Some(quota) = self.quota {
            if text.len() > quota {
                return Err(PreferenceError::QuotaExceeded {
                    needed: text.len(),
                    quota,
                });
            }
        }
        self.contents = Some(text);
        self.saves += 1;
        Ok(())
    }
}

/// JSON file store. Saves go through a temporary file and a rename so a
/// crash never leaves a half-written record.
#[derive(Debug, Clone)]
pub struct JsonFilePreferenceStore {
    path: PathBuf,
}

impl JsonFilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PreferenceStore for JsonFilePreferenceStore {
    fn load(&self) -> Result<PreferenceRecord, PreferenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => decode(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PreferenceError::Missing),
            Err(e) => Err(PreferenceError::Unavailable(format!("{}: {e}", self.path.display()))),
        }
    }

    fn save(&mut self, record: &PreferenceRecord) -> Result<(), PreferenceError> {
        let unavailable = |e: std::io::Error| PreferenceError::Unavailable(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| PreferenceError::Unavailable(e.to_string()))?;
        let temp = self.temp_path();
        std::fs::write(&temp, text).map_err(unavailable)?;
        std::fs::rename(&temp, &self.path).map_err(unavailable)?;
        log::trace!("Preferences written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::GridLayout;

    fn record() -> PreferenceRecord {
        let mut prefs = Preferences::default();
        prefs.layout = GridLayout::TwoByTwo;
        prefs.enabled_devices.insert("laptop".into());
        prefs.to_record(1_718_000_000_000)
    }

    #[test]
    fn test_memory_store_save_then_load() {
        let mut store = MemoryPreferenceStore::new();
        assert_eq!(store.load(), Err(PreferenceError::Missing));

        store.save(&record()).unwrap();
        assert_eq!(store.load().unwrap(), record());
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_memory_store_quota() {
        let mut store = MemoryPreferenceStore::with_quota(16);
        match store.save(&record()) {
            Err(PreferenceError::QuotaExceeded { needed, quota }) => {
                assert!(needed > 16);
                assert_eq!(quota, 16);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert_eq!(store.contents(), None);
    }

    #[test]
    fn test_memory_store_outage() {
        let mut store = MemoryPreferenceStore::new();
        store.set_available(false);
        assert!(matches!(store.save(&record()), Err(PreferenceError::Unavailable(_))));
        assert!(matches!(store.load(), Err(PreferenceError::Unavailable(_))));

        store.set_available(true);
        assert!(store.save(&record()).is_ok());
    }

    #[test]
    fn test_load_or_default_recovers_from_garbage() {
        let store = MemoryPreferenceStore::with_contents(r#"{"enabled": true}"#);
        assert!(matches!(store.load(), Err(PreferenceError::Malformed(_))));
        assert_eq!(load_or_default(&store), Preferences::default());

        let store = MemoryPreferenceStore::with_contents("not json at all");
        assert_eq!(load_or_default(&store), Preferences::default());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFilePreferenceStore::new(dir.path().join("nested/prefs.json"));
        assert_eq!(store.load(), Err(PreferenceError::Missing));

        store.save(&record()).unwrap();
        assert_eq!(store.load().unwrap(), record());
        assert!(!dir.path().join("nested/prefs.json.tmp").exists());
    }

    #[test]
    fn test_file_store_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, r#"{"enabled": 1, "gridConfig": "2x2"}"#).unwrap();

        let store = JsonFilePreferenceStore::new(&path);
        assert!(matches!(store.load(), Err(PreferenceError::Malformed(_))));
        assert_eq!(load_or_default(&store), Preferences::default());
    }

    #[test]
    fn test_file_store_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // A regular file where a directory is needed.
        let mut store = JsonFilePreferenceStore::new(blocker.join("prefs.json"));
        assert!(matches!(store.save(&record()), Err(PreferenceError::Unavailable(_))));
    }
}
