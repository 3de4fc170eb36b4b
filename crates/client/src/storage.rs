//! Persistent key/value storage.
//!
//! Values are JSON files in one directory, by default the platform config
//! directory:
//!   - Linux: `~/.config/srtmon/`
//!   - macOS: `~/Library/Application Support/srtmon/`
//!   - Windows: `%APPDATA%\srtmon\`
//!
//! Several processes may share the directory. Each key lives in its own
//! file at [`Storage::path_of`], so a directory watcher can tell which key
//! another process rewrote.

use std::io;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

const APP_DIR: &str = "srtmon";

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted at `dir`. The directory is created on first write.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage in the platform config directory.
    pub fn default_location() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        Some(Self::at(config_dir.join(APP_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a value. Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json),
            Err(_) => false,
        }
    }

    /// Load a value. Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        serde_json::from_str(&json).ok()
    }

    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).is_file()
    }

    /// Create the storage directory if it is missing.
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    pub fn save_raw(&self, key: &str, value: &str) -> bool {
        if self.ensure_dir().is_err() {
            return false;
        }
        std::fs::write(self.file_path(key), value).is_ok()
    }

    pub fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    /// File backing `key`.
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.file_path(key)
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        dark_mode: bool,
    }

    #[test]
    fn save_load_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path().join("nested"));

        assert!(!storage.exists("prefs"));
        assert!(storage.save("prefs", &Prefs { dark_mode: true }));
        assert_eq!(storage.load::<Prefs>("prefs"), Some(Prefs { dark_mode: true }));

        storage.remove("prefs");
        assert!(!storage.exists("prefs"));
        assert_eq!(storage.load::<Prefs>("prefs"), None);
    }

    #[test]
    fn keys_are_sanitized_into_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path());
        assert!(storage.save_raw("a/b:c", "{}"));
        assert!(tmp.path().join("a_b_c.json").is_file());
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path().join("a").join("b"));
        storage.ensure_dir().unwrap();
        assert!(storage.dir().is_dir());
        assert_eq!(storage.path_of("k"), tmp.path().join("a").join("b").join("k.json"));
    }

    #[test]
    fn corrupt_values_load_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path());
        storage.save_raw("prefs", "not json");
        assert_eq!(storage.load::<Prefs>("prefs"), None);
    }
}
