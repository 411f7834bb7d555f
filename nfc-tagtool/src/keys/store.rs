//! Persistent key database
//!
//! Keys live in a flat text file, one per line. The set is loaded lazily on
//! first access and iterated in sorted order, so brute force sequences are
//! reproducible.

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{is_valid_hex_key, normalize_key, KeyError, MifareKey, DEFAULT_KEYS};
use crate::storage::Storage;

const FILE_HEADER: [&str; 4] = [
    "# MIFARE CLASSIC KEYS DATABASE",
    "# One key per line (12 hex chars = 6 bytes)",
    "#",
    "# STANDARD KEYS",
];

const FILE_FOOTER: [&str; 2] = ["#", "# Add your custom keys below"];

#[derive(Default)]
struct KeyState {
    keys: BTreeSet<String>,
    loaded: bool,
}

/// Key database backed by a text file in a [`Storage`]
///
/// Lookups take a shared lock once loaded. `add`, `remove` and `clear`
/// hold the exclusive lock across their file update, so concurrent edits
/// are serialized.
pub struct KeyStore {
    storage: Arc<dyn Storage>,
    path: String,
    state: RwLock<KeyState>,
}

impl KeyStore {
    pub const DEFAULT_FILE: &'static str = "mifare_keys.txt";

    /// Create a key store for the file at `path` in `storage`
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            state: RwLock::new(KeyState::default()),
        }
    }

    /// Path of the key file inside the storage
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Prepare the key file directory and load the keys
    pub fn begin(&self) -> Result<usize, KeyError> {
        if let Some((dir, _)) = self.path.rsplit_once('/') {
            if !self.storage.exists(dir) {
                self.storage
                    .create_dir_all(dir)
                    .map_err(|e| KeyError::Storage(e.to_string()))?;
                debug!("Created key directory {}", dir);
            }
        }
        self.ensure_loaded();
        let count = self.len();
        info!("Key database ready with {} keys", count);
        Ok(count)
    }

    /// Load the keys if they have not been loaded yet
    ///
    /// A missing file is seeded with the default keys.
    pub fn ensure_loaded(&self) {
        if self.state.read().loaded {
            return;
        }
        let mut state = self.state.write();
        if state.loaded {
            return;
        }

        if self.storage.exists(&self.path) {
            debug!("Loading keys from {}", self.path);
            state.keys = self.load_from_file();
        } else {
            info!("Keys file not found, creating default database");
            state.keys = DEFAULT_KEYS.iter().map(|k| k.to_string()).collect();
            self.save_locked(&state.keys);
        }
        state.loaded = true;
    }

    fn load_from_file(&self) -> BTreeSet<String> {
        let content = match self.storage.read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read keys file {}: {}", self.path, e);
                return BTreeSet::new();
            }
        };

        let mut keys = BTreeSet::new();
        let mut skipped = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            let key = normalize_key(line);
            if is_valid_hex_key(&key) {
                keys.insert(key);
            } else {
                warn!("Invalid key skipped: {}", line);
                skipped += 1;
            }
        }

        if skipped > 0 {
            info!("Loaded {} keys ({} invalid skipped)", keys.len(), skipped);
        } else {
            info!("Loaded {} keys", keys.len());
        }
        keys
    }

    fn render(keys: &BTreeSet<String>) -> String {
        let mut out = String::new();
        for line in FILE_HEADER.iter().copied().chain(keys.iter().map(String::as_str)).chain(FILE_FOOTER) {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn save_locked(&self, keys: &BTreeSet<String>) -> bool {
        match self.storage.write(&self.path, &Self::render(keys)) {
            Ok(()) => {
                info!("Saved {} keys to file", keys.len());
                true
            }
            Err(e) => {
                warn!("Failed to save keys to {}: {}", self.path, e);
                false
            }
        }
    }

    /// Rewrite the whole key file from the in-memory set
    pub fn save(&self) -> bool {
        self.ensure_loaded();
        let state = self.state.read();
        self.save_locked(&state.keys)
    }

    /// Add a key, appending it to the file
    pub fn add(&self, key: &str) -> Result<String, KeyError> {
        let key = normalize_key(key);
        if !is_valid_hex_key(&key) {
            return Err(KeyError::InvalidFormat(key));
        }

        self.ensure_loaded();
        let mut state = self.state.write();
        if state.keys.contains(&key) {
            return Err(KeyError::Duplicate(key));
        }
        state.keys.insert(key.clone());

        let persisted = if !self.storage.exists(&self.path) {
            debug!("Keys file missing, writing full database");
            self.save_locked(&state.keys)
        } else if let Err(e) = self.storage.append(&self.path, &format!("{}\n", key)) {
            warn!("Append failed ({}), rewriting full file", e);
            self.save_locked(&state.keys)
        } else {
            true
        };

        if !persisted {
            // keep memory in step with the file
            state.keys.remove(&key);
            return Err(KeyError::Storage(format!("failed to write {}", self.path)));
        }
        info!("Key added: {}", key);
        Ok(key)
    }

    /// Remove a key and rewrite the whole file
    pub fn remove(&self, key: &str) -> Result<(), KeyError> {
        let key = normalize_key(key);
        self.ensure_loaded();
        let mut state = self.state.write();
        if !state.keys.remove(&key) {
            return Err(KeyError::NotFound(key));
        }
        if !self.save_locked(&state.keys) {
            return Err(KeyError::Storage(format!("failed to rewrite {}", self.path)));
        }
        info!("Key removed: {}", key);
        Ok(())
    }

    /// Check if a key is in the database
    pub fn has_key(&self, key: &str) -> bool {
        self.ensure_loaded();
        self.state.read().keys.contains(&normalize_key(key))
    }

    /// All keys as canonical strings, in iteration order
    pub fn keys(&self) -> Vec<String> {
        self.ensure_loaded();
        self.state.read().keys.iter().cloned().collect()
    }

    /// All keys as bytes, in iteration order
    pub fn key_bytes(&self) -> Vec<MifareKey> {
        self.keys().iter().filter_map(|k| k.parse().ok()).collect()
    }

    pub fn len(&self) -> usize {
        self.ensure_loaded();
        self.state.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the key file and forget the loaded set
    ///
    /// The next access reloads, which seeds the defaults again.
    pub fn clear(&self) {
        let mut state = self.state.write();
        if self.storage.exists(&self.path) {
            if let Err(e) = self.storage.remove(&self.path) {
                warn!("Failed to delete keys file {}: {}", self.path, e);
            }
        }
        state.keys.clear();
        state.loaded = false;
        info!("Key database cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsStorage, MemoryStorage};
    use tempfile::TempDir;

    fn memory_store() -> (Arc<MemoryStorage>, KeyStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = KeyStore::new(storage.clone(), KeyStore::DEFAULT_FILE);
        (storage, store)
    }

    #[test]
    fn test_fresh_install_has_five_defaults() {
        let (storage, store) = memory_store();
        store.ensure_loaded();
        let mut expected: Vec<String> = DEFAULT_KEYS.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(store.keys(), expected);
        assert!(storage.exists(KeyStore::DEFAULT_FILE));
    }

    #[test]
    fn test_default_file_layout() {
        let (storage, store) = memory_store();
        store.ensure_loaded();
        let content = storage.read_to_string(KeyStore::DEFAULT_FILE).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "# MIFARE CLASSIC KEYS DATABASE");
        assert_eq!(lines[3], "# STANDARD KEYS");
        assert_eq!(lines[4], "000000000000");
        assert_eq!(lines[8], "FFFFFFFFFFFF");
        assert_eq!(lines[10], "# Add your custom keys below");
    }

    #[test]
    fn test_load_skips_comments_and_bad_lines() {
        let (storage, store) = memory_store();
        storage
            .write(
                KeyStore::DEFAULT_FILE,
                "# comment\n\n// other comment\nff ff ff ff ff ff\nnot-a-key\n112233445566\n112233445566\n",
            )
            .unwrap();
        assert_eq!(store.keys(), vec!["112233445566", "FFFFFFFFFFFF"]);
    }

    #[test]
    fn test_add_key() {
        let (storage, store) = memory_store();
        assert_eq!(store.add("12 34 56 ab cd ef").unwrap(), "123456ABCDEF");
        assert!(store.has_key("123456abcdef"));
        assert_eq!(store.len(), 6);
        let content = storage.read_to_string(KeyStore::DEFAULT_FILE).unwrap();
        assert!(content.ends_with("123456ABCDEF\n"));
    }

    #[test]
    fn test_add_rejects_invalid_and_duplicate() {
        let (_storage, store) = memory_store();
        assert_eq!(
            store.add("12345"),
            Err(KeyError::InvalidFormat("12345".to_string()))
        );
        assert_eq!(
            store.add("ffffffffffff"),
            Err(KeyError::Duplicate("FFFFFFFFFFFF".to_string()))
        );
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_remove_rewrites_file() {
        let (storage, store) = memory_store();
        store.add("123456ABCDEF").unwrap();
        store.remove("d3f7 d3f7 d3f7").unwrap();
        assert!(!store.has_key("D3F7D3F7D3F7"));
        let content = storage.read_to_string(KeyStore::DEFAULT_FILE).unwrap();
        assert!(!content.contains("D3F7D3F7D3F7"));
        assert!(content.contains("123456ABCDEF"));
        assert!(content.starts_with("# MIFARE CLASSIC KEYS DATABASE"));
        assert_eq!(store.remove("D3F7D3F7D3F7"), Err(KeyError::NotFound("D3F7D3F7D3F7".to_string())));
    }

    #[test]
    fn test_clear_forces_reload_of_defaults() {
        let (storage, store) = memory_store();
        store.add("123456ABCDEF").unwrap();
        store.clear();
        assert!(!storage.exists(KeyStore::DEFAULT_FILE));
        assert_eq!(store.len(), 5);
        assert!(!store.has_key("123456ABCDEF"));
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(Some(temp_dir.path().to_path_buf())));

        let store = KeyStore::new(storage.clone(), "keys/mifare_keys.txt");
        assert_eq!(store.begin().unwrap(), 5);
        store.add("A1B2C3D4E5F6").unwrap();

        let reopened = KeyStore::new(storage, "keys/mifare_keys.txt");
        assert!(reopened.has_key("A1B2C3D4E5F6"));
        assert_eq!(reopened.len(), 6);
    }

    /// Serves reads from an inner store and rejects every write
    struct ReadOnlyStorage {
        inner: MemoryStorage,
    }

    fn denied() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read only")
    }

    impl Storage for ReadOnlyStorage {
        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }
        fn read_to_string(&self, path: &str) -> std::io::Result<String> {
            self.inner.read_to_string(path)
        }
        fn write(&self, _path: &str, _contents: &str) -> std::io::Result<()> {
            Err(denied())
        }
        fn append(&self, _path: &str, _contents: &str) -> std::io::Result<()> {
            Err(denied())
        }
        fn remove(&self, _path: &str) -> std::io::Result<()> {
            Err(denied())
        }
        fn create_dir_all(&self, _path: &str) -> std::io::Result<()> {
            Err(denied())
        }
        fn list(&self, dir: &str) -> std::io::Result<Vec<String>> {
            self.inner.list(dir)
        }
    }

    #[test]
    fn test_add_fails_when_missing_file_cannot_be_written() {
        let storage = Arc::new(ReadOnlyStorage { inner: MemoryStorage::new() });
        let store = KeyStore::new(storage.clone(), KeyStore::DEFAULT_FILE);

        assert!(matches!(store.add("112233445566"), Err(KeyError::Storage(_))));
        assert!(!store.has_key("112233445566"));
        assert_eq!(store.len(), 5);
        assert!(!storage.exists(KeyStore::DEFAULT_FILE));
    }

    #[test]
    fn test_add_fails_when_existing_file_cannot_be_written() {
        let inner = MemoryStorage::new();
        inner.write(KeyStore::DEFAULT_FILE, "FFFFFFFFFFFF\n").unwrap();
        let store = KeyStore::new(Arc::new(ReadOnlyStorage { inner }), KeyStore::DEFAULT_FILE);

        assert!(matches!(store.add("112233445566"), Err(KeyError::Storage(_))));
        assert_eq!(store.keys(), vec!["FFFFFFFFFFFF"]);
    }

    #[test]
    fn test_key_bytes_order_is_stable() {
        let (_storage, store) = memory_store();
        let first = store.key_bytes();
        let second = store.key_bytes();
        assert_eq!(first, second);
        assert_eq!(first[0].to_string(), "000000000000");
        assert_eq!(first.len(), 5);
    }
}
