//! Hierarchical byte store for dump and key files
//!
//! Paths are `/` separated and relative to the store root. [`FsStorage`]
//! maps them onto a directory on disk, [`MemoryStorage`] keeps everything
//! in a map for dry runs and tests.

use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// Minimal file store the engines persist through
pub trait Storage: Send + Sync {
    /// Check if a file or directory exists
    fn exists(&self, path: &str) -> bool;

    /// Read a whole file as UTF-8 text
    fn read_to_string(&self, path: &str) -> io::Result<String>;

    /// Create or truncate a file
    fn write(&self, path: &str, contents: &str) -> io::Result<()>;

    /// Append to a file, creating it if needed
    fn append(&self, path: &str, contents: &str) -> io::Result<()>;

    /// Delete a file
    fn remove(&self, path: &str) -> io::Result<()>;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &str) -> io::Result<()>;

    /// Names of the files directly inside a directory, sorted
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;
}

/// Join a directory and a file name with `/`
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Storage rooted at a directory on the local filesystem
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Get the default storage directory
    pub fn default_root() -> PathBuf {
        // Check environment variable first
        if let Ok(path) = std::env::var("NFC_TAGTOOL_STORAGE_DIR") {
            return PathBuf::from(path);
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".nfc-tagtool");
        }
        PathBuf::from("/var/lib/nfc-tagtool")
    }

    /// Create a new store rooted at `root`, or at the default directory
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(Self::default_root),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    fn ensure_parent(&self, path: &PathBuf) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Storage for FsStorage {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.resolve(path))
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        let target = self.resolve(path);
        self.ensure_parent(&target)?;
        fs::write(&target, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&target, fs::Permissions::from_mode(0o644));
        }
        debug!("Wrote {:?}", target);
        Ok(())
    }

    fn append(&self, path: &str, contents: &str) -> io::Result<()> {
        let target = self.resolve(path);
        self.ensure_parent(&target)?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&target)?;
        file.write_all(contents.as_bytes())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        let target = self.resolve(path);
        fs::create_dir_all(&target)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&target, fs::Permissions::from_mode(0o755));
        }
        Ok(())
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let target = self.resolve(dir);
        if !target.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(target)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

/// Storage kept entirely in memory
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> String {
        path.split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        let state = self.state.lock();
        state.files.contains_key(&path) || state.dirs.contains(&path)
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        self.state
            .lock()
            .files
            .get(&Self::normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        self.state
            .lock()
            .files
            .insert(Self::normalize(path), contents.to_string());
        Ok(())
    }

    fn append(&self, path: &str, contents: &str) -> io::Result<()> {
        self.state
            .lock()
            .files
            .entry(Self::normalize(path))
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.state
            .lock()
            .files
            .remove(&Self::normalize(path))
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.state.lock().dirs.insert(Self::normalize(path));
        Ok(())
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = format!("{}/", Self::normalize(dir));
        let state = self.state.lock();
        Ok(state
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn Storage) {
        assert!(!store.exists("DUMPS/SRIX/a.srix"));
        store.create_dir_all("DUMPS/SRIX").unwrap();
        assert!(store.exists("DUMPS/SRIX"));

        store.write("DUMPS/SRIX/b.srix", "two").unwrap();
        store.write("DUMPS/SRIX/a.srix", "one").unwrap();
        store.append("DUMPS/SRIX/a.srix", "+more").unwrap();
        assert_eq!(store.read_to_string("DUMPS/SRIX/a.srix").unwrap(), "one+more");
        assert_eq!(store.list("DUMPS/SRIX").unwrap(), vec!["a.srix", "b.srix"]);

        store.remove("DUMPS/SRIX/b.srix").unwrap();
        assert!(!store.exists("DUMPS/SRIX/b.srix"));
        assert!(store.remove("DUMPS/SRIX/b.srix").is_err());
        assert!(store.list("DUMPS/MIFARE").unwrap().is_empty());
    }

    #[test]
    fn test_fs_storage() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStorage::new(Some(temp_dir.path().to_path_buf()));
        exercise(&store);
        assert!(temp_dir.path().join("DUMPS").join("SRIX").join("a.srix").exists());
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("DUMPS/SRIX", "a.srix"), "DUMPS/SRIX/a.srix");
        assert_eq!(join("DUMPS/SRIX/", "a.srix"), "DUMPS/SRIX/a.srix");
        assert_eq!(join("", "keys.txt"), "keys.txt");
    }
}
