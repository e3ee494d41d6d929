//! File-backed bookmark persistence.

use super::Bookmark;
use crate::error::{Result, TailError};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persists the last bookmark per channel in a JSON file.
///
/// Writes go to a temporary sibling and are renamed over the target, so a
/// crash leaves either the old or the new file. A `.lock` file held for the
/// store's lifetime keeps other processes out.
pub struct FileBookmarkStore {
    path: PathBuf,
    _lock_file: File,
    bookmarks: Mutex<BTreeMap<String, Bookmark>>,
}

impl FileBookmarkStore {
    /// Open the store at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        let bookmarks = if path.exists() {
            let data = fs::read(&path)?;
            if data.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&data)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            _lock_file: lock_file,
            bookmarks: Mutex::new(bookmarks),
        })
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(PathBuf::from(lock_path))?;
        file.try_lock_exclusive().map_err(|_| {
            TailError::InvalidConfig(format!(
                "bookmark store {} is locked by another process",
                path.display()
            ))
        })?;
        Ok(file)
    }

    pub fn load(&self, channel: &str) -> Option<Bookmark> {
        self.bookmarks.lock().get(channel).cloned()
    }

    /// Record and durably write the bookmark for `channel`.
    pub fn save(&self, channel: &str, bookmark: &Bookmark) -> Result<()> {
        let mut bookmarks = self.bookmarks.lock();
        bookmarks.insert(channel.to_string(), bookmark.clone());
        self.persist(&bookmarks)?;
        debug!(channel, path = %self.path.display(), "bookmark saved");
        Ok(())
    }

    pub fn remove(&self, channel: &str) -> Result<bool> {
        let mut bookmarks = self.bookmarks.lock();
        let removed = bookmarks.remove(channel).is_some();
        if removed {
            self.persist(&bookmarks)?;
        }
        Ok(removed)
    }

    pub fn channels(&self) -> Vec<String> {
        self.bookmarks.lock().keys().cloned().collect()
    }

    fn persist(&self, bookmarks: &BTreeMap<String, Bookmark>) -> Result<()> {
        let data = serde_json::to_vec_pretty(bookmarks)?;

        let mut tmp_path = self.path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookmarks.json");

        {
            let store = FileBookmarkStore::open(&path).unwrap();
            store
                .save("Application", &Bookmark::from_xml("<BookmarkList/>"))
                .unwrap();
            store
                .save("System", &Bookmark::from_xml("<BookmarkList></BookmarkList>"))
                .unwrap();
        }

        let store = FileBookmarkStore::open(&path).unwrap();
        assert_eq!(
            store.load("Application"),
            Some(Bookmark::from_xml("<BookmarkList/>"))
        );
        assert_eq!(store.channels(), vec!["Application", "System"]);
        assert!(store.load("Security").is_none());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileBookmarkStore::open(dir.path().join("b.json")).unwrap();

        store.save("Application", &Bookmark::from_xml("x")).unwrap();
        assert!(store.remove("Application").unwrap());
        assert!(!store.remove("Application").unwrap());
        assert!(store.load("Application").is_none());
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.json");

        let _first = FileBookmarkStore::open(&path).unwrap();
        let second = FileBookmarkStore::open(&path);
        assert!(matches!(second, Err(TailError::InvalidConfig(_))));
    }
}
