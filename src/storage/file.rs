use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::Backend;
use super::error::StorageError;

/// Durable backend persisting every key into a single JSON object on disk.
///
/// Each mutation rewrites the whole file through a temporary sibling and a rename, so a crash
/// mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileBackend {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        // The guarded unit carries no data, so a poisoned lock is safe to reuse.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        mutate(&mut entries);
        self.persist(&entries)
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.update(BTreeMap::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("courier-{name}-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn values_survive_a_new_instance() {
        let path = scratch_path("persist");

        FileBackend::new(&path).set("auth_token", "abc").unwrap();
        let reopened = FileBackend::new(&path);

        assert_eq!(reopened.get("auth_token").unwrap().as_deref(), Some("abc"));

        reopened.clear().unwrap();
        assert_eq!(reopened.get("auth_token").unwrap(), None);
        _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let path = scratch_path("corrupt");
        fs::write(&path, b"{not json").unwrap();

        let backend = FileBackend::new(&path);

        assert!(
            matches!(backend.get("anything"), Err(StorageError::Serde(_))),
            "corrupt contents should surface as a serde error"
        );
        _ = fs::remove_file(path);
    }

    #[test]
    fn missing_parent_directory_fails_writes() {
        let path = std::env::temp_dir()
            .join(format!("courier-missing-{}", uuid::Uuid::new_v4()))
            .join("store.json");

        let backend = FileBackend::new(path);

        assert!(
            matches!(backend.set("k", "v"), Err(StorageError::Io(_))),
            "writing under a missing directory should fail"
        );
    }
}
