use crate::objectstore::{ObjectEntry, ObjectStore, StoreError};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf, MAIN_SEPARATOR_STR},
};

/// An object store backed by the local filesystem. Keys are interpreted as
/// paths relative to the root directory; listing prefixes name directories.
/// Used in tests and for replaying shard archives from disk.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> LocalObjectStore {
        LocalObjectStore { root }
    }

    /// Callers construct keys using "/" as a separator; convert to a
    /// relative path valid for the current platform.
    fn relative_path(key: &str) -> PathBuf {
        PathBuf::from(key.replace('/', MAIN_SEPARATOR_STR))
    }
}

impl ObjectStore for LocalObjectStore {
    fn path(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let dir = self.root.join(LocalObjectStore::relative_path(prefix));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // A day with no shards has no directory either.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::List {
                    prefix: prefix.to_owned(),
                    detail: e.to_string(),
                })
            }
        };

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::List {
                prefix: prefix.to_owned(),
                detail: e.to_string(),
            })?;
            let metadata = entry.metadata().map_err(|e| StoreError::List {
                prefix: prefix.to_owned(),
                detail: e.to_string(),
            })?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let mut key = prefix.to_owned();
            if !key.is_empty() && !key.ends_with('/') {
                key.push('/');
            }
            key.push_str(&file_name);
            objects.push(ObjectEntry {
                key,
                size: metadata.len(),
            });
        }
        // read_dir order is platform-dependent; keep listings stable.
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn fetch(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        let source = self.root.join(LocalObjectStore::relative_path(key));
        fs::copy(&source, dest).map_err(|e| StoreError::Fetch {
            key: key.to_owned(),
            detail: format!("{}: {}", source.display(), e),
        })
    }
}
