mod local;
mod s3;

use std::{fmt::Debug, path::Path};

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

/// One object visible under a listing prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Errors that can arise talking to an object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("listing objects under {prefix}: {detail}")]
    List { prefix: String, detail: String },
    #[error("fetching {key}: {detail}")]
    Fetch { key: String, detail: String },
    #[error("object {0} has no body")]
    NoBody(String),
    #[error("writing {1}: {0}")]
    Io(std::io::Error, String),
}

/// An object store holds the CSV shards of one or more file families. The
/// concrete wire protocol is not this crate's concern: an implementation
/// only needs to enumerate objects under a prefix and fetch one object into
/// a local file.
///
/// Implementations must be shareable across the download worker threads of
/// a single extractor.
pub trait ObjectStore: Debug + Send + Sync {
    /// A human-readable path for log records.
    fn path(&self) -> String;

    /// Lists the objects whose keys start with `prefix`. A prefix with no
    /// objects behind it is an empty listing, not an error.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError>;

    /// Downloads one object into `dest`, returning the number of bytes
    /// written.
    fn fetch(&self, key: &str, dest: &Path) -> Result<u64, StoreError>;
}
