use cumulus_crypt::hash::Hash;
use thiserror::Error;

/// Errors of the file lifecycle engine.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Content digest differs from the expected value. The local copy has
    /// been purged and the owning fragment, if any, marked dirty.
    #[error("content hash {actual} does not match the expected hash {expected}")]
    HashMismatch { expected: Hash, actual: Hash },

    /// The decoder had fewer than `k` surviving payloads.
    #[error("not enough intact fragments to reconstruct: {0}")]
    Reconstruction(String),

    /// The placement planner exhausted every hub, including the relaxed
    /// candidate set.
    #[error("no remote storage location found")]
    NoStorageLocation,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A blob-client call did not complete within the configured timeout.
    #[error("connection to the storage hub timed out")]
    Timeout,

    #[error("object does not exist")]
    DoesNotExist,

    #[error("multiple objects found")]
    MultipleFound,

    /// Another repair process holds the reconstruction lock.
    #[error("another repair process is running")]
    RepairLocked,

    #[error("unsupported encoding {0:?}")]
    UnsupportedEncoding(String),

    /// Shard set handed to the coder violates its contract. A bug, not a
    /// runtime condition.
    #[error("invalid shard set: {0}")]
    InvalidShards(String),

    #[error("invalid catalog record: {0}")]
    InvalidRecord(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("staging i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single remote-storage operation.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The hub refused the write for lack of space; `available_bytes` is
    /// the hub's own pre-write figure.
    #[error("insufficient storage space at the hub ({available_bytes} bytes available)")]
    InsufficientSpace { available_bytes: u64 },

    #[error("upload to the hub failed")]
    UploadFailed,

    #[error("download from the hub failed")]
    DownloadFailed,

    #[error("delete at the hub failed")]
    DeleteFailed,
}

impl CoreError {
    /// True for failures that degrade a single fragment rather than the
    /// whole operation: digest mismatches, remote errors and timeouts.
    pub(crate) fn degrades_fragment(&self) -> bool {
        matches!(
            self,
            CoreError::HashMismatch { .. } | CoreError::Remote(_) | CoreError::Timeout
        )
    }
}
