//! Durable object storage collaborators
//!
//! The upload engine hands finalized files to an [`ObjectStore`] and gets
//! back the storage key. S3-compatible backends (MinIO, R2, B2, AWS) are
//! the production target; the in-memory store backs tests and dev runs.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use thiserror::Error;

/// Storage collaborator errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage connection failed: {0}")]
    ConnectionFailed(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),
}

/// Destination for finalized uploads.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Commit an assembled file and return the storage key it now lives
    /// under. Keys are derived from the owning identity and file name.
    async fn commit(
        &self,
        data: Vec<u8>,
        owner_id: &str,
        file_name: &str,
    ) -> Result<String, StorageError>;
}
