//! Chunk staging
//!
//! Holds chunk slots between receipt and finalize. A slot for a given
//! (session, index) pair is written at most once: the receipt set is
//! consulted before any write, and the filesystem backend additionally
//! refuses to overwrite an existing slot (first-writer-wins).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::UploadError;

// ============================================================================
// Staging trait
// ============================================================================

/// Backend for staged chunk slots.
#[async_trait::async_trait]
pub trait ChunkStaging: Send + Sync {
    /// Persist the bytes for one chunk slot.
    async fn store(&self, session_id: &str, chunk_index: u32, data: &[u8])
        -> Result<(), UploadError>;

    /// Read one staged chunk back.
    async fn read(&self, session_id: &str, chunk_index: u32) -> Result<Vec<u8>, UploadError>;

    /// Concatenate all staged chunks for a session in ascending index order.
    async fn assemble(&self, session_id: &str, total_chunks: u32) -> Result<Vec<u8>, UploadError>;

    /// Drop every slot belonging to a session. Returns the number removed.
    async fn purge(&self, session_id: &str) -> Result<usize, UploadError>;
}

// ============================================================================
// Local filesystem staging
// ============================================================================

/// Filesystem-backed staging under `<base>/chunks/<session>/<index>.chunk`.
pub struct LocalChunkStaging {
    base_path: PathBuf,
}

impl LocalChunkStaging {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join("chunks").join(session_id)
    }

    fn slot_path(&self, session_id: &str, chunk_index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{:08}.chunk", chunk_index))
    }
}

#[async_trait::async_trait]
impl ChunkStaging for LocalChunkStaging {
    async fn store(
        &self,
        session_id: &str,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let path = self.slot_path(session_id, chunk_index);
        if path.exists() {
            // Slot already written; first writer wins
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::Staging(e.to_string()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| UploadError::Staging(e.to_string()))
    }

    async fn read(&self, session_id: &str, chunk_index: u32) -> Result<Vec<u8>, UploadError> {
        let path = self.slot_path(session_id, chunk_index);
        tokio::fs::read(&path)
            .await
            .map_err(|e| UploadError::Staging(format!("failed to read chunk slot: {}", e)))
    }

    async fn assemble(&self, session_id: &str, total_chunks: u32) -> Result<Vec<u8>, UploadError> {
        let mut result = Vec::new();
        for index in 0..total_chunks {
            let chunk = self.read(session_id, index).await?;
            result.extend_from_slice(&chunk);
        }
        Ok(result)
    }

    async fn purge(&self, session_id: &str) -> Result<usize, UploadError> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| UploadError::Staging(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UploadError::Staging(e.to_string()))?
        {
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(|e| UploadError::Staging(e.to_string()))?;
            count += 1;
        }
        let _ = tokio::fs::remove_dir(&dir).await;

        Ok(count)
    }
}

// ============================================================================
// In-memory staging
// ============================================================================

/// Memory-backed staging for tests and development.
#[derive(Default)]
pub struct MemoryChunkStaging {
    slots: RwLock<HashMap<String, HashMap<u32, Vec<u8>>>>,
}

impl MemoryChunkStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl ChunkStaging for MemoryChunkStaging {
    async fn store(
        &self,
        session_id: &str,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let mut slots = self.slots.write().await;
        slots
            .entry(session_id.to_string())
            .or_default()
            .entry(chunk_index)
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    async fn read(&self, session_id: &str, chunk_index: u32) -> Result<Vec<u8>, UploadError> {
        let slots = self.slots.read().await;
        slots
            .get(session_id)
            .and_then(|s| s.get(&chunk_index))
            .cloned()
            .ok_or_else(|| UploadError::Staging(format!("missing chunk slot {}", chunk_index)))
    }

    async fn assemble(&self, session_id: &str, total_chunks: u32) -> Result<Vec<u8>, UploadError> {
        let slots = self.slots.read().await;
        let session = slots
            .get(session_id)
            .ok_or_else(|| UploadError::Staging("no staged chunks for session".into()))?;
        let mut result = Vec::new();
        for index in 0..total_chunks {
            let chunk = session
                .get(&index)
                .ok_or_else(|| UploadError::Staging(format!("missing chunk slot {}", index)))?;
            result.extend_from_slice(chunk);
        }
        Ok(result)
    }

    async fn purge(&self, session_id: &str) -> Result<usize, UploadError> {
        let mut slots = self.slots.write().await;
        Ok(slots.remove(session_id).map(|s| s.len()).unwrap_or(0))
    }
}

// ============================================================================
// Tests
// ============================================================================
