//! In-memory object store for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ObjectStore, StorageError};

/// Object store that keeps committed files in a map. A failure toggle lets
/// tests exercise the commit-retry path.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_commits: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// When set, every commit fails with [`StorageError::CommitFailed`].
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn commit(
        &self,
        data: Vec<u8>,
        owner_id: &str,
        file_name: &str,
    ) -> Result<String, StorageError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::CommitFailed("simulated outage".into()));
        }
        let key = format!("{}/{}", owner_id, file_name);
        self.objects.write().await.insert(key.clone(), data);
        Ok(key)
    }
}
