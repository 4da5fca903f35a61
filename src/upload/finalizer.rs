//! Finalizer
//!
//! Turns a complete set of staged chunks into a committed object. Runs
//! synchronously inside the last chunk's request so the chunk response
//! doubles as the completion acknowledgment. A failed commit leaves the
//! session in Uploading with its staging intact; redelivering any chunk of
//! the (already full) set re-attempts the commit.

use std::sync::Arc;

use crate::storage::ObjectStore;

use super::staging::ChunkStaging;
use super::types::{SessionEvent, SessionState, UploadError, UploadSession};

pub struct Finalizer {
    staging: Arc<dyn ChunkStaging>,
    store: Arc<dyn ObjectStore>,
}

impl Finalizer {
    pub fn new(staging: Arc<dyn ChunkStaging>, store: Arc<dyn ObjectStore>) -> Self {
        Self { staging, store }
    }

    /// Assemble, commit, and complete. The caller holds the session lock,
    /// which is what guarantees at most one finalize per session.
    pub async fn finalize(
        &self,
        session: &mut UploadSession,
    ) -> Result<(String, u64), UploadError> {
        debug_assert!(session.is_complete_set());

        let data = self
            .staging
            .assemble(&session.session_id, session.total_chunks)
            .await?;
        let final_size = data.len() as u64;

        let storage_key = self
            .store
            .commit(data, &session.owner.user_id, &session.file_name)
            .await
            .map_err(|e| {
                tracing::warn!(
                    session_id = %session.session_id,
                    "storage commit failed, session stays retryable: {}",
                    e
                );
                UploadError::StorageCommitFailed(e.to_string())
            })?;

        session.storage_key = Some(storage_key.clone());
        session.final_size = Some(final_size);
        session.apply(SessionEvent::Finalized);
        debug_assert_eq!(session.state, SessionState::Complete);

        // Commit is durable; a failed purge only leaks staging space
        if let Err(e) = self.staging.purge(&session.session_id).await {
            tracing::warn!(
                session_id = %session.session_id,
                "failed to purge staging after commit: {}",
                e
            );
        }

        tracing::info!(
            session_id = %session.session_id,
            file_name = %session.file_name,
            storage_key = %storage_key,
            final_size = final_size,
            "upload finalized"
        );

        Ok((storage_key, final_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::storage::MemoryObjectStore;
    use crate::upload::staging::MemoryChunkStaging;

    fn full_session(total: u32) -> UploadSession {
        let mut session = UploadSession::new(
            "sess".into(),
            Identity {
                user_id: "user_1".into(),
                username: "alice".into(),
            },
            "a.mp4".into(),
            ".mp4".into(),
            total,
            8,
        );
        session.apply(SessionEvent::ChunkAccepted);
        for i in 0..total {
            session.mark_received(i);
        }
        session
    }

    #[tokio::test]
    async fn test_finalize_commits_in_order_and_completes() {
        let staging = MemoryChunkStaging::shared();
        let store = MemoryObjectStore::shared();
        staging.store("sess", 1, b"world").await.unwrap();
        staging.store("sess", 0, b"hello ").await.unwrap();

        let finalizer = Finalizer::new(staging.clone(), store.clone());
        let mut session = full_session(2);

        let (key, size) = finalizer.finalize(&mut session).await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(session.state, SessionState::Complete);
        assert_eq!(session.storage_key.as_deref(), Some(key.as_str()));
        assert_eq!(session.final_size, Some(11));
        assert_eq!(store.get(&key).await.unwrap(), b"hello world");

        // Staging released
        assert!(staging.read("sess", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_session_retryable() {
        let staging = MemoryChunkStaging::shared();
        let store = MemoryObjectStore::shared();
        staging.store("sess", 0, b"data").await.unwrap();
        store.set_fail_commits(true);

        let finalizer = Finalizer::new(staging.clone(), store.clone());
        let mut session = full_session(1);

        let err = finalizer.finalize(&mut session).await.unwrap_err();
        assert!(matches!(err, UploadError::StorageCommitFailed(_)));
        assert_eq!(session.state, SessionState::Uploading);
        assert!(session.storage_key.is_none());
        // Chunks are not lost
        assert_eq!(staging.read("sess", 0).await.unwrap(), b"data");

        // Retry succeeds once storage recovers
        store.set_fail_commits(false);
        let (_, size) = finalizer.finalize(&mut session).await.unwrap();
        assert_eq!(size, 4);
        assert_eq!(session.state, SessionState::Complete);
    }
}
