//! Session store
//!
//! In-memory registry of upload sessions. The registry lock is held only
//! for lookup/insert/remove; each session's mutable state sits behind its
//! own mutex, so operations on different sessions never block each other.
//! Cancelled sessions are removed outright — a later command on that id
//! reports "session not found" rather than a distinguishable rejected
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::UploadConfig;

use super::staging::ChunkStaging;
use super::types::{SessionEvent, SessionState, UploadError, UploadSession};

/// Shared handle to one session's mutable state.
pub type SessionHandle = Arc<Mutex<UploadSession>>;

/// Registry of live upload sessions.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    config: UploadConfig,
}

impl SessionStore {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    // ========================================================================
    // Init
    // ========================================================================

    /// Create a session for a declared upload. Validates the extension
    /// allow-list and the chunk contract before anything is allocated.
    pub async fn init(
        &self,
        owner: Identity,
        file_name: &str,
        total_chunks: u32,
        chunk_size: u32,
    ) -> Result<String, UploadError> {
        let extension = extract_extension(file_name)
            .ok_or_else(|| UploadError::UnsupportedFileType("(no extension)".into()))?;
        if !self
            .inner
            .config
            .allowed_extensions
            .iter()
            .any(|e| e == &extension)
        {
            return Err(UploadError::UnsupportedFileType(extension));
        }

        if total_chunks == 0 || chunk_size == 0 {
            return Err(UploadError::InvalidChunkParameters(
                "total chunks and chunk size must be non-zero".into(),
            ));
        }
        let declared_size = total_chunks as u64 * chunk_size as u64;
        if declared_size > self.inner.config.max_file_size {
            return Err(UploadError::InvalidChunkParameters(format!(
                "declared size {} exceeds maximum {}",
                declared_size, self.inner.config.max_file_size
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = UploadSession::new(
            session_id.clone(),
            owner.clone(),
            file_name.to_string(),
            extension,
            total_chunks,
            chunk_size,
        );

        let mut sessions = self.inner.sessions.write().await;
        sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));

        tracing::info!(
            session_id = %session_id,
            user = %owner.username,
            file_name = %file_name,
            total_chunks = total_chunks,
            chunk_size = chunk_size,
            "created upload session"
        );

        Ok(session_id)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Fetch a session handle. The caller locks the handle for any state
    /// inspection or mutation.
    pub async fn lookup(&self, session_id: &str) -> Result<SessionHandle, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or(UploadError::SessionNotFound)
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    // ========================================================================
    // Pause / Resume / Cancel / Status
    // ========================================================================

    pub async fn pause(
        &self,
        session_id: &str,
        caller: &Identity,
    ) -> Result<(u32, u32), UploadError> {
        let handle = self.lookup(session_id).await?;
        let mut session = handle.lock().await;
        check_owner(&session, caller)?;
        apply_or_reject(&mut session, SessionEvent::Pause)?;

        tracing::info!(
            session_id = %session_id,
            received = session.received_count(),
            total = session.total_chunks,
            "upload paused"
        );
        Ok((session.received_count(), session.total_chunks))
    }

    pub async fn resume(
        &self,
        session_id: &str,
        caller: &Identity,
    ) -> Result<(u32, u32, Vec<u32>), UploadError> {
        let handle = self.lookup(session_id).await?;
        let mut session = handle.lock().await;
        check_owner(&session, caller)?;
        apply_or_reject(&mut session, SessionEvent::Resume)?;

        let missing = session.missing_chunks();
        tracing::info!(
            session_id = %session_id,
            received = session.received_count(),
            total = session.total_chunks,
            missing = missing.len(),
            "upload resumed"
        );
        Ok((session.received_count(), session.total_chunks, missing))
    }

    /// Cancel a session and forget it. The caller purges staging with the
    /// returned session id once this succeeds.
    pub async fn cancel(&self, session_id: &str, caller: &Identity) -> Result<(), UploadError> {
        let handle = self.lookup(session_id).await?;
        {
            let mut session = handle.lock().await;
            check_owner(&session, caller)?;
            apply_or_reject(&mut session, SessionEvent::Cancel)?;
        }

        let mut sessions = self.inner.sessions.write().await;
        sessions.remove(session_id);

        tracing::info!(session_id = %session_id, "upload cancelled");
        Ok(())
    }

    pub async fn status(
        &self,
        session_id: &str,
        caller: &Identity,
    ) -> Result<(&'static str, u32, u32), UploadError> {
        let handle = self.lookup(session_id).await?;
        let session = handle.lock().await;
        check_owner(&session, caller)?;
        Ok((
            session.state.wire_name(),
            session.received_count(),
            session.total_chunks,
        ))
    }

    // ========================================================================
    // Retention sweep
    // ========================================================================

    /// Evict terminal sessions past the retention window and non-terminal
    /// sessions idle past the timeout. Returns the evicted ids so the
    /// caller can purge their staging.
    pub async fn sweep(&self) -> Vec<String> {
        let retention = chrono::Duration::seconds(self.inner.config.retention_secs as i64);
        let idle_timeout = chrono::Duration::seconds(self.inner.config.idle_timeout_secs as i64);
        let now = Utc::now();

        // Snapshot the handles first. Session mutexes are held across
        // storage commits, so they must never be awaited while the
        // registry lock is held or a slow commit would stall every
        // unrelated init and lookup behind the sweeper.
        let snapshot: Vec<(String, SessionHandle)> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (id, handle) in snapshot {
            // A session busy with a commit is active; skip it this tick
            let Ok(session) = handle.try_lock() else {
                continue;
            };
            let age = now - session.updated_at;
            let expired = if session.state.is_terminal() {
                age > retention
            } else {
                age > idle_timeout
            };
            if expired {
                evicted.push(id);
            }
        }

        if !evicted.is_empty() {
            let mut sessions = self.inner.sessions.write().await;
            for id in &evicted {
                sessions.remove(id);
            }
            tracing::info!(count = evicted.len(), "swept expired upload sessions");
        }

        evicted
    }

    /// Spawn the background sweeper. Evicted sessions get their staged
    /// chunks purged.
    pub fn start_sweep_task(self, staging: Arc<dyn ChunkStaging>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                for id in self.sweep().await {
                    if let Err(e) = staging.purge(&id).await {
                        tracing::warn!(session_id = %id, "failed to purge staging: {}", e);
                    }
                }
            }
        })
    }
}

/// Commands addressed to a session another identity owns are reported as
/// "session not found" so session ids don't leak across identities.
pub fn check_owner(session: &UploadSession, caller: &Identity) -> Result<(), UploadError> {
    if session.owner.user_id != caller.user_id {
        return Err(UploadError::SessionNotFound);
    }
    Ok(())
}

fn apply_or_reject(
    session: &mut UploadSession,
    event: SessionEvent,
) -> Result<SessionState, UploadError> {
    session.apply(event).ok_or_else(|| {
        if session.state.is_terminal() {
            UploadError::SessionClosed
        } else {
            UploadError::InvalidTransition {
                state: session.state.wire_name(),
            }
        }
    })
}

fn extract_extension(file_name: &str) -> Option<String> {
    let dot = file_name.rfind('.')?;
    if dot == 0 || dot + 1 == file_name.len() {
        return None;
    }
    Some(file_name[dot..].to_ascii_lowercase())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: "user_1".into(),
            username: "alice".into(),
        }
    }

    fn bob() -> Identity {
        Identity {
            user_id: "user_2".into(),
            username: "bob".into(),
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(UploadConfig::default())
    }

    #[tokio::test]
    async fn test_init_rejects_unlisted_extension() {
        let result = store().init(alice(), "a.xyz", 3, 1024).await;
        assert!(matches!(result, Err(UploadError::UnsupportedFileType(_))));
    }

    #[tokio::test]
    async fn test_init_rejects_zero_chunk_parameters() {
        let s = store();
        assert!(matches!(
            s.init(alice(), "a.mp4", 0, 1024).await,
            Err(UploadError::InvalidChunkParameters(_))
        ));
        assert!(matches!(
            s.init(alice(), "a.mp4", 3, 0).await,
            Err(UploadError::InvalidChunkParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_oversized_declaration() {
        let config = UploadConfig {
            max_file_size: 1024,
            ..UploadConfig::default()
        };
        let s = SessionStore::new(config);
        assert!(matches!(
            s.init(alice(), "a.mp4", 3, 1024).await,
            Err(UploadError::InvalidChunkParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let s = store();
        let a = s.init(alice(), "a.mp4", 1, 1024).await.unwrap();
        let b = s.init(alice(), "b.mp4", 1, 1024).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(s.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_pause_then_resume_reports_missing() {
        let s = store();
        let id = s.init(alice(), "a.mp4", 5, 1024).await.unwrap();

        // Simulate two received chunks
        {
            let handle = s.lookup(&id).await.unwrap();
            let mut session = handle.lock().await;
            session.apply(SessionEvent::ChunkAccepted);
            session.mark_received(0);
            session.mark_received(1);
        }

        let (received, total) = s.pause(&id, &alice()).await.unwrap();
        assert_eq!((received, total), (2, 5));

        let (received, total, missing) = s.resume(&id, &alice()).await.unwrap();
        assert_eq!((received, total), (2, 5));
        assert_eq!(missing, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_resume_fresh_session_rejected() {
        let s = store();
        let id = s.init(alice(), "a.mp4", 3, 1024).await.unwrap();
        assert!(matches!(
            s.resume(&id, &alice()).await,
            Err(UploadError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_forgets_session() {
        let s = store();
        let id = s.init(alice(), "a.mp4", 3, 1024).await.unwrap();
        s.cancel(&id, &alice()).await.unwrap();

        assert!(matches!(
            s.status(&id, &alice()).await,
            Err(UploadError::SessionNotFound)
        ));
        assert!(matches!(
            s.cancel(&id, &alice()).await,
            Err(UploadError::SessionNotFound)
        ));
        assert_eq!(s.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_foreign_owner_sees_session_not_found() {
        let s = store();
        let id = s.init(alice(), "a.mp4", 3, 1024).await.unwrap();
        assert!(matches!(
            s.status(&id, &bob()).await,
            Err(UploadError::SessionNotFound)
        ));
        assert!(matches!(
            s.cancel(&id, &bob()).await,
            Err(UploadError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let s = store();
        assert!(matches!(
            s.status("missing", &alice()).await,
            Err(UploadError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sweep_does_not_block_unrelated_sessions() {
        let s = store();
        let busy = s.init(alice(), "slow.mp4", 3, 1024).await.unwrap();

        // Hold the busy session's mutex as a long-running commit would
        let handle = s.lookup(&busy).await.unwrap();
        let guard = handle.lock().await;

        let sweeper = s.clone();
        let sweep = tokio::spawn(async move { sweeper.sweep().await });

        // Registry writes must go through while the sweeper runs
        let init = tokio::time::timeout(
            Duration::from_millis(500),
            s.init(alice(), "other.mp4", 3, 1024),
        )
        .await;
        assert!(init.is_ok(), "init of an unrelated session stalled behind the sweeper");

        drop(guard);
        let evicted = sweep.await.unwrap();
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_extract_extension() {
        assert_eq!(extract_extension("a.MP4"), Some(".mp4".to_string()));
        assert_eq!(extract_extension("archive.tar.gz"), Some(".gz".to_string()));
        assert_eq!(extract_extension("noext"), None);
        assert_eq!(extract_extension(".hidden"), None);
        assert_eq!(extract_extension("trailing."), None);
    }
}
