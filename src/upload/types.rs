//! Upload session data model and state machine

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::auth::Identity;

// ============================================================================
// Session state machine
// ============================================================================

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Uploading,
    Paused,
    Complete,
    Cancelled,
}

impl SessionState {
    /// Name reported in STATUS responses.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SessionState::Initialized => "initialized",
            SessionState::Uploading => "uploading",
            SessionState::Paused => "paused",
            SessionState::Complete => "completed",
            SessionState::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Cancelled)
    }
}

/// Events that drive session state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chunk was accepted into the receipt set. Arriving chunks are
    /// evidence the client resumed, so this also moves Paused to Uploading.
    ChunkAccepted,
    Pause,
    Resume,
    Cancel,
    /// Finalize committed the assembled file to storage.
    Finalized,
}

/// Transition table: `(current state, event) -> new state`, or `None` when
/// the event is not accepted in that state.
pub fn transition(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent::*;
    use SessionState::*;

    match (state, event) {
        (Initialized | Uploading | Paused, ChunkAccepted) => Some(Uploading),
        (Initialized | Uploading | Paused, Pause) => Some(Paused),
        (Uploading | Paused, Resume) => Some(Uploading),
        (Initialized | Uploading | Paused, Cancel) => Some(Cancelled),
        (Uploading, Finalized) => Some(Complete),
        // Complete and Cancelled are terminal
        _ => None,
    }
}

// ============================================================================
// Session
// ============================================================================

/// One file upload attempt.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Opaque unique id, generated at init
    pub session_id: String,

    /// Identity resolved from the auth token at init
    pub owner: Identity,

    /// Declared file name and its (lowercased) extension
    pub file_name: String,
    pub file_extension: String,

    /// Chunk contract declared by the client; never re-derived server-side
    pub total_chunks: u32,
    pub chunk_size: u32,

    /// Indices received so far; only ever holds values < `total_chunks`
    pub received: HashSet<u32>,

    pub state: SessionState,

    /// Populated on the transition to Complete
    pub storage_key: Option<String>,
    pub final_size: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        session_id: String,
        owner: Identity,
        file_name: String,
        file_extension: String,
        total_chunks: u32,
        chunk_size: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            owner,
            file_name,
            file_extension,
            total_chunks,
            chunk_size,
            received: HashSet::new(),
            state: SessionState::Initialized,
            storage_key: None,
            final_size: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn is_complete_set(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    /// Complement of the receipt set in `[0, total_chunks)`, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Record a chunk receipt. Returns `false` when the index was already
    /// present (duplicate; the receipt set is untouched).
    pub fn mark_received(&mut self, index: u32) -> bool {
        debug_assert!(index < self.total_chunks);
        let inserted = self.received.insert(index);
        if inserted {
            self.updated_at = Utc::now();
        }
        inserted
    }

    /// Apply an event through the transition table, updating state and the
    /// activity timestamp. Returns the new state, or `None` if the event is
    /// rejected in the current state.
    pub fn apply(&mut self, event: SessionEvent) -> Option<SessionState> {
        let next = transition(self.state, event)?;
        self.state = next;
        self.updated_at = Utc::now();
        Some(next)
    }
}

// ============================================================================
// Chunk receipt outcome
// ============================================================================

/// Result of a successful UPLOAD_CHUNK command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk staged and counted
    Accepted {
        chunk_index: u32,
        received: u32,
        total: u32,
    },
    /// Index already present; bytes discarded, nothing mutated
    Duplicate { chunk_index: u32, received: u32 },
    /// This chunk completed the set and finalize committed the file
    Completed { storage_key: String, final_size: u64 },
}

// ============================================================================
// Errors
// ============================================================================

/// Upload engine error kinds, surfaced to clients as ERROR payloads.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("invalid chunk parameters: {0}")]
    InvalidChunkParameters(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("session closed")]
    SessionClosed,

    #[error("invalid operation in state '{state}'")]
    InvalidTransition { state: &'static str },

    #[error("chunk index out of range: {index} (total: {total})")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("chunk too large: {size} bytes (chunk size: {max})")]
    ChunkTooLarge { size: usize, max: u32 },

    #[error("staging error: {0}")]
    Staging(String),

    #[error("storage commit failed: {0}")]
    StorageCommitFailed(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32) -> UploadSession {
        UploadSession::new(
            "s1".into(),
            Identity {
                user_id: "user_1".into(),
                username: "alice".into(),
            },
            "a.mp4".into(),
            ".mp4".into(),
            total,
            1024,
        )
    }

    #[test]
    fn test_chunk_arrival_resumes_paused_session() {
        assert_eq!(
            transition(SessionState::Paused, SessionEvent::ChunkAccepted),
            Some(SessionState::Uploading)
        );
    }

    #[test]
    fn test_pause_is_idempotent() {
        assert_eq!(
            transition(SessionState::Paused, SessionEvent::Pause),
            Some(SessionState::Paused)
        );
    }

    #[test]
    fn test_resume_rejected_before_first_pause_or_chunk() {
        assert_eq!(transition(SessionState::Initialized, SessionEvent::Resume), None);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in [SessionState::Complete, SessionState::Cancelled] {
            for event in [
                SessionEvent::ChunkAccepted,
                SessionEvent::Pause,
                SessionEvent::Resume,
                SessionEvent::Cancel,
                SessionEvent::Finalized,
            ] {
                assert_eq!(transition(state, event), None, "{:?} on {:?}", event, state);
            }
        }
    }

    #[test]
    fn test_finalized_only_from_uploading() {
        assert_eq!(
            transition(SessionState::Uploading, SessionEvent::Finalized),
            Some(SessionState::Complete)
        );
        assert_eq!(transition(SessionState::Initialized, SessionEvent::Finalized), None);
        assert_eq!(transition(SessionState::Paused, SessionEvent::Finalized), None);
    }

    #[test]
    fn test_mark_received_duplicate_is_noop() {
        let mut s = session(3);
        assert!(s.mark_received(1));
        assert!(!s.mark_received(1));
        assert_eq!(s.received_count(), 1);
    }

    #[test]
    fn test_missing_chunks_ascending_complement() {
        let mut s = session(5);
        s.mark_received(1);
        s.mark_received(4);
        assert_eq!(s.missing_chunks(), vec![0, 2, 3]);
    }

    #[test]
    fn test_complete_set_detection() {
        let mut s = session(2);
        assert!(!s.is_complete_set());
        s.mark_received(0);
        s.mark_received(1);
        assert!(s.is_complete_set());
    }
}
