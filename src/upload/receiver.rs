//! Chunk receiver
//!
//! Validates incoming chunk payloads against session metadata, stages the
//! bytes, and keeps the receipt bookkeeping. The whole mutation — duplicate
//! check, staging write, receipt insert, completion check, and the
//! synchronous finalize — happens inside the session's lock, so pipelined
//! chunk writes for one session serialize and racing final chunks trigger
//! exactly one finalize.

use std::sync::Arc;

use crate::auth::Identity;

use super::finalizer::Finalizer;
use super::session::{check_owner, SessionStore};
use super::staging::ChunkStaging;
use super::types::{ChunkOutcome, SessionEvent, SessionState, UploadError};

pub struct ChunkReceiver {
    sessions: SessionStore,
    staging: Arc<dyn ChunkStaging>,
    finalizer: Finalizer,
}

impl ChunkReceiver {
    pub fn new(
        sessions: SessionStore,
        staging: Arc<dyn ChunkStaging>,
        finalizer: Finalizer,
    ) -> Self {
        Self {
            sessions,
            staging,
            finalizer,
        }
    }

    pub async fn upload_chunk(
        &self,
        caller: &Identity,
        session_id: &str,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<ChunkOutcome, UploadError> {
        let handle = self.sessions.lookup(session_id).await?;
        let mut session = handle.lock().await;
        check_owner(&session, caller)?;

        if session.state.is_terminal() {
            return Err(UploadError::SessionClosed);
        }
        if chunk_index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: session.total_chunks,
            });
        }
        // Every chunk must fit the declared chunk size; the final chunk may
        // be shorter, never longer.
        if data.len() > session.chunk_size as usize {
            return Err(UploadError::ChunkTooLarge {
                size: data.len(),
                max: session.chunk_size,
            });
        }

        // Arriving bytes are evidence the client is transferring again, so
        // a Paused session moves back to Uploading before the duplicate
        // check. Pause is advisory for the client's pacing and never
        // blocks bytes that arrive.
        session.apply(SessionEvent::ChunkAccepted);
        debug_assert_eq!(session.state, SessionState::Uploading);

        if session.received.contains(&chunk_index) {
            // A duplicate against an already-full receipt set means the
            // earlier finalize never completed; re-attempt it instead of
            // acknowledging the retransmission.
            if session.is_complete_set() {
                let (storage_key, final_size) = self.finalizer.finalize(&mut session).await?;
                return Ok(ChunkOutcome::Completed {
                    storage_key,
                    final_size,
                });
            }

            tracing::debug!(
                session_id = %session_id,
                chunk_index = chunk_index,
                "duplicate chunk ignored"
            );
            return Ok(ChunkOutcome::Duplicate {
                chunk_index,
                received: session.received_count(),
            });
        }

        self.staging.store(session_id, chunk_index, data).await?;
        session.mark_received(chunk_index);

        tracing::debug!(
            session_id = %session_id,
            chunk_index = chunk_index,
            received = session.received_count(),
            total = session.total_chunks,
            "chunk staged"
        );

        if session.is_complete_set() {
            let (storage_key, final_size) = self.finalizer.finalize(&mut session).await?;
            return Ok(ChunkOutcome::Completed {
                storage_key,
                final_size,
            });
        }

        Ok(ChunkOutcome::Accepted {
            chunk_index,
            received: session.received_count(),
            total: session.total_chunks,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
