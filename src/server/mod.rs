//! TCP server and command dispatch
//!
//! One task per accepted connection, all running against the shared
//! session store. Sessions outlive connections: a client may reconnect and
//! drive resume/status/cancel for a session another connection created.

pub mod connection;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::{Identity, TokenStore};
use crate::protocol::{decode_request, Envelope, Request, Response};
use crate::upload::{ChunkOutcome, ChunkReceiver, ChunkStaging, SessionStore};

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes authenticated envelopes to the session services and renders the
/// wire response.
pub struct Dispatcher {
    auth: TokenStore,
    sessions: SessionStore,
    receiver: ChunkReceiver,
    staging: Arc<dyn ChunkStaging>,
}

impl Dispatcher {
    pub fn new(
        auth: TokenStore,
        sessions: SessionStore,
        receiver: ChunkReceiver,
        staging: Arc<dyn ChunkStaging>,
    ) -> Self {
        Self {
            auth,
            sessions,
            receiver,
            staging,
        }
    }

    /// Authenticate and dispatch one envelope. Authentication runs before
    /// any payload inspection, so an invalid token gets AUTH_FAILED even
    /// for garbage payloads, and never learns whether a session exists.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> Response {
        let Some(identity) = self.auth.resolve(&envelope.token).await else {
            tracing::debug!("rejected envelope with invalid auth token");
            return Response::AuthFailed;
        };

        let request = match decode_request(&envelope.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(user = %identity.username, "malformed request: {}", e);
                return Response::error(format!("malformed request: {}", e));
            }
        };

        self.handle_request(&identity, request).await
    }

    pub async fn handle_request(&self, identity: &Identity, request: Request) -> Response {
        match request {
            Request::InitUpload {
                filename,
                total_chunks,
                chunk_size,
            } => match self
                .sessions
                .init(identity.clone(), &filename, total_chunks, chunk_size)
                .await
            {
                Ok(session_id) => Response::Ready {
                    session_id,
                    // No storage key exists until finalize commits
                    storage_key: None,
                },
                Err(e) => Response::error(e.to_string()),
            },

            Request::UploadChunk {
                session_id,
                chunk_index,
                data,
            } => match self
                .receiver
                .upload_chunk(identity, &session_id, chunk_index, &data)
                .await
            {
                Ok(ChunkOutcome::Accepted {
                    chunk_index,
                    received,
                    total,
                }) => Response::ChunkAck {
                    chunk_index,
                    received,
                    total,
                },
                Ok(ChunkOutcome::Duplicate {
                    chunk_index,
                    received,
                }) => Response::Duplicate {
                    chunk_index,
                    received,
                },
                Ok(ChunkOutcome::Completed {
                    storage_key,
                    final_size,
                }) => Response::Complete {
                    storage_key,
                    final_size,
                },
                Err(e) => Response::error(e.to_string()),
            },

            Request::PauseUpload { session_id } => {
                match self.sessions.pause(&session_id, identity).await {
                    Ok((received, total)) => Response::Paused { received, total },
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::ResumeUpload { session_id } => {
                match self.sessions.resume(&session_id, identity).await {
                    Ok((received, total, missing)) => Response::Resumed {
                        received,
                        total,
                        missing,
                    },
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::CancelUpload { session_id } => {
                match self.sessions.cancel(&session_id, identity).await {
                    Ok(()) => {
                        if let Err(e) = self.staging.purge(&session_id).await {
                            tracing::warn!(
                                session_id = %session_id,
                                "failed to purge staging on cancel: {}",
                                e
                            );
                        }
                        Response::Cancelled
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::GetStatus { session_id } => {
                match self.sessions.status(&session_id, identity).await {
                    Ok((state, received, total)) => Response::Status {
                        state: state.to_string(),
                        received,
                        total,
                    },
                    Err(e) => Response::error(e.to_string()),
                }
            }
        }
    }
}

// ============================================================================
// Accept loop
// ============================================================================

/// Accept connections until the listener is torn down, spawning one task
/// per peer.
pub async fn run(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "client connected");
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    connection::serve(stream, dispatcher).await;
                    tracing::info!(peer = %peer, "client disconnected");
                });
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
