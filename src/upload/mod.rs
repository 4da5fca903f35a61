//! Resumable chunked upload engine
//!
//! Sessions track a client-declared chunk contract and a receipt set.
//! Chunks arrive in any order, tolerate retransmission, and can be paused,
//! resumed, queried, or cancelled from any connection. Once the receipt
//! set is full the finalizer assembles the staged chunks in index order
//! and commits the file to durable object storage.

pub mod finalizer;
pub mod receiver;
pub mod session;
pub mod staging;
pub mod types;

pub use finalizer::Finalizer;
pub use receiver::ChunkReceiver;
pub use session::{SessionHandle, SessionStore};
pub use staging::{ChunkStaging, LocalChunkStaging, MemoryChunkStaging};
pub use types::*;
