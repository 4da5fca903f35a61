//! Cargohold Library
//!
//! Resumable chunked file uploads over a length-prefixed binary TCP
//! protocol. The library surface exists for the integration tests and the
//! server binary in main.rs.
//!
//! # Modules
//!
//! - `protocol`: wire framing, command/response codecs
//! - `auth`: token resolution
//! - `upload`: sessions, chunk staging, receiver, finalizer
//! - `storage`: durable object store (S3 and in-memory)
//! - `server`: TCP accept loop and command dispatch

pub mod auth;
pub mod config;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod upload;
