//! Binary wire protocol
//!
//! Every request travels in an envelope:
//! `auth_token_len(4 BE) | auth_token | payload_len(4 BE) | command(1) | command_payload`
//! where `payload_len` counts the command byte plus its payload. Responses
//! are a response code byte followed by a code-specific payload; they carry
//! no envelope. All multi-byte integers are big-endian; strings are
//! length-prefixed UTF-8 (2-byte prefix unless noted).

pub mod codec;

pub use codec::{decode_request, CodecError, Envelope};

// ============================================================================
// Command codes
// ============================================================================

pub const CMD_INIT_UPLOAD: u8 = 0x01;
pub const CMD_UPLOAD_CHUNK: u8 = 0x02;
pub const CMD_PAUSE_UPLOAD: u8 = 0x03;
pub const CMD_RESUME_UPLOAD: u8 = 0x04;
pub const CMD_CANCEL_UPLOAD: u8 = 0x05;
pub const CMD_GET_STATUS: u8 = 0x06;

// ============================================================================
// Response codes
// ============================================================================

pub const RESP_OK: u8 = 0x10;
pub const RESP_ERROR: u8 = 0x11;
pub const RESP_READY: u8 = 0x12;
pub const RESP_CHUNK_ACK: u8 = 0x13;
pub const RESP_COMPLETE: u8 = 0x14;
pub const RESP_STATUS: u8 = 0x15;
pub const RESP_PAUSED: u8 = 0x16;
pub const RESP_RESUMED: u8 = 0x17;
pub const RESP_CANCELLED: u8 = 0x18;
pub const RESP_AUTH_FAILED: u8 = 0x19;
pub const RESP_DUPLICATE: u8 = 0x1A;

// ============================================================================
// Framing limits
// ============================================================================

/// Hard cap on the declared auth token length.
pub const MAX_TOKEN_LEN: u32 = 1024;

/// Hard cap on the declared envelope payload length (command + body).
pub const MAX_PAYLOAD_LEN: u32 = 128 * 1024 * 1024;

// ============================================================================
// Decoded messages
// ============================================================================

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    InitUpload {
        filename: String,
        total_chunks: u32,
        chunk_size: u32,
    },
    UploadChunk {
        session_id: String,
        chunk_index: u32,
        data: Vec<u8>,
    },
    PauseUpload {
        session_id: String,
    },
    ResumeUpload {
        session_id: String,
    },
    CancelUpload {
        session_id: String,
    },
    GetStatus {
        session_id: String,
    },
}

/// A server response, rendered to bytes by [`Response::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ready {
        session_id: String,
        storage_key: Option<String>,
    },
    ChunkAck {
        chunk_index: u32,
        received: u32,
        total: u32,
    },
    Duplicate {
        chunk_index: u32,
        received: u32,
    },
    Complete {
        storage_key: String,
        final_size: u64,
    },
    Paused {
        received: u32,
        total: u32,
    },
    Resumed {
        received: u32,
        total: u32,
        missing: Vec<u32>,
    },
    Cancelled,
    Status {
        state: String,
        received: u32,
        total: u32,
    },
    Error {
        message: String,
    },
    AuthFailed,
}

impl Response {
    /// The wire code this response is tagged with.
    pub fn code(&self) -> u8 {
        match self {
            Response::Ready { .. } => RESP_READY,
            Response::ChunkAck { .. } => RESP_CHUNK_ACK,
            Response::Duplicate { .. } => RESP_DUPLICATE,
            Response::Complete { .. } => RESP_COMPLETE,
            Response::Paused { .. } => RESP_PAUSED,
            Response::Resumed { .. } => RESP_RESUMED,
            Response::Cancelled => RESP_CANCELLED,
            Response::Status { .. } => RESP_STATUS,
            Response::Error { .. } => RESP_ERROR,
            Response::AuthFailed => RESP_AUTH_FAILED,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}
