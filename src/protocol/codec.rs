//! Encode/decode for the upload wire protocol.
//!
//! Decoding works on complete byte slices and reports how many bytes were
//! consumed, so callers can drive it from a streaming buffer. A short slice
//! yields [`CodecError::Truncated`], which the dispatcher turns into an
//! ERROR response without tearing down the connection.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::{
    Request, Response, CMD_CANCEL_UPLOAD, CMD_GET_STATUS, CMD_INIT_UPLOAD, CMD_PAUSE_UPLOAD,
    CMD_RESUME_UPLOAD, CMD_UPLOAD_CHUNK, MAX_PAYLOAD_LEN, MAX_TOKEN_LEN, RESP_AUTH_FAILED,
    RESP_CANCELLED,
};

type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while decoding wire bytes.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("truncated {context}: need {expected} more byte(s), have {actual}")]
    Truncated {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("declared {field} length {len} exceeds limit {max}")]
    LengthOverflow { field: &'static str, len: u32, max: u32 },

    #[error("unknown command: 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("invalid UTF-8 in field '{field}'")]
    InvalidUtf8 { field: &'static str },

    #[error("empty payload: missing command byte")]
    EmptyPayload,
}

// ── Cursor helpers ───────────────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize, context: &'static str) -> Result<()> {
    if buf.len() < need {
        return Err(CodecError::Truncated {
            context,
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u16(buf: &mut &[u8], context: &'static str) -> Result<u16> {
    ensure(buf, 2, context)?;
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8], context: &'static str) -> Result<u32> {
    ensure(buf, 4, context)?;
    let v = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_bytes<'a>(buf: &mut &'a [u8], n: usize, context: &'static str) -> Result<&'a [u8]> {
    ensure(buf, n, context)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_string_u16(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let len = read_u16(buf, field)? as usize;
    let bytes = read_bytes(buf, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

// ============================================================================
// Envelope
// ============================================================================

/// A framed request envelope: auth token plus command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub token: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Decode one envelope from the front of `input`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(input: &[u8]) -> Result<(Envelope, usize)> {
        let mut buf = input;
        let token_len = read_u32(&mut buf, "auth token length")?;
        if token_len > MAX_TOKEN_LEN {
            return Err(CodecError::LengthOverflow {
                field: "auth token",
                len: token_len,
                max: MAX_TOKEN_LEN,
            });
        }
        let token = read_bytes(&mut buf, token_len as usize, "auth token")?.to_vec();

        let payload_len = read_u32(&mut buf, "payload length")?;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(CodecError::LengthOverflow {
                field: "payload",
                len: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        let payload = read_bytes(&mut buf, payload_len as usize, "payload")?.to_vec();

        let consumed = input.len() - buf.len();
        Ok((Envelope { token, payload }, consumed))
    }

    /// Encode an envelope (client side of the protocol; used by tests).
    pub fn encode(token: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(8 + token.len() + payload.len());
        out.put_u32(token.len() as u32);
        out.put_slice(token);
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        out.to_vec()
    }
}

// ============================================================================
// Request decode
// ============================================================================

/// Decode an envelope payload (command byte + body) into a [`Request`].
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    if payload.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let command = payload[0];
    let mut buf = &payload[1..];

    match command {
        CMD_INIT_UPLOAD => {
            let filename = read_string_u16(&mut buf, "filename")?;
            let total_chunks = read_u32(&mut buf, "total chunks")?;
            let chunk_size = read_u32(&mut buf, "chunk size")?;
            Ok(Request::InitUpload {
                filename,
                total_chunks,
                chunk_size,
            })
        }
        CMD_UPLOAD_CHUNK => {
            let session_id = read_string_u16(&mut buf, "session id")?;
            let chunk_index = read_u32(&mut buf, "chunk index")?;
            let data_len = read_u32(&mut buf, "chunk data length")? as usize;
            let data = read_bytes(&mut buf, data_len, "chunk data")?.to_vec();
            Ok(Request::UploadChunk {
                session_id,
                chunk_index,
                data,
            })
        }
        CMD_PAUSE_UPLOAD => Ok(Request::PauseUpload {
            session_id: read_string_u16(&mut buf, "session id")?,
        }),
        CMD_RESUME_UPLOAD => Ok(Request::ResumeUpload {
            session_id: read_string_u16(&mut buf, "session id")?,
        }),
        CMD_CANCEL_UPLOAD => Ok(Request::CancelUpload {
            session_id: read_string_u16(&mut buf, "session id")?,
        }),
        CMD_GET_STATUS => Ok(Request::GetStatus {
            session_id: read_string_u16(&mut buf, "session id")?,
        }),
        other => Err(CodecError::UnknownCommand(other)),
    }
}

// ============================================================================
// Request encode (client side; used by tests)
// ============================================================================

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        match self {
            Request::InitUpload {
                filename,
                total_chunks,
                chunk_size,
            } => {
                out.put_u8(CMD_INIT_UPLOAD);
                put_string_u16(&mut out, filename);
                out.put_u32(*total_chunks);
                out.put_u32(*chunk_size);
            }
            Request::UploadChunk {
                session_id,
                chunk_index,
                data,
            } => {
                out.put_u8(CMD_UPLOAD_CHUNK);
                put_string_u16(&mut out, session_id);
                out.put_u32(*chunk_index);
                out.put_u32(data.len() as u32);
                out.put_slice(data);
            }
            Request::PauseUpload { session_id } => {
                out.put_u8(CMD_PAUSE_UPLOAD);
                put_string_u16(&mut out, session_id);
            }
            Request::ResumeUpload { session_id } => {
                out.put_u8(CMD_RESUME_UPLOAD);
                put_string_u16(&mut out, session_id);
            }
            Request::CancelUpload { session_id } => {
                out.put_u8(CMD_CANCEL_UPLOAD);
                put_string_u16(&mut out, session_id);
            }
            Request::GetStatus { session_id } => {
                out.put_u8(CMD_GET_STATUS);
                put_string_u16(&mut out, session_id);
            }
        }
        out.to_vec()
    }
}

fn put_string_u16(out: &mut BytesMut, s: &str) {
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
}

// ============================================================================
// Response encode
// ============================================================================

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        match self {
            Response::Ready {
                session_id,
                storage_key,
            } => {
                out.put_u8(self.code());
                put_string_u16(&mut out, session_id);
                if let Some(key) = storage_key {
                    put_string_u16(&mut out, key);
                }
            }
            Response::ChunkAck {
                chunk_index,
                received,
                total,
            } => {
                out.put_u8(self.code());
                out.put_u32(*chunk_index);
                out.put_u32(*received);
                out.put_u32(*total);
            }
            Response::Duplicate {
                chunk_index,
                received,
            } => {
                out.put_u8(self.code());
                out.put_u32(*chunk_index);
                out.put_u32(*received);
            }
            Response::Complete {
                storage_key,
                final_size,
            } => {
                out.put_u8(self.code());
                put_string_u16(&mut out, storage_key);
                out.put_u64(*final_size);
            }
            Response::Paused { received, total } => {
                out.put_u8(self.code());
                out.put_u32(*received);
                out.put_u32(*total);
            }
            Response::Resumed {
                received,
                total,
                missing,
            } => {
                out.put_u8(self.code());
                out.put_u32(*received);
                out.put_u32(*total);
                out.put_u32(missing.len() as u32);
                for index in missing {
                    out.put_u32(*index);
                }
            }
            Response::Cancelled => {
                out.put_u8(RESP_CANCELLED);
            }
            Response::Status {
                state,
                received,
                total,
            } => {
                out.put_u8(self.code());
                // State name uses a 1-byte length prefix
                let bytes = state.as_bytes();
                out.put_u8(bytes.len() as u8);
                out.put_slice(bytes);
                out.put_u32(*received);
                out.put_u32(*total);
            }
            Response::Error { message } => {
                out.put_u8(self.code());
                // Truncate to 255 bytes without splitting a character; the
                // message field is documented as UTF-8
                let mut end = message.len().min(255);
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                let bytes = &message.as_bytes()[..end];
                out.put_u8(bytes.len() as u8);
                out.put_slice(bytes);
            }
            Response::AuthFailed => {
                out.put_u8(RESP_AUTH_FAILED);
            }
        }
        out.to_vec()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RESP_CHUNK_ACK, RESP_READY, RESP_RESUMED};

    #[test]
    fn test_envelope_roundtrip_reports_consumed() {
        let payload = Request::GetStatus {
            session_id: "abc".into(),
        }
        .encode();
        let mut wire = Envelope::encode(b"token", &payload);
        wire.extend_from_slice(&[0xFF, 0xEE]); // trailing bytes from a pipelined request

        let (envelope, consumed) = Envelope::decode(&wire).unwrap();
        assert_eq!(consumed, wire.len() - 2);
        assert_eq!(envelope.token, b"token");
        assert_eq!(decode_request(&envelope.payload).unwrap(),
            Request::GetStatus { session_id: "abc".into() });
    }

    #[test]
    fn test_envelope_truncated_needs_more_data() {
        let wire = Envelope::encode(b"tok", &[CMD_GET_STATUS, 0, 0]);
        let err = Envelope::decode(&wire[..wire.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_envelope_rejects_oversized_token() {
        let mut wire = BytesMut::new();
        wire.put_u32(MAX_TOKEN_LEN + 1);
        let err = Envelope::decode(&wire).unwrap_err();
        assert!(matches!(err, CodecError::LengthOverflow { field: "auth token", .. }));
    }

    #[test]
    fn test_init_upload_decode() {
        let payload = Request::InitUpload {
            filename: "video.mp4".into(),
            total_chunks: 3,
            chunk_size: 1_048_576,
        }
        .encode();
        let decoded = decode_request(&payload).unwrap();
        assert_eq!(
            decoded,
            Request::InitUpload {
                filename: "video.mp4".into(),
                total_chunks: 3,
                chunk_size: 1_048_576,
            }
        );
    }

    #[test]
    fn test_upload_chunk_decode_carries_data() {
        let payload = Request::UploadChunk {
            session_id: "sess".into(),
            chunk_index: 7,
            data: vec![1, 2, 3, 4, 5],
        }
        .encode();
        match decode_request(&payload).unwrap() {
            Request::UploadChunk {
                session_id,
                chunk_index,
                data,
            } => {
                assert_eq!(session_id, "sess");
                assert_eq!(chunk_index, 7);
                assert_eq!(data, vec![1, 2, 3, 4, 5]);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_chunk_data_is_descriptive() {
        let mut payload = Request::UploadChunk {
            session_id: "s".into(),
            chunk_index: 0,
            data: vec![0u8; 16],
        }
        .encode();
        payload.truncate(payload.len() - 4);
        let err = decode_request(&payload).unwrap_err();
        assert!(err.to_string().contains("chunk data"));
    }

    #[test]
    fn test_unknown_command() {
        let err = decode_request(&[0x7F]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownCommand(0x7F)));
    }

    #[test]
    fn test_empty_payload() {
        assert!(matches!(decode_request(&[]), Err(CodecError::EmptyPayload)));
    }

    #[test]
    fn test_ready_layout() {
        let bytes = Response::Ready {
            session_id: "id01".into(),
            storage_key: None,
        }
        .encode();
        assert_eq!(bytes[0], RESP_READY);
        assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), 4);
        assert_eq!(&bytes[3..7], b"id01");
        assert_eq!(bytes.len(), 7); // no storage key trailer
    }

    #[test]
    fn test_chunk_ack_layout() {
        let bytes = Response::ChunkAck {
            chunk_index: 2,
            received: 1,
            total: 3,
        }
        .encode();
        assert_eq!(bytes[0], RESP_CHUNK_ACK);
        assert_eq!(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 2);
        assert_eq!(u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]), 1);
        assert_eq!(u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]), 3);
    }

    #[test]
    fn test_resumed_layout_lists_missing_ascending() {
        let bytes = Response::Resumed {
            received: 2,
            total: 5,
            missing: vec![2, 3, 4],
        }
        .encode();
        assert_eq!(bytes[0], RESP_RESUMED);
        assert_eq!(bytes.len(), 1 + 4 + 4 + 4 + 3 * 4);
        let count = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
        assert_eq!(count, 3);
        let first = u32::from_be_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]);
        assert_eq!(first, 2);
    }

    #[test]
    fn test_error_message_truncated_to_255() {
        let long = "x".repeat(400);
        let bytes = Response::error(long).encode();
        assert_eq!(bytes[1], 255);
        assert_eq!(bytes.len(), 2 + 255);
    }

    #[test]
    fn test_error_message_truncation_keeps_utf8_whole() {
        // 'é' is 2 bytes; byte 255 falls mid-character
        let long = "é".repeat(200);
        let bytes = Response::error(long).encode();
        assert_eq!(bytes[1], 254);
        assert!(String::from_utf8(bytes[2..].to_vec()).is_ok());

        // A message ending exactly at a boundary is untouched
        let exact = "日".repeat(85); // 255 bytes
        let bytes = Response::error(exact).encode();
        assert_eq!(bytes[1], 255);
        assert!(String::from_utf8(bytes[2..].to_vec()).is_ok());
    }

    #[test]
    fn test_code_only_responses() {
        assert_eq!(Response::Cancelled.encode(), vec![RESP_CANCELLED]);
        assert_eq!(Response::AuthFailed.encode(), vec![RESP_AUTH_FAILED]);
    }
}
