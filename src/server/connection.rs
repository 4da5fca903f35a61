//! Per-connection framing loop
//!
//! Reads envelopes straight off the socket with length-prefixed reads, so a
//! slow client never costs more than one blocked task. Malformed payloads
//! get an ERROR response and the connection stays open; a declared length
//! over the hard caps also gets an ERROR but closes the connection, since
//! the stream cannot be resynchronized past a frame that was refused.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::protocol::codec::Envelope;
use crate::protocol::{Response, MAX_PAYLOAD_LEN, MAX_TOKEN_LEN};

use super::Dispatcher;

/// Drive one client connection until EOF, an I/O error, or an
/// unrecoverable frame.
pub async fn serve(stream: TcpStream, dispatcher: Arc<Dispatcher>) {
    let (mut reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);

    loop {
        let token_len = match read_u32(&mut reader).await {
            Ok(Some(len)) => len,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("read failed: {}", e);
                break;
            }
        };
        if token_len > MAX_TOKEN_LEN {
            tracing::warn!(declared = token_len, "auth token length over cap, closing");
            respond(
                &mut writer,
                &Response::error(format!("auth token length {} exceeds limit", token_len)),
            )
            .await;
            break;
        }

        let mut token = vec![0u8; token_len as usize];
        if let Err(e) = reader.read_exact(&mut token).await {
            tracing::debug!("read failed mid-frame: {}", e);
            break;
        }

        let payload_len = match read_u32(&mut reader).await {
            Ok(Some(len)) => len,
            _ => break,
        };
        if payload_len > MAX_PAYLOAD_LEN {
            tracing::warn!(declared = payload_len, "payload length over cap, closing");
            respond(
                &mut writer,
                &Response::error(format!("payload length {} exceeds limit", payload_len)),
            )
            .await;
            break;
        }

        let mut payload = vec![0u8; payload_len as usize];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!("read failed mid-frame: {}", e);
            break;
        }

        let response = dispatcher
            .handle_envelope(&Envelope { token, payload })
            .await;
        if !respond(&mut writer, &response).await {
            break;
        }
    }
}

/// Read a big-endian u32, distinguishing a clean EOF at a frame boundary
/// from a mid-read failure.
async fn read_u32<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(Some(u32::from_be_bytes(buf))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

async fn respond<W: AsyncWriteExt + Unpin>(writer: &mut W, response: &Response) -> bool {
    let bytes = response.encode();
    if let Err(e) = writer.write_all(&bytes).await {
        tracing::debug!("write failed: {}", e);
        return false;
    }
    if let Err(e) = writer.flush().await {
        tracing::debug!("flush failed: {}", e);
        return false;
    }
    true
}
