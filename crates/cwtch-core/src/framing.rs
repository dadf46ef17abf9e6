//! Length-prefixed binary frame codec.
//!
//! Outer wire format (per record, ciphertext side):
//!
//! ```text
//! u32 length (big-endian, bytes of ciphertext||tag)
//! bytes      (AEAD ciphertext)
//! ```
//!
//! Inner plaintext carried inside the AEAD envelope:
//!
//! ```text
//! u16 type_len    | bytes type_utf8
//! u32 payload_len | bytes payload
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::TAG_LEN;
use crate::error::{Error, Result};

/// Records larger than this close the channel with a protocol error.
pub const MAX_FRAME: usize = 1024 * 1024;
const MAX_INNER: usize = MAX_FRAME - TAG_LEN;

/// The one frame type the protocol mandates: UTF-8 message text.
pub const FRAME_MSG: &str = "MSG";
/// Cover-traffic filler; receivers drop it.
pub const FRAME_PAD: &str = "PAD";

/// Decoded `(type, payload)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: String,
    pub payload: Vec<u8>,
}

/// Serialize the inner plaintext for sealing.
pub fn encode_inner(frame_type: &str, payload: &[u8]) -> Result<Vec<u8>> {
    if frame_type.len() > u16::MAX as usize {
        return Err(Error::Protocol("frame type too long".into()));
    }
    let total = 2 + frame_type.len() + 4 + payload.len();
    if total > MAX_INNER {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            total, MAX_INNER
        )));
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(frame_type.len() as u16).to_be_bytes());
    buf.extend_from_slice(frame_type.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parse an opened inner plaintext back into a [`Frame`].
pub fn decode_inner(data: &[u8]) -> Result<Frame> {
    let malformed = || Error::Protocol("malformed inner frame".into());

    if data.len() < 2 {
        return Err(malformed());
    }
    let type_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let rest = &data[2..];
    if rest.len() < type_len + 4 {
        return Err(malformed());
    }
    let frame_type = std::str::from_utf8(&rest[..type_len])
        .map_err(|_| Error::Protocol("frame type is not UTF-8".into()))?
        .to_string();

    let len_bytes: [u8; 4] = rest[type_len..type_len + 4].try_into().unwrap();
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    let payload = &rest[type_len + 4..];
    if payload.len() != payload_len {
        return Err(malformed());
    }

    Ok(Frame {
        frame_type,
        payload: payload.to_vec(),
    })
}

/// Write one length-prefixed record and flush.
pub async fn write_frame<T>(transport: &mut T, record: &[u8]) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    if record.len() > MAX_FRAME {
        return Err(Error::Protocol("outgoing frame too large".into()));
    }
    transport.write_all(&(record.len() as u32).to_be_bytes()).await?;
    transport.write_all(record).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one length-prefixed record. A clean EOF before the length prefix is
/// [`Error::EndOfStream`]; an oversize length is a protocol violation.
pub async fn read_frame<T>(transport: &mut T) -> Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut len_bytes = [0u8; 4];
    if let Err(e) = transport.read_exact(&mut len_bytes).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::EndOfStream);
        }
        return Err(e.into());
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(Error::Protocol(format!("incoming frame of {} bytes", len)));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;
    Ok(buf)
}
