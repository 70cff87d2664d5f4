//! Wire framing for both channels.
//!
//! Reliable channel: each message is a `u32` little-endian payload length
//! followed by that many opaque serializer bytes. Unreliable channel: one
//! serialized envelope per datagram; client-originated datagrams are
//! prefixed with the session [`NetworkId`] as `u16` LE so the listener can
//! route them, server-originated datagrams carry the payload alone because
//! the client has exactly one peer.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mooring_core::NetworkId;

/// Sanity cap on a single reliable frame.
///
/// A length above this is treated as garbage on the wire, not as a real
/// message, and tears the connection down.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Size of the `NetworkId` prefix on client-originated datagrams.
pub const DATAGRAM_PREFIX_LEN: usize = 2;

/// Wire framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame length field exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte cap")]
    TooLarge {
        /// The advertised payload length.
        len: usize,
    },

    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Write one `(length, payload)` frame.
///
/// The caller is responsible for serializing before acquiring whatever
/// ordering discipline guards `writer`; this function only emits the two
/// writes back to back.
///
/// # Errors
///
/// [`FrameError::TooLarge`] for oversized payloads, [`FrameError::Io`] on
/// transport failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: payload.len() });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one `(length, payload)` frame.
///
/// # Errors
///
/// [`FrameError::TooLarge`] if the advertised length fails the sanity cap,
/// [`FrameError::Io`] on transport failure (including a clean end-of-stream,
/// which surfaces as `UnexpectedEof`).
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Prefix a datagram payload with the sender's session id (client → server).
pub fn prefix_datagram(id: NetworkId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATAGRAM_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&id.0.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a client-originated datagram into its session id and payload.
///
/// Returns `None` for runt datagrams.
pub fn split_datagram(datagram: &[u8]) -> Option<(NetworkId, &[u8])> {
    if datagram.len() < DATAGRAM_PREFIX_LEN {
        return None;
    }
    let id = u16::from_le_bytes([datagram[0], datagram[1]]);
    Some((NetworkId(id), &datagram[DATAGRAM_PREFIX_LEN..]))
}
