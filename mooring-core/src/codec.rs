//! Pluggable payload serialization.
//!
//! The engine frames payloads but never interprets their bytes; a
//! [`Serializer`] turns [`Envelope`]s into payloads and back. The provided
//! [`JsonSerializer`] is the default: human-readable, convenient to debug,
//! and sufficient for anything that is not throughput-bound. Bring a binary
//! implementation for production traffic.

use thiserror::Error;

use crate::envelope::Envelope;

/// Error type for serializer operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode an envelope to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to an envelope.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable wire-payload format.
///
/// Implementations must be deterministic per connection: both sides agree on
/// one serializer out of band, and the handshake assumes the peer speaks the
/// same format.
pub trait Serializer: Send + Sync + 'static {
    /// Encode an envelope to payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Decode payload bytes to an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// JSON serializer, the default payload format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
