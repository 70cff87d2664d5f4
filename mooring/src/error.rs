//! Error types for endpoint operations.

use std::io;

use thiserror::Error;

use mooring_core::{CodecError, ObjectId, RemoteFault};

/// Errors surfaced by endpoint operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// `connect` was called on an endpoint that is already in use.
    #[error("endpoint is already connected or connecting")]
    InUse,

    /// The operation requires a connected endpoint.
    #[error("endpoint is not connected")]
    Disconnected,

    /// A shared-object table outgrew its configured cap. Fatal for the
    /// connection.
    #[error("{table} exceeded its limit of {limit} entries")]
    Overflow {
        /// Which table overflowed (`"held objects"` or `"remote proxies"`).
        table: &'static str,
        /// The configured cap.
        limit: usize,
    },

    /// The peer referenced an object this side does not hold. Answered on
    /// the wire with a fault; locally a protocol anomaly worth logging.
    #[error("peer referenced {0}, which is not held here")]
    AccessDenied(ObjectId),

    /// The peer's invocation body failed; carries its type, message, and
    /// stack text.
    #[error("remote fault: {0}")]
    Remote(#[from] RemoteFault),

    /// Transport failure.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The serializer rejected a payload.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// The peer violated the protocol (garbage framing, release divergence,
    /// handshake breakage). Fatal for the connection.
    #[error("protocol violation: {message}")]
    Protocol {
        /// What was violated.
        message: String,
    },
}

impl LinkError {
    /// Shorthand for a [`LinkError::Protocol`].
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        LinkError::Protocol {
            message: message.into(),
        }
    }

    /// The error every pending operation is completed with at teardown.
    pub(crate) fn disconnected_mid_operation() -> Self {
        LinkError::Io(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "disconnected while processing this operation",
        ))
    }
}

/// Whether an i/o error is an expected transport close rather than a fault.
///
/// Expected closes fire `on_disconnected` only; anything else also fires
/// `on_network_error`.
pub(crate) fn is_expected_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Result alias for endpoint operations.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_closes_are_classified() {
        assert!(is_expected_close(&io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "eof"
        )));
        assert!(is_expected_close(&io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset"
        )));
        assert!(!is_expected_close(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        )));
    }

    #[test]
    fn display_formats() {
        let err = LinkError::Overflow {
            table: "held objects",
            limit: 8,
        };
        assert_eq!(err.to_string(), "held objects exceeded its limit of 8 entries");
        assert_eq!(
            LinkError::AccessDenied(ObjectId(3)).to_string(),
            "peer referenced obj:3, which is not held here"
        );
    }
}
