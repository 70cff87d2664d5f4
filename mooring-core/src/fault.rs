//! The fault struct that crosses the wire when a remote invocation fails.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A failure raised on the peer and replayed to the caller.
///
/// Serialized transparently inside `Return*` envelopes so the caller observes
/// the originating type name, message, and stack text rather than a transport
/// wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Name of the error type on the originating side.
    pub type_name: String,
    /// Human-readable failure message.
    pub message: String,
    /// Stack context captured where the fault originated, as text.
    pub stack: String,
    /// Label of the endpoint that produced the fault.
    pub source: String,
}

impl RemoteFault {
    /// Build a fault with an empty stack and source.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack: String::new(),
            source: String::new(),
        }
    }

    /// Attach stack text to the fault.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Attach a source label to the fault.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if !self.source.is_empty() {
            write!(f, " (from {})", self.source)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_type_and_source() {
        let fault = RemoteFault::new("KeyNotFound", "no entry for \"missing\"")
            .with_source("server");
        assert_eq!(
            fault.to_string(),
            "KeyNotFound: no entry for \"missing\" (from server)"
        );
    }

    #[test]
    fn serde_round_trip() {
        let fault = RemoteFault::new("TypeError", "boom").with_stack("at handler");
        let bytes = serde_json::to_vec(&fault).expect("encode");
        let back: RemoteFault = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(fault, back);
    }
}
