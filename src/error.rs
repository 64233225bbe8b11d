//! Structured error types for the link simulator.
//!
//! All fallible public APIs return `LinkResult<T>`. Failed entanglement
//! attempts are *not* errors: the link layer retries them silently and they
//! only show up in statistics.

use thiserror::Error;

use crate::protocol::ProtocolId;

/// The top-level error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    // ── Configuration errors ──────────────────────────────

    /// The link was assembled or configured incorrectly (for example an EGP
    /// without a physical layer, or a port with no channel attached).
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Scheduling errors ─────────────────────────────────

    /// A timer or event was requested in the past.
    #[error("cannot schedule at T={requested} when current time is T={current}")]
    InvalidTime { requested: u64, current: u64 },

    /// Virtual time overflowed `u64`.
    #[error("virtual time overflow")]
    TimeOverflow,

    // ── Protocol errors ───────────────────────────────────

    /// A message on the classical channel could not be decoded as a request
    /// synchronisation.
    #[error("malformed sync message: {0}")]
    MalformedSyncMessage(String),

    /// A protocol id was referenced but is not registered.
    #[error("protocol {0} not found")]
    ProtocolNotFound(ProtocolId),

    /// Attempted to register a protocol with an id already in use.
    #[error("protocol {0} is already registered")]
    ProtocolAlreadyRegistered(ProtocolId),

    /// A protocol downcast to a concrete type failed.
    #[error("protocol {protocol} is not a {expected}")]
    ProtocolTypeMismatch {
        protocol: ProtocolId,
        expected: &'static str,
    },

    // ── Output errors ─────────────────────────────────────

    /// A report could not be serialised.
    #[error("report export failed: {0}")]
    Export(String),
}

/// Convenience alias for `Result<T, LinkError>`.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_time() {
        let e = LinkError::InvalidTime { requested: 3, current: 10 };
        assert!(e.to_string().contains("T=3"));
        assert!(e.to_string().contains("T=10"));
    }

    #[test]
    fn test_error_display_protocol_not_found() {
        let e = LinkError::ProtocolNotFound(ProtocolId::new(5));
        assert_eq!(e.to_string(), "protocol P5 not found");
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let e = LinkError::ProtocolTypeMismatch {
            protocol: ProtocolId::new(2),
            expected: "Egp",
        };
        assert_eq!(e.to_string(), "protocol P2 is not a Egp");
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> =
            Box::new(LinkError::Configuration("missing physical layer".into()));
        assert!(e.to_string().starts_with("configuration error"));
    }
}
