//! Unified error type for the relay.

use meshroom_protocol::ProtocolError;
use meshroom_room::RoomError;
use meshroom_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A control message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error (rejected admission, full room).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The HTTP listing API failed to bind or serve.
    #[error("http api: {0}")]
    Http(#[source] std::io::Error),

    /// An environment variable held an unusable value.
    #[error("invalid {name}: {value:?}")]
    Config { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::SendFailed(std::io::Error::other("gone"));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Transport(_)));
        assert!(relay_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_room_error_keeps_reason() {
        let relay_err: RelayError = RoomError::RoomNotAllowed.into();
        assert!(matches!(relay_err, RelayError::Room(_)));
        assert_eq!(relay_err.to_string(), "Room not allowed.");
    }

    #[test]
    fn test_config_error_names_variable() {
        let err = RelayError::Config { name: "PORT", value: "eighty".into() };
        assert_eq!(err.to_string(), r#"invalid PORT: "eighty""#);
    }
}
