//! Error types for the room layer.

use meshroom_protocol::{PeerId, RoomKey};

/// Errors that can occur during room operations.
///
/// The first three are admission failures. Their `Display` text is the
/// exact reason sent to the client in an `ERROR` message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The upgrade request's `Origin` is not on the allow-list.
    #[error("Origin not allowed.")]
    OriginNotAllowed,

    /// Malformed room key, unlisted world, or unknown private code.
    #[error("Room not allowed.")]
    RoomNotAllowed,

    /// The requested instance is at capacity.
    #[error("Room is full.")]
    RoomFull(RoomKey),

    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomKey),

    /// The peer is not a member of this room.
    #[error("peer {0} not in room {1}")]
    NotInRoom(PeerId, RoomKey),
}

impl RoomError {
    /// Returns `true` for errors that end a connection with an `ERROR`
    /// message.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::OriginNotAllowed | Self::RoomNotAllowed | Self::RoomFull(_)
        )
    }
}
