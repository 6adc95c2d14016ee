//! Error types for the protocol layer.
//!
//! Two enums, one per wire: [`ProtocolError`] for the JSON control channel
//! between peers and the relay, [`DecodeError`] for binary frames on the
//! peer-to-peer data channel.

/// Errors on the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a control message failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes were not a control message we understand: malformed
    /// JSON, an unknown `type` tag, or a payload of the wrong shape.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room key did not match `<worldId>-<instance>`.
    #[error("invalid room key: {0:?}")]
    InvalidRoomKey(String),
}

/// Why a data-channel frame could not be decoded.
///
/// Callers drop the offending frame and keep the channel open.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length frame: there is no leading type byte to dispatch on.
    #[error("empty frame")]
    Empty,

    /// A pose frame whose length is not one of the two legal sizes.
    #[error("pose frame has illegal length {len}")]
    Truncated {
        /// Total frame length in bytes, including the type byte.
        len: usize,
    },

    /// `decode_pose` was handed something that is not a pose frame.
    #[error("expected pose frame, found type byte {0:#04x}")]
    UnexpectedTag(u8),

    /// A text-bearing frame was not valid UTF-8.
    #[error("frame body is not valid UTF-8")]
    Utf8,

    /// A JSON broadcast body did not parse.
    #[error("broadcast body is not valid JSON: {0}")]
    Json(String),
}
