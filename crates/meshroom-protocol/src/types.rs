//! Control-channel types: what peers and the relay say to each other.
//!
//! Every control message is one JSON object of the form
//! `{ "type": "<TAG>", "data": <payload> }`. The relay only ever looks
//! inside `INIT`, `JOIN`, `LEAVE`, `STATE` and the `peer` field of
//! `SIGNAL`; the `signal` blob is forwarded untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Relay-assigned identifier of a participant.
///
/// Unique within one room instance, not globally. Serialized as a plain
/// JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of one room instance: `(worldId, instance)`.
///
/// Textual form is `"<worldId>-<instance>"` with `instance >= 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey {
    /// The world (room type) name.
    pub world: String,
    /// 1-based shard number.
    pub instance: u32,
}

impl RoomKey {
    /// Creates a key. `instance` must be at least 1.
    pub fn new(world: impl Into<String>, instance: u32) -> Self {
        debug_assert!(instance >= 1, "room instances are 1-based");
        Self {
            world: world.into(),
            instance,
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.world, self.instance)
    }
}

impl FromStr for RoomKey {
    type Err = ProtocolError;

    /// Splits at the first `-`. The world part must be non-empty and the
    /// instance part a positive integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidRoomKey(s.to_owned());
        let (world, instance) = s.split_once('-').ok_or_else(invalid)?;
        if world.is_empty() {
            return Err(invalid());
        }
        let instance: u32 = instance.parse().map_err(|_| invalid())?;
        if instance == 0 {
            return Err(invalid());
        }
        Ok(Self::new(world, instance))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of `INIT`: who is already in the room, and the room state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Ids of every other member, in join order.
    pub peers: Vec<PeerId>,
    /// Room-level state, if any has been set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Payload of `SIGNAL`.
///
/// Client → relay: `peer` is the addressee. Relay → client: `peer` is
/// the sender. `signal` is itself JSON-encoded negotiation data and is
/// never parsed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub peer: PeerId,
    pub signal: String,
}

// ---------------------------------------------------------------------------
// ControlMessage
// ---------------------------------------------------------------------------

/// One control-channel message.
///
/// Adjacently tagged: `ControlMessage::Join(id)` is
/// `{"type":"JOIN","data":"<id>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Relay → client, first message after admission.
    Init(InitPayload),
    /// Relay → client: a new member arrived.
    Join(PeerId),
    /// Relay → client: a member's connection closed.
    Leave(PeerId),
    /// Either direction: opaque mesh negotiation data.
    Signal(SignalPayload),
    /// Either direction: room-level state (full value).
    State(Value),
    /// Relay → client: room-level state patch.
    Update(Value),
    /// Relay → client: admission rejected. The relay closes right after.
    Error(String),
}

impl ControlMessage {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "INIT",
            Self::Join(_) => "JOIN",
            Self::Leave(_) => "LEAVE",
            Self::Signal(_) => "SIGNAL",
            Self::State(_) => "STATE",
            Self::Update(_) => "UPDATE",
            Self::Error(_) => "ERROR",
        }
    }

    /// Serializes to the JSON text sent as one WebSocket text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parses one received frame.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// =========================================================================
// Tests
// =========================================================================
