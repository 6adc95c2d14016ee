//! Wire protocol for meshroom.
//!
//! Two independent wires live here:
//!
//! - **Control channel** ([`ControlMessage`], [`PeerId`], [`RoomKey`]):
//!   JSON messages between each peer and the relay, used for room
//!   membership and for relaying mesh negotiation data.
//! - **Mesh data channel** ([`wire`]): compact binary frames sent
//!   directly peer-to-peer. Pose updates go out every tick, broadcasts
//!   carry discrete events, and each link opens with an identity payload.
//!
//! ```text
//! peer ──ControlMessage──▶ relay ──ControlMessage──▶ peer   (bootstrap)
//! peer ◀──────────────── wire::Frame ─────────────▶ peer   (steady state)
//! ```

mod error;
mod types;
pub mod wire;

pub use error::{DecodeError, ProtocolError};
pub use types::{ControlMessage, InitPayload, PeerId, RoomKey, SignalPayload};
pub use wire::{Broadcast, Frame, Hand, Hands, Pose, Transform};
