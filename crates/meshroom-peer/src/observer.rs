//! Application callbacks.

use meshroom_protocol::wire::{Broadcast, Pose};
use meshroom_protocol::PeerId;
use serde_json::Value;

/// Callbacks from the client task to the application.
///
/// Every method has an empty default, so implementors pick only what
/// they need. Calls happen on the client task, in event order. Keep them
/// short; a slow callback delays the pose tick.
pub trait RoomObserver: Send + 'static {
    /// A remote participant appeared (from `INIT` or `JOIN`).
    fn on_join(&mut self, _peer: &PeerId) {}

    /// A remote participant is gone: it left, its mesh link failed, or
    /// the control connection was lost.
    fn on_leave(&mut self, _peer: &PeerId) {}

    /// The mesh link to `peer` is open. Poses and broadcasts flow from
    /// here on.
    fn on_ready(&mut self, _peer: &PeerId) {}

    /// A pose frame arrived. The latest pose is also kept per peer.
    fn on_pose(&mut self, _peer: &PeerId, _pose: &Pose) {}

    /// A broadcast arrived.
    fn on_message(&mut self, _peer: &PeerId, _message: &Broadcast) {}

    /// `peer` sent its identity payload.
    fn on_identity(&mut self, _peer: &PeerId, _identity: &str) {}

    /// A frame with an unrecognized type byte. `frame` includes the
    /// type byte.
    fn on_legacy(&mut self, _peer: &PeerId, _frame: &[u8]) {}

    /// Full room state, from `INIT` or a `STATE` message.
    fn on_state(&mut self, _state: &Value) {}

    /// Room state patch.
    fn on_update(&mut self, _patch: &Value) {}

    /// The relay rejected us. The client will not reconnect on its own.
    fn on_error(&mut self, _reason: &str) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RoomObserver for NullObserver {}
