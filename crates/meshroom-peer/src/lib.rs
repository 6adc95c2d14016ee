//! Peer client for meshroom.
//!
//! A [`PeerClient`] keeps one control connection to the relay and one
//! direct mesh link per remote participant. The relay only bootstraps
//! the mesh; poses and broadcasts travel peer-to-peer.
//!
//! # Key types
//!
//! - [`PeerClient`]: handle to the client task (pose, broadcast, state)
//! - [`ClientConfig`]: relay URL, room, tick rate, identity, reconnect delay
//! - [`RoomObserver`]: callbacks for joins, leaves and inbound messages
//! - [`mesh::MeshConnector`] / [`mesh::MeshLink`]: the mesh backend seam,
//!   with [`mesh::DirectConnector`] built in and a WebRTC backend behind
//!   the `webrtc` feature
//!
//! Everything runs on one task: control messages, link events and the
//! pose tick are processed in order, so no callback ever races another.

mod client;
mod config;
mod error;
pub mod mesh;
mod observer;
mod peer;
mod signaling;

pub use client::{ClientStatus, PeerClient, PeerInfo};
pub use config::ClientConfig;
pub use error::{MeshError, PeerError};
pub use observer::{NullObserver, RoomObserver};
pub use peer::{LinkState, PeerConnection};
pub use signaling::SignalingState;

pub use meshroom_protocol::wire::{Broadcast, Hand, Hands, Pose, Transform};
pub use meshroom_protocol::PeerId;

/// Convenience re-exports for applications.
pub mod prelude {
    pub use crate::{
        Broadcast, ClientConfig, ClientStatus, Hand, Hands, NullObserver, PeerClient, PeerError, PeerId,
        PeerInfo, Pose, RoomObserver, SignalingState, Transform,
    };
}
