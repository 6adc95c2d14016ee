//! Room membership for the meshroom relay.
//!
//! The relay owns one [`RoomDirectory`] behind a mutex; every connection
//! handler goes through it to join, leave, relay negotiation data and
//! update room state.
//!
//! # Key types
//!
//! - [`RoomDirectory`]: all live room instances, lobby sharding, relay
//! - [`Room`]: ordered members of one `(worldId, instance)` shard
//! - [`Admission`]: origin and room allow-lists, resolves a request path
//!   into a [`Placement`]
//! - [`PrivateRooms`]: lookup hook for registered private room codes
//! - [`RoomConfig`]: capacities and the lobby name

#![allow(async_fn_in_trait)]

mod admission;
mod config;
mod directory;
mod error;
mod private;
mod room;

pub use admission::{Admission, Placement};
pub use config::RoomConfig;
pub use directory::{Joined, RoomDirectory};
pub use error::RoomError;
pub use private::{NoPrivateRooms, PrivateRooms, StaticPrivateRooms};
pub use room::{Member, PeerSender, Room};
