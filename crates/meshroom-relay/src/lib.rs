//! # meshroom-relay
//!
//! The signaling relay. It admits control connections, shards them into
//! room instances, forwards mesh negotiation data between members of the
//! same instance, and tells members when others join or leave. Once two
//! peers have a direct link the relay is out of the data path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshroom_relay::{RelayConfig, RelayServer};
//!
//! # async fn run() -> Result<(), meshroom_relay::RelayError> {
//! let server = RelayServer::builder()
//!     .config(RelayConfig::from_env()?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod http;
mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{RelayServer, RelayServerBuilder};

pub mod prelude {
    pub use crate::{RelayConfig, RelayError, RelayServer, RelayServerBuilder};
    pub use meshroom_protocol::{ControlMessage, PeerId, RoomKey};
    pub use meshroom_room::{NoPrivateRooms, PrivateRooms, RoomConfig, StaticPrivateRooms};
}
