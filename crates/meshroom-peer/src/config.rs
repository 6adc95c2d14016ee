//! Client configuration.

use std::time::Duration;

use crate::mesh::DirectConfig;

/// Settings for one [`PeerClient`](crate::PeerClient).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Relay base URL, `ws://host:port`.
    pub server_url: String,
    /// Room to join: the lobby name or a `<worldId>-<instance>` key.
    pub room: String,
    /// `Origin` header sent to the relay.
    pub origin: Option<String>,
    /// Wait before redialing after the control connection drops.
    pub reconnect_delay: Duration,
    /// Pose ticks per second. 0 disables the timer; call
    /// [`PeerClient::tick`](crate::PeerClient::tick) instead.
    pub tick_rate_hz: u32,
    /// Identity payload sent once on every newly opened link.
    pub identity: Option<String>,
    /// Settings for the built-in direct mesh backend.
    pub mesh: DirectConfig,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            room: room.into(),
            origin: None,
            reconnect_delay: Duration::from_secs(1),
            tick_rate_hz: 60,
            identity: None,
            mesh: DirectConfig::default(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_mesh(mut self, mesh: DirectConfig) -> Self {
        self.mesh = mesh;
        self
    }

    /// The control-channel URL: server URL plus `/<room>`.
    pub fn control_url(&self) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), self.room)
    }

    /// Interval between pose ticks, if the timer is enabled.
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_rate_hz > 0).then(|| Duration::from_secs(1) / self.tick_rate_hz)
    }
}
