//! Room configuration.

use serde::{Deserialize, Serialize};

/// Capacities and the reserved lobby name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Maximum members of any non-lobby room instance.
    pub capacity: usize,

    /// Name of the lobby room. Clients connect to it by bare name and
    /// the directory picks the instance.
    pub lobby_name: String,

    /// Maximum members of one lobby instance.
    pub lobby_capacity: usize,
}

impl RoomConfig {
    /// Returns `true` if `world` is the lobby.
    pub fn is_lobby(&self, world: &str) -> bool {
        world == self.lobby_name
    }

    /// Capacity that applies to instances of `world`.
    pub fn capacity_of(&self, world: &str) -> usize {
        if self.is_lobby(world) {
            self.lobby_capacity
        } else {
            self.capacity
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            lobby_name: "Menu".to_string(),
            lobby_capacity: 16,
        }
    }
}
