//! Admission policy: who may connect, and to which room.
//!
//! Runs before any room state is touched. A rejected connection never
//! becomes visible to other members.
//!
//! ```text
//! path "/Menu"     → Placement::Lobby            (directory picks instance)
//! path "/tower-3"  → Placement::Public(tower-3)  if "tower" is servable
//! path "/k3y-1"    → Placement::Private(k3y-1)   if "k3y" is a private code
//! anything else    → RoomError::RoomNotAllowed
//! ```

use meshroom_protocol::RoomKey;

use crate::{PrivateRooms, RoomConfig, RoomError};

/// Where an admitted connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The lobby. The instance is chosen by occupancy at join time.
    Lobby,
    /// A public room instance.
    Public(RoomKey),
    /// Instance 1 of a private room. Never listed.
    Private(RoomKey),
}

/// Origin and room allow-lists.
///
/// `None` means "no restriction".
#[derive(Debug, Clone)]
pub struct Admission {
    allowed_origins: Option<Vec<String>>,
    allowed_rooms: Option<Vec<String>>,
    lobby_name: String,
}

impl Admission {
    /// Creates a policy that admits everything.
    pub fn new(config: &RoomConfig) -> Self {
        Self {
            allowed_origins: None,
            allowed_rooms: None,
            lobby_name: config.lobby_name.clone(),
        }
    }

    /// Restricts the accepted `Origin` header values.
    pub fn with_allowed_origins(mut self, origins: Option<Vec<String>>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Restricts the servable world ids.
    pub fn with_allowed_rooms(mut self, rooms: Option<Vec<String>>) -> Self {
        self.allowed_rooms = rooms;
        self
    }

    /// Checks the upgrade request's origin.
    ///
    /// With an allow-list configured, a missing header is rejected too.
    pub fn check_origin(&self, origin: Option<&str>) -> Result<(), RoomError> {
        match (&self.allowed_origins, origin) {
            (None, _) => Ok(()),
            (Some(allowed), Some(origin)) if allowed.iter().any(|o| o == origin) => Ok(()),
            (Some(_), _) => Err(RoomError::OriginNotAllowed),
        }
    }

    /// Resolves a request path into a placement.
    ///
    /// The leading `/` is optional. Private codes are only consulted when
    /// an allow-list is in force and the requested instance is 1.
    pub async fn resolve<P: PrivateRooms>(
        &self,
        origin: Option<&str>,
        path: &str,
        private_rooms: &P,
    ) -> Result<Placement, RoomError> {
        self.check_origin(origin)?;

        let name = path.strip_prefix('/').unwrap_or(path);
        if name == self.lobby_name {
            return Ok(Placement::Lobby);
        }

        let key: RoomKey = name.parse().map_err(|_| RoomError::RoomNotAllowed)?;
        let Some(allowed) = &self.allowed_rooms else {
            return Ok(Placement::Public(key));
        };
        if allowed.iter().any(|world| *world == key.world) {
            return Ok(Placement::Public(key));
        }

        if !private_rooms.enabled() || key.instance != 1 {
            return Err(RoomError::RoomNotAllowed);
        }
        if private_rooms.is_registered(&key.world).await {
            tracing::debug!(room = %key, "private room code accepted");
            Ok(Placement::Private(key))
        } else {
            Err(RoomError::RoomNotAllowed)
        }
    }
}
