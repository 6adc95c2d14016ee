//! The process-wide room directory.
//!
//! Owned by the relay's run loop behind a single mutex. Every mutation
//! that touches more than one member (join, leave, signal relay, state)
//! happens while that lock is held, so no message is ever routed to a
//! half-removed member.

use std::collections::{BTreeMap, HashMap};

use meshroom_protocol::{ControlMessage, PeerId, RoomKey, SignalPayload};
use serde_json::Value;

use crate::{Placement, PeerSender, Room, RoomConfig, RoomError};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    /// The instance the member was placed in.
    pub room: RoomKey,
    /// The member's relay-assigned id.
    pub peer: PeerId,
}

/// All live room instances, keyed by `(worldId, instance)`.
///
/// Rooms are created lazily on first join and evicted as soon as their
/// last member leaves.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    config: RoomConfig,
    rooms: HashMap<RoomKey, Room>,
}

impl RoomDirectory {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// The lobby instance the next lobby join would land in: the lowest
    /// instance number that is absent or below lobby capacity.
    pub fn lobby_instance(&self) -> u32 {
        let mut instance = 1;
        loop {
            let key = RoomKey::new(self.config.lobby_name.clone(), instance);
            match self.rooms.get(&key) {
                Some(room) if room.len() >= self.config.lobby_capacity => instance += 1,
                _ => return instance,
            }
        }
    }

    /// Places a new member and queues `JOIN`/`INIT`.
    ///
    /// Fails with [`RoomError::RoomFull`] if a non-lobby instance is at
    /// capacity. Nothing is changed on failure.
    pub fn join(
        &mut self,
        placement: Placement,
        outbox: PeerSender,
    ) -> Result<Joined, RoomError> {
        let (key, is_private) = match placement {
            Placement::Lobby => (
                RoomKey::new(self.config.lobby_name.clone(), self.lobby_instance()),
                false,
            ),
            Placement::Public(key) => (key, false),
            Placement::Private(key) => (key, true),
        };

        if self.rooms.get(&key).is_some_and(Room::is_full) {
            tracing::debug!(room = %key, "room full");
            return Err(RoomError::RoomFull(key));
        }

        let capacity = self.config.capacity_of(&key.world);
        let room = self.rooms.entry(key.clone()).or_insert_with(|| {
            tracing::info!(room = %key, is_private, "room created");
            Room::new(key.clone(), capacity, is_private)
        });

        let peer = unique_peer_id(room);
        room.admit(peer.clone(), outbox);
        tracing::info!(room = %key, %peer, members = room.len(), "peer joined");

        Ok(Joined { room: key, peer })
    }

    /// Removes a member, sends `LEAVE` to the rest, and evicts the room
    /// if it is now empty.
    pub fn leave(&mut self, key: &RoomKey, peer: &PeerId) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(key)
            .ok_or_else(|| RoomError::NotFound(key.clone()))?;

        if !room.remove(peer) {
            return Err(RoomError::NotInRoom(peer.clone(), key.clone()));
        }
        tracing::info!(room = %key, %peer, members = room.len(), "peer left");

        if room.is_empty() {
            self.rooms.remove(key);
            tracing::info!(room = %key, "room evicted");
        }
        Ok(())
    }

    /// Forwards a `SIGNAL` from `from` to the addressee in the same room.
    ///
    /// The outgoing message names the sender in `peer`; `signal` is
    /// passed through untouched. Returns `false` if the addressee is not
    /// in the room.
    pub fn relay_signal(&self, key: &RoomKey, from: &PeerId, payload: SignalPayload) -> bool {
        let Some(room) = self.rooms.get(key) else {
            return false;
        };
        if !room.contains(from) {
            return false;
        }
        let SignalPayload { peer: to, signal } = payload;
        room.send_to(
            &to,
            ControlMessage::Signal(SignalPayload {
                peer: from.clone(),
                signal,
            }),
        )
    }

    /// Applies a member's `STATE` message to its room.
    pub fn update_state(
        &mut self,
        key: &RoomKey,
        from: &PeerId,
        value: Value,
    ) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(key)
            .ok_or_else(|| RoomError::NotFound(key.clone()))?;
        if !room.contains(from) {
            return Err(RoomError::NotInRoom(from.clone(), key.clone()));
        }
        room.apply_state(from, value);
        Ok(())
    }

    /// Member counts of every public, non-empty instance, keyed by the
    /// textual room key.
    pub fn listing(&self) -> BTreeMap<String, usize> {
        self.rooms
            .values()
            .filter(|room| !room.is_private() && !room.is_empty())
            .map(|room| (room.key().to_string(), room.len()))
            .collect()
    }

    pub fn room(&self, key: &RoomKey) -> Option<&Room> {
        self.rooms.get(key)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members in `key`, zero if it does not exist.
    pub fn member_count(&self, key: &RoomKey) -> usize {
        self.rooms.get(key).map_or(0, Room::len)
    }
}

/// Random hex id not already used in `room`.
fn unique_peer_id(room: &Room) -> PeerId {
    loop {
        let id = PeerId(format!("{:08x}", rand::random::<u32>()));
        if !room.contains(&id) {
            return id;
        }
    }
}
