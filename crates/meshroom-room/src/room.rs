//! A single room instance and its members.

use meshroom_protocol::{ControlMessage, InitPayload, PeerId, RoomKey};
use serde_json::Value;
use tokio::sync::mpsc;

/// Channel for delivering control messages to one member's connection.
///
/// The connection handler owns the receiving end and writes whatever
/// arrives to the socket, in order.
pub type PeerSender = mpsc::UnboundedSender<ControlMessage>;

/// One connected member.
#[derive(Debug)]
pub struct Member {
    pub id: PeerId,
    outbox: PeerSender,
}

impl Member {
    /// Queues `msg` for this member. Returns `false` if its connection
    /// handler is already gone.
    pub fn send(&self, msg: ControlMessage) -> bool {
        self.outbox.send(msg).is_ok()
    }
}

/// One `(worldId, instance)` shard.
///
/// Members are kept in join order. Capacity is enforced by the
/// directory when a member is added, never retroactively.
#[derive(Debug)]
pub struct Room {
    key: RoomKey,
    capacity: usize,
    is_private: bool,
    members: Vec<Member>,
    state: Option<Value>,
}

impl Room {
    pub(crate) fn new(key: RoomKey, capacity: usize, is_private: bool) -> Self {
        Self {
            key,
            capacity,
            is_private,
            members: Vec::new(),
            state: None,
        }
    }

    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.iter().any(|m| m.id == *peer)
    }

    /// Member ids in join order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    /// Current room-level state, if any member has set one.
    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    /// Adds a member: `JOIN` goes to everyone already present, then
    /// `INIT` with the prior member list goes to the newcomer.
    pub(crate) fn admit(&mut self, id: PeerId, outbox: PeerSender) {
        let init = ControlMessage::Init(InitPayload {
            peers: self.peers(),
            state: self.state.clone(),
        });
        self.broadcast(ControlMessage::Join(id.clone()), None);
        let member = Member { id, outbox };
        member.send(init);
        self.members.push(member);
    }

    /// Removes a member and tells the rest with `LEAVE`.
    ///
    /// Returns `false` if `id` was not a member.
    pub(crate) fn remove(&mut self, id: &PeerId) -> bool {
        let Some(index) = self.members.iter().position(|m| m.id == *id) else {
            return false;
        };
        self.members.remove(index);
        self.broadcast(ControlMessage::Leave(id.clone()), None);
        true
    }

    /// Queues `msg` for one member. Returns `false` if there is no such
    /// member or its connection is gone.
    pub(crate) fn send_to(&self, id: &PeerId, msg: ControlMessage) -> bool {
        self.members
            .iter()
            .find(|m| m.id == *id)
            .is_some_and(|m| m.send(msg))
    }

    /// Queues `msg` for every member except `skip`.
    pub(crate) fn broadcast(&self, msg: ControlMessage, skip: Option<&PeerId>) {
        for member in &self.members {
            if Some(&member.id) == skip {
                continue;
            }
            if !member.send(msg.clone()) {
                tracing::debug!(room = %self.key, peer = %member.id, "member outbox closed");
            }
        }
    }

    /// Applies a `STATE` message from `from` and forwards it.
    ///
    /// An object is merged key by key into the current state and sent to
    /// the others as `UPDATE`. Anything else replaces the state and is
    /// sent as `STATE`.
    pub(crate) fn apply_state(&mut self, from: &PeerId, value: Value) {
        let forward = match value {
            Value::Object(patch) => {
                if !matches!(self.state, Some(Value::Object(_))) {
                    self.state = Some(Value::Object(serde_json::Map::new()));
                }
                if let Some(Value::Object(state)) = &mut self.state {
                    state.extend(patch.clone());
                }
                ControlMessage::Update(Value::Object(patch))
            }
            other => {
                self.state = Some(other.clone());
                ControlMessage::State(other)
            }
        };
        self.broadcast(forward, Some(from));
    }
}
