//! Per-peer bookkeeping on top of one mesh link.

use meshroom_protocol::wire::{self, Pose};
use meshroom_protocol::PeerId;

use crate::mesh::MeshLink;

/// Where a peer's link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Signals are being exchanged; nothing can be sent yet.
    Negotiating,
    /// The data channel is open.
    Connected,
    /// Torn down. The entry is about to be dropped.
    Closed,
}

/// One remote participant as seen by the client.
///
/// Owns the [`MeshLink`], remembers the last pose received from the peer
/// and whether our identity payload has gone out on the current link.
pub struct PeerConnection<L: MeshLink> {
    id: PeerId,
    link: L,
    serial: u64,
    state: LinkState,
    identity_sent: bool,
    pose: Option<Pose>,
    remote_identity: Option<String>,
}

impl<L: MeshLink> PeerConnection<L> {
    pub fn new(id: PeerId, link: L, serial: u64) -> Self {
        Self {
            id,
            link,
            serial,
            state: LinkState::Negotiating,
            identity_sent: false,
            pose: None,
            remote_identity: None,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Serial of the link this entry owns.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// `true` once frames can be sent to this peer.
    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Connected && self.link.is_open()
    }

    /// Hands relayed negotiation data to the link.
    pub fn accept_signal(&mut self, blob: &str) {
        if self.state == LinkState::Closed {
            return;
        }
        self.link.accept_signal(blob);
    }

    /// The link reported open. Identity goes out again on the new channel.
    pub fn mark_open(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Connected;
        self.identity_sent = false;
    }

    /// Sends one frame, preceded by our identity frame if this link has
    /// not carried it yet. Returns `false` if the peer is not ready.
    pub fn send(&mut self, frame: &[u8], identity: Option<&str>) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.send_identity(identity);
        self.link.send(frame);
        true
    }

    /// Sends the identity frame now if it is still owed on this link.
    pub fn send_identity(&mut self, identity: Option<&str>) {
        if self.identity_sent || !self.is_ready() {
            return;
        }
        if let Some(identity) = identity {
            self.link.send(&wire::encode_identity(identity));
            self.identity_sent = true;
        }
    }

    /// Forces the identity frame to be sent again before the next frame.
    pub fn reset_identity(&mut self) {
        self.identity_sent = false;
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = Some(pose);
    }

    /// Last pose received from this peer.
    pub fn pose(&self) -> Option<&Pose> {
        self.pose.as_ref()
    }

    pub fn set_remote_identity(&mut self, identity: String) {
        self.remote_identity = Some(identity);
    }

    pub fn remote_identity(&self) -> Option<&str> {
        self.remote_identity.as_deref()
    }

    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.link.close();
    }
}

impl<L: MeshLink> Drop for PeerConnection<L> {
    fn drop(&mut self) {
        if self.state != LinkState::Closed {
            self.link.close();
        }
    }
}
