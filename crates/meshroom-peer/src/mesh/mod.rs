//! Mesh backends: how two peers get a direct data channel.
//!
//! The client never talks to a backend's sockets directly. It asks a
//! [`MeshConnector`] to [`open`](MeshConnector::open) one [`MeshLink`] per
//! remote peer and listens on the [`LinkEvents`] it handed over:
//!
//! ```text
//! client ──open(peer, initiator)──▶ connector ──▶ link
//! client ◀──Signal(blob)──── link    (client relays it as SIGNAL)
//! client ──accept_signal(blob)──▶ link   (SIGNAL from the relay)
//! client ◀──Open / Message / Closed── link
//! ```
//!
//! Links must never block the caller: `open`, `accept_signal`, `send`
//! and `close` return immediately and the real work happens on tasks the
//! backend spawns.

mod direct;
#[cfg(feature = "webrtc")]
mod rtc;

use meshroom_protocol::PeerId;
use tokio::sync::mpsc;

pub use direct::{DirectConfig, DirectConnector, DirectLink};
#[cfg(feature = "webrtc")]
pub use rtc::{WebRtcConfig, WebRtcConnector, WebRtcLink};

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Negotiation data to relay to the remote peer.
    Signal(String),
    /// The data channel is open.
    Open,
    /// One data-channel frame.
    Message(Vec<u8>),
    /// The link failed or was closed by the remote side.
    Closed,
}

/// A [`LinkEvent`] tagged with the link it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnvelope {
    pub peer: PeerId,
    /// Distinguishes successive links to the same peer. Events from a
    /// replaced or torn-down link are ignored by the client.
    pub serial: u64,
    pub event: LinkEvent,
}

/// Event sink handed to a link when it is opened.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    peer: PeerId,
    serial: u64,
    tx: mpsc::UnboundedSender<LinkEnvelope>,
}

impl LinkEvents {
    pub fn new(peer: PeerId, serial: u64, tx: mpsc::UnboundedSender<LinkEnvelope>) -> Self {
        Self { peer, serial, tx }
    }

    /// Creates a sink with its own receiver.
    pub fn channel(peer: PeerId, serial: u64) -> (Self, mpsc::UnboundedReceiver<LinkEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(peer, serial, tx), rx)
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Emits an event. Returns `false` once the client is gone.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(LinkEnvelope {
                peer: self.peer.clone(),
                serial: self.serial,
                event,
            })
            .is_ok()
    }

    pub fn signal(&self, blob: String) -> bool {
        self.emit(LinkEvent::Signal(blob))
    }

    pub fn open(&self) -> bool {
        self.emit(LinkEvent::Open)
    }

    pub fn message(&self, frame: Vec<u8>) -> bool {
        self.emit(LinkEvent::Message(frame))
    }

    pub fn closed(&self) -> bool {
        self.emit(LinkEvent::Closed)
    }
}

/// Factory for mesh links.
pub trait MeshConnector: Send + 'static {
    type Link: MeshLink;

    /// Starts negotiating with `peer`. The initiator makes the first
    /// offer; the other side waits for it in
    /// [`accept_signal`](MeshLink::accept_signal).
    fn open(&self, peer: &PeerId, initiator: bool, events: LinkEvents) -> Self::Link;
}

/// One direct channel to one remote peer.
pub trait MeshLink: Send + 'static {
    /// Feeds negotiation data relayed from the remote peer. Malformed or
    /// unexpected blobs are dropped.
    fn accept_signal(&mut self, blob: &str);

    /// Writes one frame. A no-op while the channel is not open.
    fn send(&self, frame: &[u8]);

    /// `true` once the data channel is open and until it closes.
    fn is_open(&self) -> bool;

    /// Tears the link down. No further events are emitted.
    fn close(&mut self);
}
