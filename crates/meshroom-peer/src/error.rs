//! Error types for the peer client.

use meshroom_protocol::ProtocolError;
use meshroom_transport::TransportError;

/// Errors surfaced by [`PeerClient`](crate::PeerClient).
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The client task has shut down.
    #[error("peer client is no longer running")]
    ClientGone,
}

/// Errors inside a mesh backend while negotiating or running a link.
///
/// These never leave the backend. They are logged and the link is
/// reported closed, so one failed peer does not affect the rest.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Binding the local listener failed.
    #[error("bind failed: {0}")]
    Bind(#[source] TransportError),

    /// Dialing the remote side failed.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// The open channel failed.
    #[error("channel failed: {0}")]
    Channel(#[source] TransportError),

    /// The link handshake went wrong.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A relayed signal blob could not be understood.
    #[error("malformed signal: {0}")]
    BadSignal(String),

    #[cfg(feature = "webrtc")]
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
}
