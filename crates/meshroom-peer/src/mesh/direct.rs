//! Direct mesh backend: one WebSocket per peer pair.
//!
//! The initiator binds a listener on an ephemeral port and offers its
//! address together with a random nonce. The answerer dials, sends the
//! nonce as its first frame, and waits for the initiator's in-band
//! `{"type":"answer"}`. Both sides report the link open once that
//! exchange completes.
//!
//! ```text
//! initiator                              answerer
//!   bind 0 ──SIGNAL {offer,address,nonce}──▶
//!          ◀───────── dial + nonce ──────────
//!   verify ─────────── {answer} ───────────▶
//!   Open                                     Open
//! ```
//!
//! No NAT traversal: the advertised address must be reachable from the
//! other peer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshroom_protocol::PeerId;
use meshroom_transport::{
    Connection, Transport, TransportError, WebSocketConnection, WebSocketTransport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{LinkEvents, MeshConnector, MeshLink};
use crate::MeshError;

/// Settings for [`DirectConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectConfig {
    /// Interface the initiator listens on.
    pub bind_ip: IpAddr,
    /// Address put in offers, when it differs from `bind_ip` (NAT, 0.0.0.0).
    pub advertise_ip: Option<IpAddr>,
    /// How long either side waits for the other's handshake frame.
    pub handshake_timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise_ip: None,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DirectSignal {
    Offer { address: String, nonce: String },
    Answer,
}

impl DirectSignal {
    fn to_json(&self) -> Result<String, MeshError> {
        serde_json::to_string(self).map_err(|e| MeshError::BadSignal(e.to_string()))
    }
}

/// Opens [`DirectLink`]s.
#[derive(Debug, Clone, Default)]
pub struct DirectConnector {
    config: DirectConfig,
}

impl DirectConnector {
    pub fn new(config: DirectConfig) -> Self {
        Self { config }
    }
}

impl MeshConnector for DirectConnector {
    type Link = DirectLink;

    fn open(&self, peer: &PeerId, initiator: bool, events: LinkEvents) -> DirectLink {
        let (out, pending_out) = mpsc::unbounded_channel();
        let mut link = DirectLink {
            peer: peer.clone(),
            config: self.config.clone(),
            events,
            open: Arc::new(AtomicBool::new(false)),
            out: Some(out),
            pending_out: Some(pending_out),
            task: None,
        };
        if initiator {
            link.start_offer();
        }
        link
    }
}

/// A direct link to one peer.
pub struct DirectLink {
    peer: PeerId,
    config: DirectConfig,
    events: LinkEvents,
    open: Arc<AtomicBool>,
    out: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Receiving end of `out`, until a negotiation task takes it.
    pending_out: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl DirectLink {
    fn start_offer(&mut self) {
        let Some(out_rx) = self.pending_out.take() else {
            return;
        };
        let (config, events, open) = (self.config.clone(), self.events.clone(), Arc::clone(&self.open));
        self.task = Some(tokio::spawn(async move {
            let result = run_offer(&config, &events, &open, out_rx).await;
            finish(&events, &open, result);
        }));
    }

    fn start_answer(&mut self, address: String, nonce: String) {
        let Some(out_rx) = self.pending_out.take() else {
            tracing::debug!(peer = %self.peer, "ignoring repeated offer");
            return;
        };
        let (config, events, open) = (self.config.clone(), self.events.clone(), Arc::clone(&self.open));
        self.task = Some(tokio::spawn(async move {
            let result = run_answer(&config, &events, &open, out_rx, &address, &nonce).await;
            finish(&events, &open, result);
        }));
    }
}

impl MeshLink for DirectLink {
    fn accept_signal(&mut self, blob: &str) {
        match serde_json::from_str::<DirectSignal>(blob) {
            Ok(DirectSignal::Offer { address, nonce }) => self.start_answer(address, nonce),
            Ok(DirectSignal::Answer) => {
                tracing::debug!(peer = %self.peer, "answers are exchanged in-band, ignoring");
            }
            Err(e) => {
                tracing::debug!(peer = %self.peer, error = %e, "dropping malformed signal");
            }
        }
    }

    fn send(&self, frame: &[u8]) {
        if !self.is_open() {
            return;
        }
        if let Some(out) = &self.out {
            let _ = out.send(frame.to_vec());
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        self.out = None;
        self.pending_out = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DirectLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn finish(events: &LinkEvents, open: &AtomicBool, result: Result<(), MeshError>) {
    if let Err(e) = result {
        tracing::debug!(peer = %events.peer(), error = %e, "direct link failed");
    }
    open.store(false, Ordering::Release);
    events.closed();
}

async fn run_offer(
    config: &DirectConfig,
    events: &LinkEvents,
    open: &AtomicBool,
    out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), MeshError> {
    let bind = SocketAddr::new(config.bind_ip, 0).to_string();
    let mut transport = WebSocketTransport::bind(&bind).await.map_err(MeshError::Bind)?;
    let local = transport
        .local_addr()
        .map_err(|e| MeshError::Bind(TransportError::AcceptFailed(e)))?;
    let address = SocketAddr::new(config.advertise_ip.unwrap_or(local.ip()), local.port());
    let nonce = format!("{:016x}", rand::random::<u64>());

    let offer = DirectSignal::Offer {
        address: address.to_string(),
        nonce: nonce.clone(),
    };
    events.signal(offer.to_json()?);

    let conn = loop {
        let conn = match transport.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(peer = %events.peer(), error = %e, "direct accept failed");
                continue;
            }
        };
        match tokio::time::timeout(config.handshake_timeout, conn.recv()).await {
            Ok(Ok(Some(proof))) if proof == nonce.as_bytes() => break conn,
            _ => {
                tracing::debug!(peer = %events.peer(), "rejecting direct connection without valid nonce");
                let _ = conn.close().await;
            }
        }
    };
    drop(transport);

    conn.send_text(&DirectSignal::Answer.to_json()?)
        .await
        .map_err(MeshError::Channel)?;
    run_open(conn, events, open, out_rx).await
}

async fn run_answer(
    config: &DirectConfig,
    events: &LinkEvents,
    open: &AtomicBool,
    out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    address: &str,
    nonce: &str,
) -> Result<(), MeshError> {
    let conn = WebSocketConnection::connect(&format!("ws://{address}/"))
        .await
        .map_err(MeshError::Connect)?;
    conn.send_text(nonce).await.map_err(MeshError::Channel)?;

    match tokio::time::timeout(config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(reply))) => match serde_json::from_slice::<DirectSignal>(&reply) {
            Ok(DirectSignal::Answer) => {}
            _ => return Err(MeshError::Handshake("unexpected handshake reply".into())),
        },
        Ok(Ok(None)) => return Err(MeshError::Handshake("closed during handshake".into())),
        Ok(Err(e)) => return Err(MeshError::Channel(e)),
        Err(_) => return Err(MeshError::Handshake("timed out".into())),
    }

    run_open(conn, events, open, out_rx).await
}

/// Pumps frames both ways until either side closes.
async fn run_open(
    conn: WebSocketConnection,
    events: &LinkEvents,
    open: &AtomicBool,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), MeshError> {
    let conn = Arc::new(conn);
    open.store(true, Ordering::Release);
    events.open();
    tracing::debug!(peer = %events.peer(), "direct link open");

    let writer = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if conn.send(&frame).await.is_err() {
                    break;
                }
            }
            let _ = conn.close().await;
        })
    };

    let result = loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                if !events.message(frame) {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(MeshError::Channel(e)),
        }
    };
    writer.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{LinkEnvelope, LinkEvent};

    async fn next(rx: &mut mpsc::UnboundedReceiver<LinkEnvelope>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed")
            .event
    }

    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<LinkEnvelope>) -> String {
        match next(rx).await {
            LinkEvent::Signal(blob) => blob,
            other => panic!("expected signal, got {other:?}"),
        }
    }

    fn pair() -> (
        DirectLink,
        mpsc::UnboundedReceiver<LinkEnvelope>,
        DirectLink,
        mpsc::UnboundedReceiver<LinkEnvelope>,
    ) {
        let connector = DirectConnector::default();
        let (a_events, a_rx) = LinkEvents::channel(PeerId::from("b"), 1);
        let (b_events, b_rx) = LinkEvents::channel(PeerId::from("a"), 1);
        let a = connector.open(&PeerId::from("b"), true, a_events);
        let b = connector.open(&PeerId::from("a"), false, b_events);
        (a, a_rx, b, b_rx)
    }

    #[tokio::test]
    async fn test_offer_answer_opens_both_sides() {
        let (a, mut a_rx, mut b, mut b_rx) = pair();
        let offer = next_signal(&mut a_rx).await;
        assert!(offer.contains(r#""type":"offer""#));
        assert!(!a.is_open());

        b.accept_signal(&offer);
        assert_eq!(next(&mut a_rx).await, LinkEvent::Open);
        assert_eq!(next(&mut b_rx).await, LinkEvent::Open);
        assert!(a.is_open() && b.is_open());

        a.send(&[1, 2, 3]);
        assert_eq!(next(&mut b_rx).await, LinkEvent::Message(vec![1, 2, 3]));
        b.send(&[9]);
        assert_eq!(next(&mut a_rx).await, LinkEvent::Message(vec![9]));
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let (a, mut a_rx, mut b, mut b_rx) = pair();
        a.send(&[0xde, 0xad]);
        b.send(&[0xbe, 0xef]);

        let offer = next_signal(&mut a_rx).await;
        b.accept_signal(&offer);
        assert_eq!(next(&mut a_rx).await, LinkEvent::Open);
        assert_eq!(next(&mut b_rx).await, LinkEvent::Open);

        a.send(&[7]);
        assert_eq!(next(&mut b_rx).await, LinkEvent::Message(vec![7]));
    }

    #[tokio::test]
    async fn test_wrong_nonce_is_turned_away() {
        let (_a, mut a_rx, mut b, mut b_rx) = pair();
        let offer = next_signal(&mut a_rx).await;
        let DirectSignal::Offer { address, .. } = serde_json::from_str(&offer).unwrap() else {
            panic!("expected offer");
        };

        let intruder = WebSocketConnection::connect(&format!("ws://{address}/")).await.unwrap();
        intruder.send_text("not-the-nonce").await.unwrap();
        assert!(matches!(intruder.recv().await, Ok(None) | Err(_)));

        b.accept_signal(&offer);
        assert_eq!(next(&mut a_rx).await, LinkEvent::Open);
        assert_eq!(next(&mut b_rx).await, LinkEvent::Open);
    }

    #[tokio::test]
    async fn test_remote_close_reports_closed() {
        let (mut a, mut a_rx, mut b, mut b_rx) = pair();
        let offer = next_signal(&mut a_rx).await;
        b.accept_signal(&offer);
        next(&mut a_rx).await;
        next(&mut b_rx).await;

        a.close();
        assert!(!a.is_open());
        assert_eq!(next(&mut b_rx).await, LinkEvent::Closed);
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_malformed_signal_is_ignored() {
        let (_a, _a_rx, mut b, mut b_rx) = pair();
        b.accept_signal("{not json");
        b.accept_signal(r#"{"type":"answer"}"#);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), b_rx.recv()).await.is_err(),
            "no events for junk signals"
        );
        assert!(!b.is_open());
    }
}
