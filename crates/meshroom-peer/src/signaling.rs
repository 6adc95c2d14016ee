//! Control connection to the relay.
//!
//! [`SignalingClient`] is driven by the client task: it spawns one
//! connection task per attempt and turns what comes back on the
//! [`ControlEvent`] channel into [`Signal`]s. Every attempt gets a new
//! epoch, and events from older attempts are ignored.

use std::sync::Arc;
use std::time::Duration;

use meshroom_protocol::ControlMessage;
use meshroom_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Where the control connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    /// Dialing, or connected and waiting for `INIT`.
    Connecting,
    /// `INIT` received.
    Joined,
}

/// Raw output of connection tasks and retry timers.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Opened { epoch: u64 },
    Message { epoch: u64, msg: ControlMessage },
    Closed { epoch: u64 },
    Retry { epoch: u64 },
}

/// What the client task has to act on.
#[derive(Debug, PartialEq)]
pub(crate) enum Signal {
    Message(ControlMessage),
    /// The connection dropped. A retry is scheduled unless we were
    /// rejected or told to disconnect.
    Lost,
    /// The relay sent `ERROR`. No retry will follow.
    Rejected(String),
}

pub(crate) struct SignalingClient {
    url: String,
    origin: Option<String>,
    reconnect_delay: Duration,
    state: SignalingState,
    epoch: u64,
    outbox: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    rejection: Option<String>,
    stopped: bool,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl SignalingClient {
    pub(crate) fn new(
        url: String,
        origin: Option<String>,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            url,
            origin,
            reconnect_delay,
            state: SignalingState::Disconnected,
            epoch: 0,
            outbox: None,
            task: None,
            rejection: None,
            stopped: true,
            events,
        }
    }

    pub(crate) fn state(&self) -> SignalingState {
        self.state
    }

    /// The relay's reason, if it rejected the last attempt.
    pub(crate) fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    /// Starts connecting, unless a connection is already up or underway.
    /// Clears a previous rejection.
    pub(crate) fn connect(&mut self) {
        self.stopped = false;
        self.rejection = None;
        if self.state == SignalingState::Disconnected {
            self.start();
        }
    }

    /// Drops the connection and stops reconnecting.
    pub(crate) fn disconnect(&mut self) {
        self.stopped = true;
        self.epoch += 1;
        self.teardown();
        self.state = SignalingState::Disconnected;
    }

    /// Best-effort send. Dropped when there is no connection.
    pub(crate) fn send(&self, msg: &ControlMessage) {
        let Some(outbox) = &self.outbox else {
            tracing::debug!(kind = msg.kind(), "no control connection, dropping message");
            return;
        };
        match msg.to_json() {
            Ok(text) => {
                let _ = outbox.send(text);
            }
            Err(e) => tracing::debug!(kind = msg.kind(), error = %e, "failed to encode control message"),
        }
    }

    pub(crate) fn handle(&mut self, event: ControlEvent) -> Option<Signal> {
        match event {
            ControlEvent::Opened { epoch } if epoch == self.epoch => {
                tracing::debug!(url = %self.url, "control connection open, waiting for INIT");
                None
            }
            ControlEvent::Message { epoch, msg } if epoch == self.epoch => match msg {
                ControlMessage::Error(reason) => {
                    tracing::warn!(url = %self.url, %reason, "relay rejected connection");
                    self.rejection = Some(reason.clone());
                    Some(Signal::Rejected(reason))
                }
                ControlMessage::Init(_) => {
                    if self.state != SignalingState::Joined {
                        tracing::info!(url = %self.url, "joined room");
                    }
                    self.state = SignalingState::Joined;
                    Some(Signal::Message(msg))
                }
                msg => Some(Signal::Message(msg)),
            },
            ControlEvent::Closed { epoch } if epoch == self.epoch => {
                self.teardown();
                self.state = SignalingState::Disconnected;
                if !self.stopped && self.rejection.is_none() {
                    tracing::info!(delay = ?self.reconnect_delay, "control connection lost, retrying");
                    self.schedule_retry();
                }
                Some(Signal::Lost)
            }
            ControlEvent::Retry { epoch } if epoch == self.epoch => {
                if self.state == SignalingState::Disconnected
                    && !self.stopped
                    && self.rejection.is_none()
                {
                    self.start();
                }
                None
            }
            stale => {
                tracing::trace!(?stale, current = self.epoch, "ignoring stale control event");
                None
            }
        }
    }

    fn start(&mut self) {
        self.epoch += 1;
        self.state = SignalingState::Connecting;
        let (outbox, out_rx) = mpsc::unbounded_channel();
        self.outbox = Some(outbox);
        self.task = Some(tokio::spawn(run_connection(
            self.url.clone(),
            self.origin.clone(),
            self.epoch,
            out_rx,
            self.events.clone(),
        )));
    }

    fn teardown(&mut self) {
        // Dropping the outbox lets the writer close the socket.
        self.outbox = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn schedule_retry(&self) {
        let (epoch, delay, events) = (self.epoch, self.reconnect_delay, self.events.clone());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControlEvent::Retry { epoch });
        });
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_connection(
    url: String,
    origin: Option<String>,
    epoch: u64,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ControlEvent>,
) {
    let conn = match WebSocketConnection::connect_with_origin(&url, origin.as_deref()).await {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            tracing::debug!(%url, error = %e, "control dial failed");
            let _ = events.send(ControlEvent::Closed { epoch });
            return;
        }
    };
    let _ = events.send(ControlEvent::Opened { epoch });

    let writer = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = conn.send_text(&text).await {
                    tracing::debug!(error = %e, "control send failed");
                    break;
                }
            }
            let _ = conn.close().await;
        })
    };

    loop {
        match conn.recv().await {
            Ok(Some(data)) => match ControlMessage::from_slice(&data) {
                Ok(msg) => {
                    if events.send(ControlEvent::Message { epoch, msg }).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "ignoring unparseable control message"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "control connection failed");
                break;
            }
        }
    }

    writer.abort();
    let _ = events.send(ControlEvent::Closed { epoch });
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshroom_protocol::InitPayload;

    // Nothing listens on port 1 on a test machine.
    const DEAD_URL: &str = "ws://127.0.0.1:1/Menu";

    fn client(delay_ms: u64) -> (SignalingClient, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = SignalingClient::new(
            DEAD_URL.to_owned(),
            None,
            Duration::from_millis(delay_ms),
            tx,
        );
        (client, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ControlEvent>) -> ControlEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for control event")
            .expect("event channel closed")
    }

    fn init() -> ControlMessage {
        ControlMessage::Init(InitPayload {
            peers: vec![],
            state: None,
        })
    }

    #[tokio::test]
    async fn test_failed_dial_retries_after_delay() {
        let (mut client, mut rx) = client(50);
        client.connect();
        assert_eq!(client.state(), SignalingState::Connecting);

        let closed = next(&mut rx).await;
        assert!(matches!(closed, ControlEvent::Closed { epoch: 1 }));
        assert_eq!(client.handle(closed), Some(Signal::Lost));
        assert_eq!(client.state(), SignalingState::Disconnected);

        let retry = next(&mut rx).await;
        assert!(matches!(retry, ControlEvent::Retry { epoch: 1 }));
        assert_eq!(client.handle(retry), None);
        assert_eq!(client.state(), SignalingState::Connecting);
        assert!(matches!(next(&mut rx).await, ControlEvent::Closed { epoch: 2 }));
    }

    #[tokio::test]
    async fn test_error_suppresses_reconnect() {
        let (mut client, mut rx) = client(20);
        client.connect();
        let closed = next(&mut rx).await;

        let error = ControlEvent::Message {
            epoch: 1,
            msg: ControlMessage::Error("Room not allowed.".into()),
        };
        assert_eq!(
            client.handle(error),
            Some(Signal::Rejected("Room not allowed.".into()))
        );
        assert_eq!(client.handle(closed), Some(Signal::Lost));
        assert_eq!(client.rejection(), Some("Room not allowed."));

        let quiet = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(quiet.is_err(), "no retry after rejection");
        assert_eq!(client.state(), SignalingState::Disconnected);
    }

    #[tokio::test]
    async fn test_init_moves_to_joined() {
        let (mut client, _rx) = client(1000);
        client.connect();
        let signal = client.handle(ControlEvent::Message { epoch: 1, msg: init() });
        assert_eq!(signal, Some(Signal::Message(init())));
        assert_eq!(client.state(), SignalingState::Joined);
    }

    #[tokio::test]
    async fn test_stale_epochs_are_ignored() {
        let (mut client, _rx) = client(1000);
        client.connect();
        client.disconnect();
        assert_eq!(client.handle(ControlEvent::Message { epoch: 1, msg: init() }), None);
        assert_eq!(client.handle(ControlEvent::Closed { epoch: 1 }), None);
        assert_eq!(client.handle(ControlEvent::Retry { epoch: 1 }), None);
        assert_eq!(client.state(), SignalingState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let (mut client, mut rx) = client(30);
        client.connect();
        let closed = next(&mut rx).await;
        client.handle(closed);
        client.disconnect();

        let retry = next(&mut rx).await;
        assert_eq!(client.handle(retry), None);
        assert_eq!(client.state(), SignalingState::Disconnected);
    }

    #[test]
    fn test_send_without_connection_is_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SignalingClient::new(DEAD_URL.into(), None, Duration::from_secs(1), tx);
        client.send(&ControlMessage::State(serde_json::json!({ "a": 1 })));
    }
}
