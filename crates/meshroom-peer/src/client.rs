//! The client task and its handle.
//!
//! [`PeerClient`] is a cheap, cloneable handle. All state lives on one
//! spawned task that owns the signaling client, every
//! [`PeerConnection`] and the application's [`RoomObserver`]:
//!
//! ```text
//! PeerClient ──Command──▶ ┌─────────────┐ ◀──ControlEvent── relay socket
//!                         │ client task │ ◀──LinkEnvelope── mesh links
//!              interval ─▶└─────────────┘ ──callbacks──▶ RoomObserver
//! ```

use std::collections::HashMap;

use meshroom_protocol::wire::{self, Broadcast, Frame, Pose};
use meshroom_protocol::{ControlMessage, InitPayload, PeerId, SignalPayload};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

use crate::mesh::{DirectConnector, LinkEnvelope, LinkEvent, LinkEvents, MeshConnector};
use crate::peer::{LinkState, PeerConnection};
use crate::signaling::{ControlEvent, Signal, SignalingClient, SignalingState};
use crate::{ClientConfig, PeerError, RoomObserver};

/// Snapshot of one remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub state: LinkState,
    /// Identity payload the peer sent us, if any.
    pub identity: Option<String>,
    /// Last pose received.
    pub pose: Option<Pose>,
}

/// Snapshot of the client as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub state: SignalingState,
    /// Why the relay turned us away, if it did.
    pub rejection: Option<String>,
    pub peer_count: usize,
    pub ready_count: usize,
}

enum Command {
    SetPose(Option<Pose>),
    Broadcast(Broadcast),
    SetIdentity(Option<String>),
    UpdateState(Value),
    Tick,
    Connect,
    Disconnect,
    Peers(oneshot::Sender<Vec<PeerInfo>>),
    Status(oneshot::Sender<ClientStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running client task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called or the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct PeerClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl PeerClient {
    /// Spawns a client on the built-in direct mesh backend and starts
    /// connecting. Must be called inside a Tokio runtime.
    pub fn spawn<O: RoomObserver>(config: ClientConfig, observer: O) -> Self {
        let connector = DirectConnector::new(config.mesh.clone());
        Self::spawn_with(config, connector, observer)
    }

    /// Spawns a client on a custom mesh backend.
    pub fn spawn_with<C, O>(config: ClientConfig, connector: C, observer: O) -> Self
    where
        C: MeshConnector,
        O: RoomObserver,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = ClientTask::new(config, connector, observer);
        tokio::spawn(task.run(command_rx));
        Self { commands }
    }

    fn send(&self, command: Command) -> Result<(), PeerError> {
        self.commands.send(command).map_err(|_| PeerError::ClientGone)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| PeerError::ClientGone)
    }

    /// Sets the local pose sent on every tick. `None` stops pose traffic.
    pub fn set_pose(&self, pose: Option<Pose>) -> Result<(), PeerError> {
        self.send(Command::SetPose(pose))
    }

    /// Sends a broadcast to every ready peer.
    pub fn broadcast(&self, message: Broadcast) -> Result<(), PeerError> {
        self.send(Command::Broadcast(message))
    }

    /// Replaces the identity payload. Every open link re-sends it ahead
    /// of its next frame.
    pub fn set_identity(&self, identity: Option<String>) -> Result<(), PeerError> {
        self.send(Command::SetIdentity(identity))
    }

    /// Sends a `STATE` message to the relay. An object is merged into
    /// the room state; anything else replaces it.
    pub fn update_state(&self, state: Value) -> Result<(), PeerError> {
        self.send(Command::UpdateState(state))
    }

    /// Sends the current pose now, outside the timer.
    pub fn tick(&self) -> Result<(), PeerError> {
        self.send(Command::Tick)
    }

    /// Reconnects after [`disconnect`](Self::disconnect) or a rejection.
    pub fn connect(&self) -> Result<(), PeerError> {
        self.send(Command::Connect)
    }

    /// Leaves the room and stops reconnecting.
    pub fn disconnect(&self) -> Result<(), PeerError> {
        self.send(Command::Disconnect)
    }

    /// Current peers, sorted by id.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, PeerError> {
        self.request(Command::Peers).await
    }

    pub async fn status(&self) -> Result<ClientStatus, PeerError> {
        self.request(Command::Status).await
    }

    /// Tears everything down and waits for the task to finish.
    pub async fn shutdown(&self) -> Result<(), PeerError> {
        self.request(Command::Shutdown).await
    }
}

// ---------------------------------------------------------------------------
// Client task
// ---------------------------------------------------------------------------

struct ClientTask<C: MeshConnector, O: RoomObserver> {
    config: ClientConfig,
    connector: C,
    observer: O,
    signaling: SignalingClient,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    link_tx: mpsc::UnboundedSender<LinkEnvelope>,
    link_rx: mpsc::UnboundedReceiver<LinkEnvelope>,
    peers: HashMap<PeerId, PeerConnection<C::Link>>,
    next_serial: u64,
    pose: Option<Pose>,
    identity: Option<String>,
}

impl<C: MeshConnector, O: RoomObserver> ClientTask<C, O> {
    fn new(config: ClientConfig, connector: C, observer: O) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let signaling = SignalingClient::new(
            config.control_url(),
            config.origin.clone(),
            config.reconnect_delay,
            control_tx,
        );
        let identity = config.identity.clone();
        Self {
            config,
            connector,
            observer,
            signaling,
            control_rx,
            link_tx,
            link_rx,
            peers: HashMap::new(),
            next_serial: 0,
            pose: None,
            identity,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = self.config.tick_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        tracing::info!(url = %self.config.control_url(), "peer client starting");
        self.signaling.connect();

        let ack = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => break Some(ack),
                    Some(command) => self.handle_command(command),
                    None => break None,
                },
                Some(event) = self.control_rx.recv() => self.handle_control(event),
                Some(envelope) = self.link_rx.recv() => self.handle_link(envelope),
                _ = next_tick(&mut ticker) => self.tick(),
            }
        };

        self.signaling.disconnect();
        self.reset_peers();
        tracing::info!("peer client stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetPose(pose) => self.pose = pose,
            Command::Broadcast(message) => {
                let frame = wire::encode_broadcast(&message);
                let sent = self.send_to_ready(&frame);
                tracing::debug!(sent, "broadcast");
            }
            Command::SetIdentity(identity) => {
                self.identity = identity;
                for peer in self.peers.values_mut() {
                    peer.reset_identity();
                }
            }
            Command::UpdateState(state) => self.signaling.send(&ControlMessage::State(state)),
            Command::Tick => self.tick(),
            Command::Connect => self.signaling.connect(),
            Command::Disconnect => {
                self.signaling.disconnect();
                self.reset_peers();
            }
            Command::Peers(reply) => {
                let mut peers: Vec<PeerInfo> = self
                    .peers
                    .values()
                    .map(|peer| PeerInfo {
                        id: peer.id().clone(),
                        state: peer.state(),
                        identity: peer.remote_identity().map(str::to_owned),
                        pose: peer.pose().copied(),
                    })
                    .collect();
                peers.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(peers);
            }
            Command::Status(reply) => {
                let _ = reply.send(ClientStatus {
                    state: self.signaling.state(),
                    rejection: self.signaling.rejection().map(str::to_owned),
                    peer_count: self.peers.len(),
                    ready_count: self.peers.values().filter(|p| p.is_ready()).count(),
                });
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    fn tick(&mut self) {
        let Some(pose) = self.pose else { return };
        let frame = wire::encode_pose(&pose);
        let sent = self.send_to_ready(&frame);
        tracing::trace!(sent, "pose tick");
    }

    /// Sends `frame` to every ready peer. Returns how many got it.
    fn send_to_ready(&mut self, frame: &[u8]) -> usize {
        let identity = self.identity.as_deref();
        self.peers
            .values_mut()
            .map(|peer| peer.send(frame, identity))
            .filter(|sent| *sent)
            .count()
    }

    // -- control channel ----------------------------------------------------

    fn handle_control(&mut self, event: ControlEvent) {
        match self.signaling.handle(event) {
            Some(Signal::Message(msg)) => self.handle_message(msg),
            Some(Signal::Lost) => self.reset_peers(),
            Some(Signal::Rejected(reason)) => self.observer.on_error(&reason),
            None => {}
        }
    }

    fn handle_message(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Init(InitPayload { peers, state }) => {
                self.reset_peers();
                for id in peers {
                    self.add_peer(id, true);
                }
                if let Some(state) = state {
                    self.observer.on_state(&state);
                }
            }
            ControlMessage::Join(id) => self.add_peer(id, false),
            ControlMessage::Leave(id) => self.remove_peer(&id),
            ControlMessage::Signal(SignalPayload { peer, signal }) => {
                match self.peers.get_mut(&peer) {
                    Some(conn) => conn.accept_signal(&signal),
                    None => tracing::debug!(%peer, "signal for unknown peer dropped"),
                }
            }
            ControlMessage::State(state) => self.observer.on_state(&state),
            ControlMessage::Update(patch) => self.observer.on_update(&patch),
            // Consumed by the signaling client.
            ControlMessage::Error(_) => {}
        }
    }

    fn add_peer(&mut self, id: PeerId, initiator: bool) {
        self.next_serial += 1;
        let serial = self.next_serial;
        let events = LinkEvents::new(id.clone(), serial, self.link_tx.clone());
        let link = self.connector.open(&id, initiator, events);
        let replaced = self
            .peers
            .insert(id.clone(), PeerConnection::new(id.clone(), link, serial))
            .is_some();

        tracing::info!(peer = %id, initiator, "peer joined");
        if !replaced {
            self.observer.on_join(&id);
        }
    }

    fn remove_peer(&mut self, id: &PeerId) {
        if let Some(mut peer) = self.peers.remove(id) {
            peer.close();
            tracing::info!(peer = %id, "peer left");
            self.observer.on_leave(id);
        }
    }

    fn reset_peers(&mut self) {
        for (id, mut peer) in self.peers.drain() {
            peer.close();
            self.observer.on_leave(&id);
        }
    }

    // -- mesh links ---------------------------------------------------------

    fn handle_link(&mut self, envelope: LinkEnvelope) {
        let LinkEnvelope { peer: id, serial, event } = envelope;
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.serial() != serial {
            return;
        }

        match event {
            LinkEvent::Signal(signal) => {
                self.signaling
                    .send(&ControlMessage::Signal(SignalPayload { peer: id, signal }));
            }
            LinkEvent::Open => {
                peer.mark_open();
                tracing::info!(peer = %id, "mesh link ready");
                self.observer.on_ready(&id);
            }
            LinkEvent::Message(frame) => self.handle_frame(&id, &frame),
            LinkEvent::Closed => {
                tracing::debug!(peer = %id, "mesh link closed");
                self.remove_peer(&id);
            }
        }
    }

    fn handle_frame(&mut self, id: &PeerId, frame: &[u8]) {
        let frame = match wire::decode_frame(frame) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(peer = %id, error = %e, "dropping bad frame");
                return;
            }
        };

        match frame {
            Frame::Pose(pose) => {
                if let Some(peer) = self.peers.get_mut(id) {
                    peer.set_pose(pose);
                }
                self.observer.on_pose(id, &pose);
            }
            Frame::Broadcast(message) => self.observer.on_message(id, &message),
            Frame::Identity(identity) => {
                if let Some(peer) = self.peers.get_mut(id) {
                    peer.set_remote_identity(identity.clone());
                }
                self.observer.on_identity(id, &identity);
            }
            Frame::Unknown(raw) => self.observer.on_legacy(id, &raw),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
