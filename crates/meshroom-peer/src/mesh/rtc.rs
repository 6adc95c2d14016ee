//! WebRTC mesh backend.
//!
//! Standard offer/answer with trickle ICE over an unordered,
//! no-retransmit data channel, so a late pose frame is simply lost
//! instead of holding up newer ones. Signal blobs use the usual shapes:
//!
//! ```text
//! {"type":"offer","sdp":"..."}   {"type":"answer","sdp":"..."}
//! {"candidate":{"candidate":"...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! The `API` object (media engine + interceptors) is built once per
//! connector, on first use, and shared by every link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::MediaEngine;
use ::webrtc::api::{APIBuilder, API};
use ::webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use ::webrtc::data_channel::data_channel_message::DataChannelMessage;
use ::webrtc::data_channel::RTCDataChannel;
use ::webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use bytes::Bytes;
use meshroom_protocol::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use super::{LinkEvents, MeshConnector, MeshLink};
use crate::MeshError;

const CHANNEL_LABEL: &str = "meshroom";

/// ICE settings for [`WebRtcConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RtcSignal {
    Description {
        #[serde(rename = "type")]
        kind: SdpKind,
        sdp: String,
    },
    Candidate {
        candidate: RTCIceCandidateInit,
    },
}

impl RtcSignal {
    fn to_json(&self) -> Result<String, MeshError> {
        serde_json::to_string(self).map_err(|e| MeshError::BadSignal(e.to_string()))
    }
}

/// Opens [`WebRtcLink`]s.
#[derive(Clone, Default)]
pub struct WebRtcConnector {
    config: WebRtcConfig,
    api: Arc<OnceCell<API>>,
}

impl WebRtcConnector {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            config,
            api: Arc::new(OnceCell::new()),
        }
    }
}

impl MeshConnector for WebRtcConnector {
    type Link = WebRtcLink;

    fn open(&self, peer: &PeerId, initiator: bool, events: LinkEvents) -> WebRtcLink {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (out, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let task = {
            let api = Arc::clone(&self.api);
            let config = self.config.clone();
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let result =
                    run_link(&api, &config, &events, &shared, initiator, signal_rx, out_rx).await;
                if let Err(e) = result {
                    tracing::debug!(peer = %events.peer(), error = %e, "webrtc link failed");
                }
                shared.open.store(false, Ordering::Release);
                events.closed();
            })
        };

        WebRtcLink {
            peer: peer.clone(),
            shared,
            signals,
            out: Some(out),
            task: Some(task),
        }
    }
}

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    connection: Mutex<Option<Arc<RTCPeerConnection>>>,
}

impl Shared {
    fn channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel.lock().ok().and_then(|slot| slot.clone())
    }
}

/// A WebRTC link to one peer.
pub struct WebRtcLink {
    peer: PeerId,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<String>,
    out: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl MeshLink for WebRtcLink {
    fn accept_signal(&mut self, blob: &str) {
        if self.signals.send(blob.to_owned()).is_err() {
            tracing::debug!(peer = %self.peer, "signal for finished link dropped");
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
        self.shared.open.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        self.out = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let connection = self.shared.connection.lock().ok().and_then(|mut slot| slot.take());
        if let Some(connection) = connection {
            tokio::spawn(async move {
                let _ = connection.close().await;
            });
        }
    }
}

impl Drop for WebRtcLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn build_api() -> Result<API, MeshError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}

async fn run_link(
    api: &OnceCell<API>,
    config: &WebRtcConfig,
    events: &LinkEvents,
    shared: &Arc<Shared>,
    initiator: bool,
    mut signals: mpsc::UnboundedReceiver<String>,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), MeshError> {
    let api = api.get_or_try_init(build_api).await?;
    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: config.ice_servers.clone(),
            username: String::new(),
            credential: String::new(),
        }],
        ..Default::default()
    };
    let connection = Arc::new(api.new_peer_connection(rtc_config).await?);
    if let Ok(mut slot) = shared.connection.lock() {
        *slot = Some(Arc::clone(&connection));
    }

    let state_events = events.clone();
    connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            tracing::debug!(peer = %events.peer(), ?state, "peer connection state");
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                events.closed();
            }
        })
    }));

    let ice_events = events.clone();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            let Ok(candidate) = candidate.to_json() else { return };
            if let Ok(blob) = (RtcSignal::Candidate { candidate }).to_json() {
                events.signal(blob);
            }
        })
    }));

    if initiator {
        let init = RTCDataChannelInit {
            ordered: Some(false),
            max_retransmits: Some(0),
            ..Default::default()
        };
        let channel = connection.create_data_channel(CHANNEL_LABEL, Some(init)).await?;
        wire_channel(channel, events.clone(), Arc::clone(shared));

        let offer = connection.create_offer(None).await?;
        connection.set_local_description(offer.clone()).await?;
        events.signal(
            RtcSignal::Description {
                kind: SdpKind::Offer,
                sdp: offer.sdp,
            }
            .to_json()?,
        );
    } else {
        let channel_events = events.clone();
        let channel_shared = Arc::clone(shared);
        connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            wire_channel(channel, channel_events.clone(), Arc::clone(&channel_shared));
            Box::pin(async {})
        }));
    }

    let mut pending = Vec::new();
    loop {
        tokio::select! {
            blob = signals.recv() => {
                let Some(blob) = blob else { break };
                if let Err(e) = apply_signal(&connection, events, &blob, &mut pending).await {
                    tracing::debug!(peer = %events.peer(), error = %e, "dropping signal");
                }
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Some(channel) = shared.channel() {
                    if let Err(e) = channel.send(&Bytes::from(frame)).await {
                        tracing::trace!(peer = %events.peer(), error = %e, "data channel send failed");
                    }
                }
            }
        }
    }

    connection.close().await?;
    Ok(())
}

/// Hooks a data channel's callbacks up to the link's events.
fn wire_channel(channel: Arc<RTCDataChannel>, events: LinkEvents, shared: Arc<Shared>) {
    let opened = Arc::clone(&channel);
    let open_events = events.clone();
    let open_shared = Arc::clone(&shared);
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            if let Ok(mut slot) = open_shared.channel.lock() {
                *slot = Some(opened);
            }
            open_shared.open.store(true, Ordering::Release);
            open_events.open();
        })
    }));

    let message_events = events.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            events.message(msg.data.to_vec());
        })
    }));

    channel.on_close(Box::new(move || {
        let events = events.clone();
        let shared = Arc::clone(&shared);
        Box::pin(async move {
            shared.open.store(false, Ordering::Release);
            events.closed();
        })
    }));
}

async fn apply_signal(
    connection: &RTCPeerConnection,
    events: &LinkEvents,
    blob: &str,
    pending: &mut Vec<RTCIceCandidateInit>,
) -> Result<(), MeshError> {
    let signal: RtcSignal =
        serde_json::from_str(blob).map_err(|e| MeshError::BadSignal(e.to_string()))?;

    match signal {
        RtcSignal::Description { kind: SdpKind::Offer, sdp } => {
            connection
                .set_remote_description(RTCSessionDescription::offer(sdp)?)
                .await?;
            flush_candidates(connection, pending).await?;
            let answer = connection.create_answer(None).await?;
            connection.set_local_description(answer.clone()).await?;
            events.signal(
                RtcSignal::Description {
                    kind: SdpKind::Answer,
                    sdp: answer.sdp,
                }
                .to_json()?,
            );
        }
        RtcSignal::Description { kind: SdpKind::Answer, sdp } => {
            connection
                .set_remote_description(RTCSessionDescription::answer(sdp)?)
                .await?;
            flush_candidates(connection, pending).await?;
        }
        RtcSignal::Candidate { candidate } => {
            // Candidates can outrun the description they belong to.
            if connection.remote_description().await.is_some() {
                connection.add_ice_candidate(candidate).await?;
            } else {
                pending.push(candidate);
            }
        }
    }
    Ok(())
}

async fn flush_candidates(
    connection: &RTCPeerConnection,
    pending: &mut Vec<RTCIceCandidateInit>,
) -> Result<(), MeshError> {
    for candidate in pending.drain(..) {
        connection.add_ice_candidate(candidate).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_signal_shape() {
        let blob = RtcSignal::Description {
            kind: SdpKind::Offer,
            sdp: "v=0".into(),
        }
        .to_json()
        .unwrap();
        assert_eq!(blob, r#"{"type":"offer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_candidate_signal_parses() {
        let blob = r#"{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match serde_json::from_str::<RtcSignal>(blob).unwrap() {
            RtcSignal::Candidate { candidate } => assert!(candidate.candidate.contains("typ host")),
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_signal_is_rejected() {
        assert!(serde_json::from_str::<RtcSignal>(r#"{"type":"renegotiate"}"#).is_err());
    }
}
