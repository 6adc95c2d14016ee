//! Joins a room without a renderer and logs who comes and goes.
//!
//! ```text
//! MESHROOM_URL=ws://127.0.0.1:3000 MESHROOM_ROOM=Menu cargo run -p headless-peer
//! ```

use std::time::Duration;

use meshroom_peer::prelude::*;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

struct Logger;

impl RoomObserver for Logger {
    fn on_join(&mut self, peer: &PeerId) {
        tracing::info!(%peer, "joined");
    }

    fn on_leave(&mut self, peer: &PeerId) {
        tracing::info!(%peer, "left");
    }

    fn on_ready(&mut self, peer: &PeerId) {
        tracing::info!(%peer, "mesh link open");
    }

    fn on_identity(&mut self, peer: &PeerId, identity: &str) {
        tracing::info!(%peer, identity, "identity");
    }

    fn on_pose(&mut self, peer: &PeerId, pose: &Pose) {
        tracing::trace!(%peer, head = ?pose.head.position, "pose");
    }

    fn on_message(&mut self, peer: &PeerId, message: &Broadcast) {
        match message {
            Broadcast::Json(value) => tracing::info!(%peer, %value, "broadcast"),
            Broadcast::Binary(bytes) => tracing::info!(%peer, len = bytes.len(), "binary broadcast"),
        }
    }

    fn on_state(&mut self, state: &Value) {
        tracing::info!(%state, "room state");
    }

    fn on_update(&mut self, patch: &Value) {
        tracing::info!(%patch, "room state patch");
    }

    fn on_error(&mut self, reason: &str) {
        tracing::error!(reason, "relay rejected us");
    }
}

/// Head bobbing on a slow sine so other peers see movement.
fn pose_at(t: f32) -> Pose {
    Pose {
        head: Transform {
            position: [0.0, 1.6 + 0.05 * t.sin(), 0.0],
            orientation: Transform::IDENTITY.orientation,
        },
        hands: None,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("MESHROOM_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000".into());
    let room = std::env::var("MESHROOM_ROOM").unwrap_or_else(|_| "Menu".into());
    let identity = std::env::var("MESHROOM_IDENTITY").unwrap_or_else(|_| "headless".into());

    let config = ClientConfig::new(url, room).with_identity(identity.clone());
    let client = PeerClient::spawn(config, Logger);

    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let started = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let t = started.elapsed().as_secs_f32();
                if client.set_pose(Some(pose_at(t))).is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = client.broadcast(Broadcast::Json(json!({ "bye": identity })));
                break;
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        tracing::warn!(error = %e, "client already gone");
    }
}
