//! Per-connection handler: admission, join, and control-message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Resolve the upgrade path and origin into a placement, or send
//!      `ERROR` and close
//!   2. Join the room directory → `JOIN` to others, `INIT` to us
//!   3. Spawn a writer draining our outbox onto the socket
//!   4. Loop: receive control messages → relay `SIGNAL`, apply `STATE`

use std::sync::Arc;

use meshroom_protocol::{ControlMessage, PeerId, RoomKey};
use meshroom_room::{PrivateRooms, RoomError};
use meshroom_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::server::RelayState;
use crate::RelayError;

/// Drop guard that removes a member from its room when the handler exits.
///
/// This ensures `LEAVE` goes out even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
struct MembershipGuard<P: PrivateRooms> {
    room: RoomKey,
    peer: PeerId,
    state: Arc<RelayState<P>>,
}

impl<P: PrivateRooms> Drop for MembershipGuard<P> {
    fn drop(&mut self) {
        let room = self.room.clone();
        let peer = self.peer.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut rooms = state.rooms.lock().await;
            if let Err(e) = rooms.leave(&room, &peer) {
                tracing::debug!(%room, %peer, error = %e, "leave failed");
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<P: PrivateRooms>(
    conn: WebSocketConnection,
    state: Arc<RelayState<P>>,
) -> Result<(), RelayError> {
    let conn_id = conn.id();
    let request = conn.request().clone();
    tracing::debug!(%conn_id, path = %request.path, "handling new connection");

    // --- Step 1: Admission ---
    let placement = match state
        .admission
        .resolve(request.origin.as_deref(), &request.path, &state.private_rooms)
        .await
    {
        Ok(placement) => placement,
        Err(e) => return reject(&conn, e).await,
    };

    // --- Step 2: Join ---
    let (outbox, inbox) = mpsc::unbounded_channel();
    let joined = {
        let mut rooms = state.rooms.lock().await;
        rooms.join(placement, outbox)
    };
    let joined = match joined {
        Ok(joined) => joined,
        Err(e) => return reject(&conn, e).await,
    };
    let _guard = MembershipGuard {
        room: joined.room.clone(),
        peer: joined.peer.clone(),
        state: Arc::clone(&state),
    };
    let (room, peer) = (joined.room, joined.peer);

    // --- Step 3: Writer ---
    let conn = Arc::new(conn);
    tokio::spawn(write_outbox(Arc::clone(&conn), inbox));

    // --- Step 4: Message loop ---
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%room, %peer, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%room, %peer, error = %e, "recv error");
                break;
            }
        };

        let msg = match ControlMessage::from_slice(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%room, %peer, error = %e, "failed to decode control message");
                continue;
            }
        };

        match msg {
            ControlMessage::Signal(payload) => {
                let target = payload.peer.clone();
                let delivered = state.rooms.lock().await.relay_signal(&room, &peer, payload);
                if !delivered {
                    tracing::warn!(%room, from = %peer, to = %target, "signal target not in room");
                }
            }
            ControlMessage::State(value) => {
                let result = state.rooms.lock().await.update_state(&room, &peer, value);
                if let Err(e) = result {
                    tracing::debug!(%room, %peer, error = %e, "state update failed");
                }
            }
            other => {
                tracing::debug!(%room, %peer, kind = other.kind(), "ignoring unexpected control message");
            }
        }
    }

    // _guard drops here → leave fires → outbox closes → writer exits.
    Ok(())
}

/// Sends queued control messages until the member is removed from its
/// room, then closes the socket.
async fn write_outbox(
    conn: Arc<WebSocketConnection>,
    mut inbox: mpsc::UnboundedReceiver<ControlMessage>,
) {
    while let Some(msg) = inbox.recv().await {
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "failed to encode control message");
                continue;
            }
        };
        if let Err(e) = conn.send_text(&text).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed");
            break;
        }
    }
    let _ = conn.close().await;
}

/// Sends `ERROR` with the rejection reason, then closes.
async fn reject(conn: &WebSocketConnection, reason: RoomError) -> Result<(), RelayError> {
    tracing::warn!(conn_id = %conn.id(), path = %conn.request().path, %reason, "admission rejected");
    let text = ControlMessage::Error(reason.to_string()).to_json()?;
    if let Err(e) = conn.send_text(&text).await {
        tracing::debug!(conn_id = %conn.id(), error = %e, "failed to send ERROR");
    }
    conn.close().await?;
    Ok(())
}
