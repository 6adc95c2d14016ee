//! HTTP side API: room listing and clock sync.
//!
//! Served on its own port next to the control channel.
//!
//! - `GET /peers` → `{ "<worldId>-<instance>": memberCount, ... }` for
//!   every public, non-empty instance
//! - `GET /sync`  → the relay's Unix time in milliseconds, as text

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use meshroom_room::PrivateRooms;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::server::RelayState;

const NO_STORE: [(header::HeaderName, &str); 1] = [(header::CACHE_CONTROL, "no-store")];

/// Builds the router. With an origin allow-list, CORS is limited to it.
pub(crate) fn router<P: PrivateRooms>(
    state: Arc<RelayState<P>>,
    allowed_origins: Option<&[String]>,
) -> Router {
    let cors = match allowed_origins {
        None => CorsLayer::permissive(),
        Some(origins) => CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_origin(AllowOrigin::list(
                origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok()),
            )),
    };

    Router::new()
        .route("/peers", get(peers::<P>))
        .route("/sync", get(sync))
        .layer(cors)
        .with_state(state)
}

async fn peers<P: PrivateRooms>(
    State(state): State<Arc<RelayState<P>>>,
) -> impl IntoResponse {
    let listing: BTreeMap<String, usize> = state.rooms.lock().await.listing();
    (NO_STORE, Json(listing))
}

async fn sync() -> impl IntoResponse {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    (NO_STORE, now.to_string())
}
