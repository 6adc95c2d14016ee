//! `RelayServer` builder and accept loop.
//!
//! Ties the layers together: transport → admission → room directory,
//! plus the HTTP listing API on its own port.

use std::net::SocketAddr;
use std::sync::Arc;

use meshroom_room::{Admission, PrivateRooms, RoomConfig, RoomDirectory, StaticPrivateRooms};
use meshroom_transport::{Transport, WebSocketTransport};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::{RelayConfig, RelayError};

/// Shared relay state passed to each connection handler task.
pub(crate) struct RelayState<P: PrivateRooms> {
    pub(crate) rooms: Mutex<RoomDirectory>,
    pub(crate) admission: Admission,
    pub(crate) private_rooms: P,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,ignore
/// let server = RelayServer::builder()
///     .bind("127.0.0.1:0")
///     .http_bind(None)
///     .private_rooms(MyCodeLookup::new())
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RelayServerBuilder<P = StaticPrivateRooms> {
    bind_addr: String,
    http_addr: Option<String>,
    rooms: RoomConfig,
    allowed_origins: Option<Vec<String>>,
    allowed_rooms: Option<Vec<String>>,
    private_rooms: P,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            http_addr: Some("127.0.0.1:3001".to_string()),
            rooms: RoomConfig::default(),
            allowed_origins: None,
            allowed_rooms: None,
            private_rooms: StaticPrivateRooms::default(),
        }
    }

    /// Applies a full [`RelayConfig`]: addresses, allow-lists, capacities
    /// and the static private-room codes.
    pub fn config(self, config: RelayConfig) -> Self {
        Self {
            bind_addr: config.ws_addr(),
            http_addr: Some(config.http_addr()),
            rooms: config.rooms,
            allowed_origins: config.allowed_origins,
            allowed_rooms: config.allowed_rooms,
            private_rooms: StaticPrivateRooms::new(config.private_rooms),
        }
    }
}

impl<P: PrivateRooms> RelayServerBuilder<P> {
    /// Sets the control-channel listen address.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the HTTP API listen address. `None` disables it.
    pub fn http_bind(mut self, addr: Option<&str>) -> Self {
        self.http_addr = addr.map(str::to_owned);
        self
    }

    /// Sets capacities and the lobby name.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.rooms = config;
        self
    }

    /// Restricts accepted `Origin` headers.
    pub fn allowed_origins(mut self, origins: Option<Vec<String>>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Restricts servable world ids.
    pub fn allowed_rooms(mut self, rooms: Option<Vec<String>>) -> Self {
        self.allowed_rooms = rooms;
        self
    }

    /// Replaces the private-room lookup.
    pub fn private_rooms<Q: PrivateRooms>(self, private_rooms: Q) -> RelayServerBuilder<Q> {
        RelayServerBuilder {
            bind_addr: self.bind_addr,
            http_addr: self.http_addr,
            rooms: self.rooms,
            allowed_origins: self.allowed_origins,
            allowed_rooms: self.allowed_rooms,
            private_rooms,
        }
    }

    /// Binds both listeners.
    pub async fn build(self) -> Result<RelayServer<P>, RelayError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let http = match &self.http_addr {
            Some(addr) => Some(TcpListener::bind(addr).await.map_err(RelayError::Http)?),
            None => None,
        };

        let admission = Admission::new(&self.rooms)
            .with_allowed_origins(self.allowed_origins.clone())
            .with_allowed_rooms(self.allowed_rooms);

        let state = Arc::new(RelayState {
            rooms: Mutex::new(RoomDirectory::new(self.rooms)),
            admission,
            private_rooms: self.private_rooms,
        });

        Ok(RelayServer {
            transport,
            http,
            allowed_origins: self.allowed_origins,
            state,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer<P: PrivateRooms = StaticPrivateRooms> {
    transport: WebSocketTransport,
    http: Option<TcpListener>,
    allowed_origins: Option<Vec<String>>,
    state: Arc<RelayState<P>>,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }
}

impl<P: PrivateRooms> RelayServer<P> {
    /// Returns the control-channel address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns the HTTP API address, if enabled.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Runs the relay.
    ///
    /// Serves the HTTP API in a background task, then accepts control
    /// connections and spawns a handler task for each. Runs until the
    /// process is terminated.
    pub async fn run(mut self) -> Result<(), RelayError> {
        if let Some(listener) = self.http.take() {
            let app = crate::http::router(Arc::clone(&self.state), self.allowed_origins.as_deref());
            tracing::info!(addr = ?listener.local_addr().ok(), "HTTP API listening");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "HTTP API stopped");
                }
            });
        }

        tracing::info!("meshroom relay running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
