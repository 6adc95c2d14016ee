//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Transport, TransportError, UpgradeRequest};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn next_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

fn io_error(
    kind: std::io::ErrorKind,
    e: tokio_tungstenite::tungstenite::Error,
) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let mut request = UpgradeRequest::default();
        let capture = |req: &Request,
                       resp: Response|
         -> Result<Response, ErrorResponse> {
            request.path = req.uri().path().to_string();
            request.origin = req
                .headers()
                .get(ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Ok(resp)
        };

        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(stream),
            capture,
        )
        .await
        .map_err(|e| {
            TransportError::AcceptFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = next_id();
        tracing::debug!(%id, %addr, path = %request.path, "accepted WebSocket connection");

        Ok(WebSocketConnection::new(id, ws, request))
    }
}

/// A single WebSocket connection, either accepted or dialed.
///
/// The read and write halves are locked independently, so one task can
/// sit in [`recv`](Connection::recv) while others send.
pub struct WebSocketConnection {
    id: ConnectionId,
    request: UpgradeRequest,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, ws: WsStream, request: UpgradeRequest) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            request,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// Dials a WebSocket server at `url` (`ws://host:port/path`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::connect_with_origin(url, None).await
    }

    /// Dials a WebSocket server, sending `origin` as the `Origin` header.
    pub async fn connect_with_origin(
        url: &str,
        origin: Option<&str>,
    ) -> Result<Self, TransportError> {
        let connect_err = |e| {
            TransportError::ConnectFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        };

        let mut req = url.into_client_request().map_err(connect_err)?;
        if let Some(origin) = origin {
            let value = HeaderValue::from_str(origin).map_err(|e| {
                TransportError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e,
                ))
            })?;
            req.headers_mut().insert(ORIGIN, value);
        }
        let path = req.uri().path().to_string();

        let (ws, _) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(connect_err)?;

        let id = next_id();
        tracing::debug!(%id, url, "dialed WebSocket connection");

        Ok(Self::new(
            id,
            ws,
            UpgradeRequest {
                path,
                origin: origin.map(str::to_owned),
            },
        ))
    }

    /// The upgrade request this connection was opened with.
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_message(Message::Binary(data.to_vec().into())).await
    }

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.send_message(Message::text(text.to_owned())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
