//! The gateway's text-frame transport.
//!
//! The voice gateway is spoken over any bidirectional text channel; hosts
//! inject one through [`WsConnector`]. [`TlsConnector`] is the default,
//! production implementation over a TLS WebSocket.

use crate::model::Event;

use futures::{future::BoxFuture, SinkExt, StreamExt};
use serde_json::Error as JsonError;
use tokio::{
    net::TcpStream,
    time::{timeout, Duration},
};
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig as WsConfig},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::debug;
use url::Url;

/// One established bidirectional text-frame channel.
///
/// `recv_text` yields `Ok(None)` for non-text frames the transport absorbs
/// (ping/pong); a server- or peer-initiated close surfaces as
/// [`Error::WsClosed`].
pub trait WsTransport: Send {
    /// Sends one text frame.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>>;

    /// Awaits the next text frame.
    fn recv_text(&mut self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Closes the channel with the given close code.
    fn close(&mut self, code: u16) -> BoxFuture<'_, Result<()>>;
}

/// Opens [`WsTransport`]s for new sessions.
pub trait WsConnector: Send + Sync {
    /// Establishes a channel to `url`.
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Box<dyn WsTransport>>>;
}

/// Default connector: TLS WebSocket with unbounded frame sizes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsConnector;

impl WsConnector for TlsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Box<dyn WsTransport>>> {
        Box::pin(async move {
            let (stream, _) = tokio_tungstenite::connect_async_with_config(
                url.as_str(),
                Some(WsConfig {
                    max_message_size: None,
                    max_frame_size: None,
                    ..Default::default()
                }),
                true,
            )
            .await?;

            Ok(Box::new(TungsteniteTransport(stream)) as Box<dyn WsTransport>)
        })
    }
}

struct TungsteniteTransport(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsTransport for TungsteniteTransport {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(self.0.send(Message::Text(text)).await?) })
    }

    fn recv_text(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => Err(Error::UnexpectedBinaryMessage(bytes)),
                Some(Ok(Message::Close(frame))) =>
                    Err(Error::WsClosed(frame.map(|f| f.code.into()))),
                // Ping/Pong behaviour is internally handled by tungstenite.
                Some(Ok(_)) => Ok(None),
                Some(Err(e)) => Err(e.into()),
                None => Err(Error::WsClosed(None)),
            }
        })
    }

    fn close(&mut self, code: u16) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.0
                .close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                }))
                .await
                .or_else(|e| match e {
                    TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed => Ok(()),
                    e => Err(e.into()),
                })
        })
    }
}

/// JSON envelope layer over an injected transport.
pub(crate) struct WsStream {
    inner: Box<dyn WsTransport>,
}

impl WsStream {
    pub(crate) async fn connect(connector: &dyn WsConnector, url: Url) -> Result<Self> {
        let inner = connector.connect(url).await?;
        Ok(Self { inner })
    }

    /// Receives one gateway event, bounded by a short poll so handshake
    /// loops stay responsive.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<Event>> {
        const TIMEOUT: Duration = Duration::from_millis(500);

        let text = match timeout(TIMEOUT, self.inner.recv_text()).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e),
            Err(_) => None,
        };

        convert_ws_message(text)
    }

    pub(crate) async fn recv_json_no_timeout(&mut self) -> Result<Option<Event>> {
        let text = self.inner.recv_text().await?;
        convert_ws_message(text)
    }

    pub(crate) async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.inner.send_text(text).await
    }

    pub(crate) async fn close(&mut self, code: u16) -> Result<()> {
        self.inner.close(code).await
    }
}

/// Convenience type for gateway transport results.
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-layer errors of the gateway channel.
#[derive(Debug)]
pub enum Error {
    /// The message was not valid envelope JSON.
    Json(JsonError),

    /// The voice gateway does not support or offer compression; only text
    /// messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    /// Error raised by the underlying WebSocket.
    Ws(TungsteniteError),

    /// The channel was closed, with the close code when one was given.
    WsClosed(Option<u16>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "gateway JSON error: {e}"),
            Self::UnexpectedBinaryMessage(b) =>
                write!(f, "unexpected {}-byte binary gateway message", b.len()),
            Self::Ws(e) => write!(f, "websocket issue: {e}"),
            Self::WsClosed(code) => write!(f, "websocket closed (code {code:?})"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Ws(e) => Some(e),
            _ => None,
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

pub(crate) fn convert_ws_message(message: Option<String>) -> Result<Option<Event>> {
    Ok(message.and_then(|payload| {
        Event::from_json_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok()
            .flatten()
    }))
}
