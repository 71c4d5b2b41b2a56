use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::tls::TlsOptions;
use crate::traits::{Inbound, Transport};

/// Well-known component names and the local ports they listen on.
pub const SERVER_ALIASES: &[(&str, u16)] = &[
    ("mme", 9000),
    ("enb", 9001),
    ("ue", 9002),
    ("ims", 9003),
    ("mbms", 9004),
    ("n3iwf", 9005),
    ("license", 9006),
    ("mon", 9007),
    ("view", 9008),
    ("scan", 9009),
    ("probe", 9010),
];

/// Map a component alias (`enb`, `ue`, ...) to its local address.
///
/// Anything that is not an alias is returned unchanged.
pub fn resolve_server(server: &str) -> String {
    SERVER_ALIASES
        .iter()
        .find(|(name, _)| *name == server)
        .map(|(_, port)| format!("127.0.0.1:{port}"))
        .unwrap_or_else(|| server.to_string())
}

/// Options for opening a WebSocket connection.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Use `wss://` instead of `ws://`.
    pub tls: bool,
    /// Value of the `Origin` header sent with the upgrade request.
    pub origin: String,
    /// Certificate handling when `tls` is set.
    pub tls_options: TlsOptions,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            tls: false,
            origin: "Test".to_string(),
            tls_options: TlsOptions::default(),
        }
    }
}

impl TransportOptions {
    /// Build the URL for `address` (`host:port`).
    pub fn url_for(&self, address: &str) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{address}/")
    }
}

/// WebSocket client transport.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl WsTransport {
    /// Open a WebSocket connection to `address`.
    pub async fn connect(address: &str, options: &TransportOptions) -> Result<Self> {
        let url = options.url_for(address);
        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|err| TransportError::InvalidAddress {
                    address: address.to_string(),
                    reason: err.to_string(),
                })?;
        let origin =
            HeaderValue::from_str(&options.origin).map_err(|err| TransportError::InvalidAddress {
                address: address.to_string(),
                reason: format!("invalid origin header: {err}"),
            })?;
        request.headers_mut().insert("origin", origin);

        let connector = if options.tls {
            let config = options.tls_options.client_config()?;
            Some(Connector::Rustls(Arc::new(config)))
        } else {
            None
        };

        let (stream, response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|source| TransportError::Connect {
                url: url.clone(),
                source,
            })?;
        info!(url = %url, status = %response.status(), "connected");

        Ok(Self { stream, url })
    }

    /// The URL this transport is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(Inbound::Text(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Inbound::Binary(Bytes::from(data)))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "close frame received");
                    return Ok(None);
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
