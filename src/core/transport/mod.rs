//! Byte-stream transport consumed by connection nodes.
//!
//! [`TransportChannel`] is the only view a node has of the network. The
//! production implementation is a tokio-tungstenite WebSocket; tests inject
//! their own [`ChannelConnector`].

pub mod pool;

pub use pool::PreconnectedPool;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::AddressFamily;

// =============================================================================
// Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("resolve failed: {0}")]
    Resolve(String),

    #[error("tcp connect failed: {0}")]
    Connect(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("channel closed")]
    Closed,
}

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
    /// Remote close, with the close code when one was sent.
    Closed { code: Option<u16>, reason: String },
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub url: Url,
    /// Extra headers sent with the upgrade request (auth tokens and the like).
    pub headers: Vec<(String, String)>,
    pub address_family: AddressFamily,
    pub direct_host: Option<IpAddr>,
}

impl ConnectTarget {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            address_family: AddressFamily::default(),
            direct_host: None,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Channels are interchangeable only for the same url and upgrade headers.
    pub fn pool_key(&self) -> String {
        let mut headers = self.headers.clone();
        headers.sort();
        let mut key = self.url.to_string();
        for (name, value) in headers {
            key.push('\n');
            key.push_str(&name.to_ascii_lowercase());
            key.push(':');
            key.push_str(&value);
        }
        key
    }
}

/// An established, exclusively owned connection.
#[async_trait]
pub trait TransportChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<usize, TransportError>;

    async fn send_binary(&mut self, data: Bytes) -> Result<usize, TransportError>;

    /// Next data frame; control frames are handled internally.
    async fn recv(&mut self) -> Result<ChannelMessage, TransportError>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens channels; one attempt per call.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
        timeout: Duration,
    ) -> Result<Box<dyn TransportChannel>, TransportError>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

/// DNS + TCP + optional TLS + WebSocket upgrade.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    async fn resolve(target: &ConnectTarget) -> Result<Vec<SocketAddr>, TransportError> {
        let host = target
            .url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{} has no host", target.url)))?;
        let port = target
            .url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{} has no port", target.url)))?;

        if let Some(ip) = target.direct_host {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Resolve(format!("{host}: {e}")))?
            .filter(|addr| target.address_family.admits(&addr.ip()))
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve(format!(
                "{host} has no {} address",
                target.address_family
            )));
        }
        Ok(addrs)
    }

    async fn open(target: &ConnectTarget) -> Result<WebSocketChannel, TransportError> {
        let addrs = Self::resolve(target).await?;

        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    debug!("TCP connected to {}", addr);
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(TransportError::Connect(
                    last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no address".to_string()),
                ));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Handshake(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Handshake(format!("header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) = client_async_tls_with_config(request, stream, None, None)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(
            "WebSocket upgrade to {} completed with status {}",
            target.url,
            response.status()
        );

        Ok(WebSocketChannel {
            stream: ws_stream,
            open: true,
        })
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        budget: Duration,
    ) -> Result<Box<dyn TransportChannel>, TransportError> {
        match timeout(budget, Self::open(target)).await {
            Ok(Ok(channel)) => Ok(Box::new(channel)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(format!(
                "connect to {} exceeded {}ms",
                target.url,
                budget.as_millis()
            ))),
        }
    }
}

pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl TransportChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let len = text.len();
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(len)
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let len = data.len();
        self.stream
            .send(Message::Binary(data))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(len)
    }

    async fn recv(&mut self) -> Result<ChannelMessage, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(ChannelMessage::Text(text.as_str().to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(ChannelMessage::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    self.open = false;
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                        None => (None, String::new()),
                    };
                    return Ok(ChannelMessage::Closed { code, reason });
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    trace!("WebSocket control frame");
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.open = false;
                    return Err(TransportError::Io(e.to_string()));
                }
                None => {
                    self.open = false;
                    return Ok(ChannelMessage::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.stream.close(None).await;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_ignores_header_order() {
        let url = Url::parse("wss://example.com/ws/v1").unwrap();
        let mut a = ConnectTarget::new(url.clone());
        a.headers = vec![("X-A".into(), "1".into()), ("X-B".into(), "2".into())];
        let mut b = ConnectTarget::new(url);
        b.headers = vec![("X-B".into(), "2".into()), ("X-A".into(), "1".into())];
        assert_eq!(a.pool_key(), b.pool_key());
        assert!(a.is_secure());
    }

    #[tokio::test]
    async fn test_direct_host_skips_dns() {
        let url = Url::parse("ws://does-not-resolve.invalid:8101/ws").unwrap();
        let mut target = ConnectTarget::new(url);
        target.direct_host = Some("127.0.0.1".parse().unwrap());
        let addrs = WebSocketConnector::resolve(&target).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8101".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_refused_connection_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
        let result = WebSocketConnector
            .connect(&ConnectTarget::new(url), Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
