//! Transport adapter: the seam between the client and the physical connection.
//!
//! The client never touches sockets directly. It asks a [`Transport`] to open
//! a [`Link`], then exchanges [`RawFrame`]s over it. The bundled
//! [`WsTransport`] speaks WebSocket via tokio-tungstenite; tests and embedders
//! can supply their own implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::Error;

/// A discrete unit of data on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Something observed on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(RawFrame),
    /// The peer closed the connection (or the stream ended).
    Closed { code: Option<u16>, reason: String },
}

/// Opens physical connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &url::Url) -> Result<Box<dyn Link>, Error>;
}

/// An open, full-duplex connection.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, frame: RawFrame) -> Result<(), Error>;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the client drops this future whenever another
    /// event wins the race, and no frame may be lost when that happens.
    async fn recv(&mut self) -> Result<LinkEvent, Error>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), Error>;
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Append the access token and wire format to the target address.
pub(crate) fn build_url(
    address: &str,
    token: Option<&str>,
    format: &str,
) -> Result<url::Url, Error> {
    let mut u = url::Url::parse(address)?;
    {
        let mut q = u.query_pairs_mut();
        if let Some(token) = token {
            q.append_pair("access_token", token);
        }
        q.append_pair("format", format);
    }
    Ok(u)
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket transport backed by tokio-tungstenite (rustls for `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &url::Url) -> Result<Box<dyn Link>, Error> {
        let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Box::new(WsLink { ws }))
    }
}

struct WsLink {
    ws: WsStream,
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, frame: RawFrame) -> Result<(), Error> {
        let msg = match frame {
            RawFrame::Text(text) => tungstenite::Message::Text(text.into()),
            RawFrame::Binary(data) => tungstenite::Message::Binary(data.into()),
        };
        self.ws.send(msg).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<LinkEvent, Error> {
        loop {
            match self.ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Ok(LinkEvent::Frame(RawFrame::Text(text.as_str().to_owned())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Ok(LinkEvent::Frame(RawFrame::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    return Ok(LinkEvent::Closed { code, reason });
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite itself
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Ok(LinkEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_with_token() {
        let url = build_url("wss://realtime.example.com/socket", Some("tok-1"), "json").unwrap();
        let s = url.as_str();
        assert!(s.starts_with("wss://realtime.example.com/socket?"));
        assert!(s.contains("access_token=tok-1"));
        assert!(s.contains("format=json"));
    }

    #[test]
    fn build_url_without_token() {
        let url = build_url("ws://127.0.0.1:9000/", None, "msgpack").unwrap();
        assert!(!url.as_str().contains("access_token"));
        assert!(url.as_str().contains("format=msgpack"));
    }

    #[test]
    fn build_url_keeps_existing_query() {
        let url = build_url("ws://host/ws?tenant=a", Some("t"), "json").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs.first(), Some(&("tenant".to_string(), "a".to_string())));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn build_url_rejects_garbage() {
        assert!(matches!(
            build_url("not a url", None, "json"),
            Err(Error::Url(_))
        ));
    }
}
