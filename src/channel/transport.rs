use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{CIPulseError, Result};

/// Opens text-frame connections to the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Link>>;
}

/// One live, bidirectional text connection.
#[async_trait]
pub trait Link: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// `None` once the peer has closed the connection.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Link>> {
        let (stream, response) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        debug!(
            "WebSocket handshake with {endpoint} completed ({})",
            response.status()
        );
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match binary_text(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!("Dropping binary WebSocket frame: {e}"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Broker closed the WebSocket: {frame:?}");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing WebSocket: {e}");
        }
    }
}

/// STOMP frames are text; a binary frame is only usable when it is valid UTF-8.
fn binary_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| CIPulseError::Channel(format!("Binary frame is not UTF-8: {e}")))
}
