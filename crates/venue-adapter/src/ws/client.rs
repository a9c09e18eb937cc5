/*
[INPUT]:  WebSocket URL and per-symbol subscriptions
[OUTPUT]: Real-time price updates via channels
[POS]:    WebSocket layer - push-stream handling
[UPDATE]: When adding channels or changing connection logic
*/

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

const MARKET_STREAM_URL: &str = "wss://perps.perpdex.example/ws-stream/v1";

/// Channel-tagged messages arriving on the market stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "channel")]
pub enum StreamMessage {
    #[serde(rename = "price")]
    Price {
        symbol: String,
        data: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// WebSocket client for the venue's market stream.
///
/// The client connects, subscribes, and parses; reconnect policy belongs to
/// the consumer.
#[derive(Debug)]
pub struct VenueWebSocket {
    message_tx: mpsc::Sender<StreamMessage>,
    message_rx: Option<mpsc::Receiver<StreamMessage>>,
    outbound_tx: Arc<Mutex<Option<mpsc::Sender<WsMessage>>>>,
    url: String,
}

impl VenueWebSocket {
    pub fn new() -> Self {
        Self::with_url(MARKET_STREAM_URL)
    }

    pub fn with_url(url: &str) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            message_tx: tx,
            message_rx: Some(rx),
            outbound_tx: Arc::new(Mutex::new(None)),
            url: url.to_string(),
        }
    }

    /// Take the inbound message receiver. Can only be taken once.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<StreamMessage>> {
        self.message_rx.take()
    }

    /// Connect to the market stream and start the read/write pump.
    pub async fn connect(&self) -> Result<(), Box<dyn std::error::Error>> {
        let (ws_stream, _response) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(100);
        let outbound_state = self.outbound_tx.clone();

        {
            let mut guard = outbound_state.lock().await;
            if guard.is_some() {
                return Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "WebSocket already connected",
                )));
            }
            *guard = Some(outbound_tx);
        }

        let message_tx = self.message_tx.clone();
        let outbound_state_for_task = outbound_state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Close(_))) => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(message)) => {
                                if let Some(parsed) = Self::parse_message(message)
                                    && message_tx.send(parsed).await.is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(_)) | None => {
                                break;
                            }
                        }
                    }
                }
            }

            let mut guard = outbound_state_for_task.lock().await;
            *guard = None;
        });

        Ok(())
    }

    /// Subscribe to price updates for a symbol.
    pub async fn subscribe_price(&self, symbol: &str) -> Result<(), Box<dyn std::error::Error>> {
        let msg = serde_json::json!({
            "subscribe": {
                "channel": "price",
                "symbol": symbol
            }
        });
        self.send_subscription(msg).await
    }

    /// Unsubscribe from price updates for a symbol.
    pub async fn unsubscribe_price(&self, symbol: &str) -> Result<(), Box<dyn std::error::Error>> {
        let msg = serde_json::json!({
            "unsubscribe": {
                "channel": "price",
                "symbol": symbol
            }
        });
        self.send_subscription(msg).await
    }

    async fn send_subscription(
        &self,
        message: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let sender = {
            let guard = self.outbound_tx.lock().await;
            guard.clone().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "WebSocket not connected")
            })?
        };

        sender
            .send(WsMessage::Text(message.to_string().into()))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "WebSocket send channel closed",
                )
            })?;

        Ok(())
    }

    fn parse_message(message: WsMessage) -> Option<StreamMessage> {
        let text: String = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok()?,
            _ => return Some(StreamMessage::Other),
        };

        match serde_json::from_str::<StreamMessage>(&text) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(error = %err, bytes = text.len(), "ws message parse failed");
                Some(StreamMessage::Other)
            }
        }
    }
}

impl Default for VenueWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_messages_parse_by_channel_tag() {
        let raw = r#"{"channel":"price","symbol":"BTC-USD","data":{"symbol":"BTC-USD","mark_price":"94000","mid_price":"94001","best_bid":"93999","best_ask":"94003","time":1700000000000}}"#;
        let parsed = VenueWebSocket::parse_message(WsMessage::Text(raw.into()));

        match parsed {
            Some(StreamMessage::Price { symbol, .. }) => assert_eq!(symbol, "BTC-USD"),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn unknown_channels_fall_through_to_other() {
        let raw = r#"{"channel":"funding","symbol":"BTC-USD","data":{}}"#;
        let parsed = VenueWebSocket::parse_message(WsMessage::Text(raw.into()));
        assert!(matches!(parsed, Some(StreamMessage::Other)));
    }
}
