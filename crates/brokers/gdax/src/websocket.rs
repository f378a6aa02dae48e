use blockhead_core::{ExchangeError, FeedMessage};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::protocol::{SubscribeAuth, SubscribeRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channels a live session subscribes to.
pub const DEFAULT_CHANNELS: [&str; 2] = ["heartbeat", "full"];

/// Builds the subscribe message, signed when a credential is given.
pub fn subscribe_request(
    products: &[String],
    channels: &[String],
    credential: Option<&Credential>,
    timestamp: &str,
) -> SubscribeRequest {
    SubscribeRequest {
        kind: "subscribe",
        product_ids: products.to_vec(),
        channels: channels.to_vec(),
        auth: credential.map(|cred| SubscribeAuth {
            signature: cred.sign_ws(timestamp),
            key: cred.api_key.clone(),
            passphrase: cred.passphrase.clone(),
            timestamp: timestamp.to_string(),
        }),
    }
}

/// Decodes one text frame of the feed.
pub fn decode_frame(text: &str) -> Result<FeedMessage, ExchangeError> {
    serde_json::from_str(text).map_err(|e| ExchangeError::Decode(format!("{}: {}", e, text)))
}

/// A subscribed connection to the websocket feed.
///
/// Yields every text frame together with its decoded message so callers can
/// keep a raw trade log.
pub struct GdaxFeed {
    url: String,
    stream: WsStream,
    closed: bool,
}

impl GdaxFeed {
    pub async fn connect(
        url: &str,
        products: &[String],
        channels: &[String],
        credential: Option<&Credential>,
    ) -> Result<Self, ExchangeError> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|e| ExchangeError::Connection(format!("{}: {}", url, e)))?;

        let timestamp = Utc::now().timestamp().to_string();
        let request = subscribe_request(products, channels, credential, &timestamp);
        let text = serde_json::to_string(&request)
            .map_err(|e| ExchangeError::Decode(format!("Serialization error: {}", e)))?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ExchangeError::Connection(format!("Subscribe failed: {}", e)))?;

        info!(
            url,
            products = ?products,
            channels = ?channels,
            authenticated = credential.is_some(),
            "Feed subscribed"
        );

        Ok(Self {
            url: url.to_string(),
            stream,
            closed: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next message. `None` once the server closes the connection.
    ///
    /// An undecodable frame is returned as [`ExchangeError::Decode`] and the
    /// stream stays usable.
    pub async fn next(&mut self) -> Option<Result<(String, FeedMessage), ExchangeError>> {
        if self.closed {
            return None;
        }
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(ExchangeError::Connection(e.to_string())));
                }
                None => {
                    self.closed = true;
                    return None;
                }
            };

            match frame {
                Message::Text(text) => {
                    return Some(decode_frame(&text).map(|msg| (text, msg)));
                }
                Message::Ping(payload) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
                Message::Close(reason) => {
                    info!(?reason, "Feed closed by server");
                    self.closed = true;
                    return None;
                }
                other => debug!(?other, "Ignoring frame"),
            }
        }
    }

    pub async fn close(mut self) {
        if !self.closed {
            if let Err(e) = self.stream.close(None).await {
                debug!(error = %e, "Error closing feed");
            }
        }
    }
}
