//! Connection to the upstream realtime API.

use super::events::{ClientEvent, ServerEvent, SessionConfig};
use crate::config::Config;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Failure while establishing or configuring the upstream connection.
///
/// All variants are fatal for the session; there is no retry.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to build upstream request: {0}")]
    Request(anyhow::Error),
    #[error("failed to connect upstream: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to configure upstream session: {0}")]
    Configure(anyhow::Error),
}

/// One established upstream realtime session.
///
/// Send and receive sides are independently lockable so the ingress and
/// egress pumps never contend with each other.
#[async_trait]
pub trait UpstreamConnection: Send + Sync {
    /// Sends one event upstream.
    async fn send(&self, event: ClientEvent) -> anyhow::Result<()>;

    /// Receives the next decoded event. `None` means the upstream side is
    /// closed and no further events will arrive.
    async fn next_event(&self) -> Option<ServerEvent>;

    /// Discards all audio buffered upstream but not yet committed.
    async fn clear(&self) -> anyhow::Result<()> {
        self.send(ClientEvent::InputAudioBufferClear).await
    }

    /// Closes the connection. Best-effort.
    async fn close(&self);
}

pub struct RealtimeUpstream {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl RealtimeUpstream {
    /// Connects, authenticates, and applies the session configuration.
    pub async fn connect(config: &Config, session: SessionConfig) -> Result<Self, ConnectError> {
        let url = format!("{}?model={}", config.realtime_url, config.realtime_model);
        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectError::Request(e.into()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {}", config.openai_api_key)
                .parse()
                .map_err(|_| ConnectError::Request(anyhow!("api key is not a valid header value")))?,
        );
        headers.insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| ConnectError::Request(anyhow!("invalid beta header value")))?,
        );

        let (ws, _response) = connect_async(request).await?;
        debug!("upstream realtime connection established");
        let (sink, stream) = ws.split();
        let upstream = Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        };

        upstream
            .send(ClientEvent::SessionUpdate { session })
            .await
            .map_err(ConnectError::Configure)?;
        Ok(upstream)
    }
}

#[async_trait]
impl UpstreamConnection for RealtimeUpstream {
    async fn send(&self, event: ClientEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(&event).context("failed to encode upstream event")?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .context("failed to send upstream event")
    }

    async fn next_event(&self) -> Option<ServerEvent> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                    Ok(event) => return Some(event),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable upstream frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "upstream read failed");
                    return None;
                }
            }
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}
