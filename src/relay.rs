use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::observability;
use crate::tenant::TenantGroup;

/// Failure talking to the upstream telemetry hub. Stays inside the relay.
#[derive(Debug)]
pub enum UpstreamError {
    Connect(String),
    /// The connection itself failed (reset, I/O error, silence). Ends the session.
    Transport(String),
    /// One frame could not be understood. The session goes on.
    Protocol(String),
    Closed,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Connect(e) => write!(f, "connect failed: {e}"),
            UpstreamError::Transport(e) => write!(f, "transport error: {e}"),
            UpstreamError::Protocol(e) => write!(f, "protocol error: {e}"),
            UpstreamError::Closed => write!(f, "upstream closed the connection"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// One item read from the upstream session.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    Measurement(Value),
    /// Any other frame, pings included. Only proves the session is alive.
    Heartbeat,
}

pub type MeasurementStream = BoxStream<'static, Result<Upstream, UpstreamError>>;

/// Where measurements for a tenant come from.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Open a session for `tenant`. The stream ends (or errors) when the session is lost.
    async fn connect(&self, tenant: &str) -> Result<MeasurementStream, UpstreamError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Telemetry hub reached over a WebSocket.
///
/// After connecting it sends `{"type":"joinTenant","tenant":...}` and then
/// expects `{"type":"measurementReceived","payload":...}` frames. Frames of
/// other types only count as liveness.
pub struct WebSocketSource {
    url: String,
    ping_every: Duration,
}

impl WebSocketSource {
    /// `ping_every` paces client pings, so a quiet but healthy hub still
    /// produces pongs within the relay's idle timeout.
    pub fn new(url: impl Into<String>, ping_every: Duration) -> Self {
        Self {
            url: url.into(),
            ping_every,
        }
    }
}

async fn keep_alive<S>(mut sink: S, every: Duration, stop: CancellationToken)
where
    S: futures::Sink<Message> + Unpin,
{
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn parse_frame(text: &str) -> Result<Upstream, UpstreamError> {
    match serde_json::from_str::<UpstreamFrame>(text) {
        Ok(frame) if frame.kind == "measurementReceived" => Ok(Upstream::Measurement(frame.payload)),
        Ok(_) => Ok(Upstream::Heartbeat),
        Err(e) => Err(UpstreamError::Protocol(e.to_string())),
    }
}

#[async_trait]
impl TelemetrySource for WebSocketSource {
    async fn connect(&self, tenant: &str) -> Result<MeasurementStream, UpstreamError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let join = serde_json::json!({"type": "joinTenant", "tenant": tenant});
        ws.send(Message::Text(join.to_string()))
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let (sink, stream) = ws.split();
        let stop = CancellationToken::new();
        tokio::spawn(keep_alive(sink, self.ping_every, stop.clone()));
        // Dropping the stream stops the pinger.
        let pinger = stop.drop_guard();
        let measurements = stream.map(move |msg| {
            let _pinger = &pinger;
            match msg {
                Ok(Message::Text(text)) => parse_frame(&text),
                Ok(Message::Close(_)) => Err(UpstreamError::Closed),
                Ok(_) => Ok(Upstream::Heartbeat),
                Err(e) => Err(UpstreamError::Transport(e.to_string())),
            }
        });
        Ok(measurements.boxed())
    }
}

/// Reconnect pacing for [`run_relay`].
#[derive(Debug, Clone, Copy)]
pub struct RelayTiming {
    /// Pause after a lost or failed session.
    pub retry: Duration,
    /// A session that yields nothing for this long is treated as dead.
    pub idle_timeout: Duration,
}

/// Forward telemetry from `source` into `group` until `cancel` fires.
///
/// Every lost, failed or silent session is followed by a `retry` pause. The
/// group's status flips online when a session opens and offline when it ends;
/// repeated failures announce nothing new.
pub async fn run_relay(
    source: Arc<dyn TelemetrySource>,
    group: Arc<TenantGroup>,
    timing: RelayTiming,
    cancel: CancellationToken,
) {
    let RelayTiming { retry, idle_timeout } = timing;
    let tenant = group.slug().to_string();
    tracing::info!(%tenant, "telemetry relay started");
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            r = source.connect(&tenant) => r,
        };

        match outcome {
            Ok(mut stream) => {
                if group.set_status(true) {
                    tracing::info!(%tenant, "telemetry upstream online");
                }
                let ended = loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        n = tokio::time::timeout(idle_timeout, stream.next()) => n,
                    };
                    let Ok(next) = next else {
                        break UpstreamError::Transport(format!("nothing received for {idle_timeout:?}"));
                    };
                    match next {
                        Some(Ok(Upstream::Measurement(payload))) => {
                            metrics::counter!(observability::RELAY_MEASUREMENTS_TOTAL).increment(1);
                            group.publish_measurement(payload);
                        }
                        Some(Ok(Upstream::Heartbeat)) => {}
                        Some(Err(UpstreamError::Protocol(e))) => {
                            tracing::debug!(%tenant, "skipping upstream frame: {e}");
                        }
                        Some(Err(e)) => break e,
                        None => break UpstreamError::Closed,
                    }
                };
                tracing::warn!(%tenant, "telemetry session ended: {ended}");
            }
            Err(e) => tracing::debug!(%tenant, "telemetry connect failed: {e}"),
        }

        metrics::counter!(observability::RELAY_DISCONNECTS_TOTAL).increment(1);
        if group.set_status(false) {
            tracing::warn!(%tenant, "telemetry upstream offline, retrying every {retry:?}");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry) => {}
        }
    }
    tracing::info!(%tenant, "telemetry relay stopped");
}
