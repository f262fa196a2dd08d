// Web pipe adapter — WebSocket, or HTTP polling where sockets are blocked
//
// With `use_websocket` every frame is one binary WebSocket message. Without
// it, frames are POSTed to the endpoint and a background task GETs the
// endpoint every `poll_interval_ms`; a 204 or an empty body means nothing
// is waiting.

use super::BridgeError;
use crate::pipe::{
    InboundSink, PipeAdapter, PipeCapabilities, PipeConfiguration, PipeError, PipeSettings,
    PipeType, WebConfig,
};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Frame payload budget for socket and HTTP bodies
pub const WEB_CHUNK_SIZE: usize = 64 * 1024;

/// Header (and query parameter) naming the remote peer
pub const TARGET_HEADER: &str = "x-meshpipe-target";

/// Socket / HTTP primitives
#[async_trait]
pub trait WebBridge: Send + Sync {
    async fn open(
        &self,
        config: &WebConfig,
        target: Option<&str>,
        sink: InboundSink,
    ) -> Result<(), BridgeError>;

    async fn send(&self, data: &[u8]) -> Result<(), BridgeError>;

    async fn close(&self) -> Result<(), BridgeError>;
}

pub struct WebAdapter {
    bridge: Arc<dyn WebBridge>,
    config: RwLock<Option<WebConfig>>,
    target: RwLock<Option<String>>,
    inbound: Mutex<Option<InboundSink>>,
}

impl WebAdapter {
    pub fn new(bridge: Arc<dyn WebBridge>) -> Self {
        Self {
            bridge,
            config: RwLock::new(None),
            target: RwLock::new(None),
            inbound: Mutex::new(None),
        }
    }

    /// Adapter over the production WebSocket / HTTP bridge
    pub fn with_default_bridge() -> Self {
        Self::new(Arc::new(WebSocketBridge::new()))
    }
}

#[async_trait]
impl PipeAdapter for WebAdapter {
    fn pipe_type(&self) -> PipeType {
        PipeType::Web
    }

    fn capabilities(&self) -> PipeCapabilities {
        PipeCapabilities {
            max_message_size: crate::message::MAX_MESSAGE_SIZE,
            max_throughput_bps: 1_000_000,
            bidirectional: true,
            requires_user_interaction: false,
            supports_background: true,
        }
    }

    fn max_chunk_size(&self) -> usize {
        if self.config.read().is_some() {
            WEB_CHUNK_SIZE
        } else {
            0
        }
    }

    async fn do_initialize(
        &self,
        config: &PipeConfiguration,
        target: Option<&str>,
        inbound: InboundSink,
    ) -> Result<(), PipeError> {
        let web = match &config.settings {
            PipeSettings::Web(web) => web.clone(),
            other => {
                return Err(PipeError::Configuration(format!(
                    "Web adapter cannot use {} settings",
                    other.pipe_type()
                )))
            }
        };
        info!(
            endpoint = %web.endpoint_url,
            websocket = web.use_websocket,
            "Web adapter ready"
        );
        *self.config.write() = Some(web);
        *self.target.write() = target.map(str::to_string);
        *self.inbound.lock() = Some(inbound);
        Ok(())
    }

    async fn do_connect(&self, _is_initiator: bool) -> Result<(), PipeError> {
        let (config, sink) = match (self.config.read().clone(), self.inbound.lock().clone()) {
            (Some(config), Some(sink)) => (config, sink),
            _ => return Err(PipeError::Connection("Web adapter not initialized".into())),
        };
        let target = self.target.read().clone();
        self.bridge
            .open(&config, target.as_deref(), sink)
            .await
            .map_err(|e| PipeError::Connection(e.to_string()))
    }

    async fn do_disconnect(&self, _force: bool) -> Result<(), PipeError> {
        match self.bridge.close().await {
            Ok(()) | Err(BridgeError::NotConnected) => Ok(()),
            Err(e) => Err(PipeError::Connection(e.to_string())),
        }
    }

    async fn do_send_data(&self, data: &[u8]) -> Result<(), PipeError> {
        self.bridge
            .send(data)
            .await
            .map_err(|e| PipeError::Send(e.to_string()))
    }
}

// ============================================================================
// PRODUCTION BRIDGE
// ============================================================================

type SocketWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

enum Connection {
    Socket {
        writer: SocketWriter,
        reader: JoinHandle<()>,
    },
    Polling {
        endpoint: String,
        headers: BTreeMap<String, String>,
        target: Option<String>,
        poller: JoinHandle<()>,
    },
}

/// tokio-tungstenite for sockets, ureq for the HTTP fallback
pub struct WebSocketBridge {
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl WebSocketBridge {
    pub fn new() -> Self {
        Self {
            connection: tokio::sync::Mutex::new(None),
        }
    }

    async fn open_socket(
        config: &WebConfig,
        target: Option<&str>,
        sink: InboundSink,
    ) -> Result<Connection, BridgeError> {
        let mut request = config
            .endpoint_url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Platform(e.to_string()))?;
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BridgeError::Platform(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| BridgeError::Platform(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        if let Some(target) = target {
            let value =
                HeaderValue::from_str(target).map_err(|e| BridgeError::Platform(e.to_string()))?;
            request
                .headers_mut()
                .insert(HeaderName::from_static(TARGET_HEADER), value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| BridgeError::Platform(e.to_string()))?;
        info!(endpoint = %config.endpoint_url, "WebSocket connected");

        let (writer, mut read) = stream.split();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Binary(bytes))) => {
                        if !sink.deliver(bytes) {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by peer");
                        break "socket closed by peer".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        break format!("socket read failed: {}", e);
                    }
                    None => break "socket stream ended".to_string(),
                }
            };
            sink.link_lost(reason);
        });
        Ok(Connection::Socket { writer, reader })
    }

    async fn open_polling(
        config: &WebConfig,
        target: Option<&str>,
        sink: InboundSink,
    ) -> Result<Connection, BridgeError> {
        let endpoint = config.endpoint_url.clone();
        let headers = config.headers.clone();
        let target = target.map(str::to_string);

        // First poll doubles as the reachability check.
        let first = {
            let (endpoint, headers, target) = (endpoint.clone(), headers.clone(), target.clone());
            tokio::task::spawn_blocking(move || http_get(&endpoint, &headers, target.as_deref()))
                .await
                .map_err(|e| BridgeError::Platform(e.to_string()))??
        };
        if let Some(body) = first {
            sink.deliver(body);
        }

        let period = Duration::from_millis(config.poll_interval_ms.max(1));
        let poller = tokio::spawn(poll_loop(
            endpoint.clone(),
            headers.clone(),
            target.clone(),
            period,
            sink,
        ));
        info!(endpoint = %endpoint, interval_ms = period.as_millis() as u64, "HTTP polling started");
        Ok(Connection::Polling {
            endpoint,
            headers,
            target,
            poller,
        })
    }
}

impl Default for WebSocketBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebBridge for WebSocketBridge {
    async fn open(
        &self,
        config: &WebConfig,
        target: Option<&str>,
        sink: InboundSink,
    ) -> Result<(), BridgeError> {
        let connection = if config.use_websocket {
            Self::open_socket(config, target, sink).await?
        } else {
            Self::open_polling(config, target, sink).await?
        };
        if let Some(old) = self.connection.lock().await.replace(connection) {
            shutdown(old).await;
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), BridgeError> {
        let (endpoint, headers, target) = {
            let mut guard = self.connection.lock().await;
            match guard.as_mut() {
                Some(Connection::Socket { writer, .. }) => {
                    return writer
                        .send(Message::Binary(data.to_vec()))
                        .await
                        .map_err(|e| BridgeError::Platform(e.to_string()))
                }
                Some(Connection::Polling {
                    endpoint,
                    headers,
                    target,
                    ..
                }) => (endpoint.clone(), headers.clone(), target.clone()),
                None => return Err(BridgeError::NotConnected),
            }
        };

        let body = data.to_vec();
        tokio::task::spawn_blocking(move || http_post(&endpoint, &headers, target.as_deref(), &body))
            .await
            .map_err(|e| BridgeError::Platform(e.to_string()))?
    }

    async fn close(&self) -> Result<(), BridgeError> {
        match self.connection.lock().await.take() {
            Some(connection) => {
                shutdown(connection).await;
                Ok(())
            }
            None => Err(BridgeError::NotConnected),
        }
    }
}

async fn shutdown(connection: Connection) {
    match connection {
        Connection::Socket { mut writer, reader } => {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "WebSocket close handshake failed");
            }
            reader.abort();
        }
        Connection::Polling { poller, .. } => poller.abort(),
    }
}

async fn poll_loop(
    endpoint: String,
    headers: BTreeMap<String, String>,
    target: Option<String>,
    period: Duration,
    sink: InboundSink,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let (e, h, t) = (endpoint.clone(), headers.clone(), target.clone());
        match tokio::task::spawn_blocking(move || http_get(&e, &h, t.as_deref())).await {
            Ok(Ok(Some(body))) => {
                if !sink.deliver(body) {
                    break;
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(endpoint = %endpoint, error = %e, "Poll failed"),
            Err(e) => {
                warn!(error = %e, "Poll task failed");
                break;
            }
        }
    }
    debug!(endpoint = %endpoint, "HTTP polling stopped");
}

fn http_get(
    endpoint: &str,
    headers: &BTreeMap<String, String>,
    target: Option<&str>,
) -> Result<Option<Vec<u8>>, BridgeError> {
    let mut request = ureq::get(endpoint);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    if let Some(target) = target {
        request = request.query("peer", target);
    }
    let response = request
        .call()
        .map_err(|e| BridgeError::Platform(e.to_string()))?;
    if response.status() == 204 {
        return Ok(None);
    }
    let mut body = Vec::new();
    response
        .into_reader()
        .take(WEB_CHUNK_SIZE as u64 * 2)
        .read_to_end(&mut body)
        .map_err(|e| BridgeError::Platform(e.to_string()))?;
    Ok(if body.is_empty() { None } else { Some(body) })
}

fn http_post(
    endpoint: &str,
    headers: &BTreeMap<String, String>,
    target: Option<&str>,
    body: &[u8],
) -> Result<(), BridgeError> {
    let mut request = ureq::post(endpoint).set("Content-Type", "application/octet-stream");
    for (name, value) in headers {
        request = request.set(name, value);
    }
    if let Some(target) = target {
        request = request.set(TARGET_HEADER, target);
    }
    request
        .send_bytes(body)
        .map(|_| ())
        .map_err(|e| BridgeError::Platform(e.to_string()))
}
