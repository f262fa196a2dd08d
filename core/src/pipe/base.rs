//! Pipe — the shared lifecycle every adapter inherits
//!
//! ```text
//! INITIALIZING -> READY -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//!       \                      \             \              \
//!        +----------------------+-------------+--------------+--> ERROR
//! ```
//!
//! ERROR is terminal. Only a forced disconnect is accepted there, and it
//! releases the medium without leaving ERROR.
//!
//! A `Pipe` owns the framing, the reliability coordinator, the inbound
//! receive loop and the status counters. The adapter underneath only
//! supplies the physical primitives of [`PipeAdapter`].

use super::abstraction::{
    PipeCapabilities, PipeError, PipeEvent, PipeState, PipeStatus, PipeType,
};
use super::adapter::{Inbound, InboundSink, PipeAdapter};
use super::config::{PipeConfiguration, DEFAULT_TIMEOUT_MS};
use crate::frame::{
    decode_frame, Acknowledgment, CodecConfig, Frame, FrameCodec, FrameType, Reassembler,
    Reassembly,
};
use crate::message::NetworkMessage;
use crate::reliability::{DeliveryReport, FrameLink, ReliabilityCoordinator};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, trace, warn};

const DATA_CHANNEL_CAPACITY: usize = 1024;
const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const PAYLOAD_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Header marking a DATA frame that carries opaque bytes, not a message
const CONTENT_HEADER: &str = "content";
const RAW_CONTENT: &str = "raw";

struct StatusCell {
    state: PipeState,
    error_message: Option<String>,
    bytes_sent: u64,
    bytes_received: u64,
    round_trip: Option<Duration>,
    connected_at: Option<Instant>,
}

struct PipeInner {
    id: String,
    adapter: Arc<dyn PipeAdapter>,
    status: RwLock<StatusCell>,
    timeout: RwLock<Duration>,
    codec: RwLock<Option<Arc<FrameCodec>>>,
    reassembler: Mutex<Option<Reassembler>>,
    coordinator: ReliabilityCoordinator,
    data_tx: broadcast::Sender<Vec<u8>>,
    message_tx: broadcast::Sender<NetworkMessage>,
    payload_tx: broadcast::Sender<Vec<u8>>,
    event_tx: broadcast::Sender<PipeEvent>,
    /// Bumped by a forced disconnect to abort in-flight physical calls
    abort_tx: watch::Sender<u64>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

/// One logical link over one physical medium. Clones share the link.
#[derive(Clone)]
pub struct Pipe {
    inner: Arc<PipeInner>,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.inner.id)
            .field("pipe_type", &self.inner.adapter.pipe_type())
            .field("state", &self.state())
            .finish()
    }
}

impl Pipe {
    pub fn new(id: impl Into<String>, adapter: Arc<dyn PipeAdapter>) -> Self {
        let (data_tx, _) = broadcast::channel(DATA_CHANNEL_CAPACITY);
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (payload_tx, _) = broadcast::channel(PAYLOAD_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (abort_tx, _) = watch::channel(0u64);

        Self {
            inner: Arc::new(PipeInner {
                id: id.into(),
                adapter,
                status: RwLock::new(StatusCell {
                    state: PipeState::Initializing,
                    error_message: None,
                    bytes_sent: 0,
                    bytes_received: 0,
                    round_trip: None,
                    connected_at: None,
                }),
                timeout: RwLock::new(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
                codec: RwLock::new(None),
                reassembler: Mutex::new(None),
                coordinator: ReliabilityCoordinator::default(),
                data_tx,
                message_tx,
                payload_tx,
                event_tx,
                abort_tx,
                receive_task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn pipe_type(&self) -> PipeType {
        self.inner.adapter.pipe_type()
    }

    pub fn state(&self) -> PipeState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PipeState::Connected
    }

    pub fn capabilities(&self) -> PipeCapabilities {
        self.inner.adapter.capabilities()
    }

    /// INITIALIZING -> READY, or -> ERROR on a bad configuration or an
    /// unavailable medium.
    pub async fn initialize(
        &self,
        config: PipeConfiguration,
        target: Option<&str>,
    ) -> Result<(), PipeError> {
        let inner = &self.inner;
        inner.require_state("initialize", &[PipeState::Initializing])?;

        if let Err(e) = inner.check_config(&config) {
            inner.fail(&e);
            return Err(e);
        }
        *inner.timeout.write() = Duration::from_millis(config.timeout_ms);
        inner.coordinator.set_config(config.reliability.clone());

        let (sink, rx) = InboundSink::channel();
        let handle = tokio::spawn(receive_loop(Arc::downgrade(inner), rx));
        if let Some(old) = inner.receive_task.lock().replace(handle) {
            old.abort();
        }

        let result = inner
            .guarded(
                PipeError::Initialization,
                inner.adapter.do_initialize(&config, target, sink),
            )
            .await
            .and_then(|()| {
                let chunk_size = inner.adapter.max_chunk_size();
                if chunk_size == 0 {
                    return Err(PipeError::Configuration(
                        "adapter reported a zero chunk size".into(),
                    ));
                }
                Ok(chunk_size)
            });

        let chunk_size = match result {
            Ok(size) => size,
            Err(e) => {
                if let Some(task) = inner.receive_task.lock().take() {
                    task.abort();
                }
                inner.fail(&e);
                return Err(e);
            }
        };

        let codec_config = CodecConfig {
            max_chunk_size: chunk_size,
            compression: config.compression,
            max_message_size: inner.message_limit(),
            ..CodecConfig::default()
        };
        *inner.reassembler.lock() = Some(Reassembler::new(&codec_config));
        *inner.codec.write() = Some(Arc::new(FrameCodec::new(codec_config)));

        info!(
            pipe_id = %inner.id,
            pipe_type = %inner.adapter.pipe_type(),
            chunk_size,
            target = target.unwrap_or("-"),
            "Pipe initialized"
        );
        inner.transition(PipeState::Ready);
        Ok(())
    }

    /// READY or DISCONNECTED -> CONNECTING -> CONNECTED (or ERROR)
    pub async fn connect(&self, is_initiator: bool) -> Result<(), PipeError> {
        let inner = &self.inner;
        inner.begin("connect", &[PipeState::Ready, PipeState::Disconnected], PipeState::Connecting)?;

        let result = inner
            .guarded(PipeError::Connection, inner.adapter.do_connect(is_initiator))
            .await;

        // A forced disconnect or a lost link may have moved us on while the
        // adapter worked.
        match inner.state() {
            PipeState::Connecting => {}
            PipeState::Error => {
                let reason = inner.status.read().error_message.clone().unwrap_or_default();
                return Err(PipeError::Connection(reason));
            }
            state => {
                debug!(pipe_id = %inner.id, %state, "Connect superseded");
                return Err(PipeError::Cancelled);
            }
        }

        match result {
            Ok(()) => {
                inner.status.write().connected_at = Some(Instant::now());
                inner.transition(PipeState::Connected);
                Ok(())
            }
            Err(e) => {
                inner.fail(&e);
                Err(e)
            }
        }
    }

    /// -> DISCONNECTING -> DISCONNECTED.
    ///
    /// Outstanding reliable sends end with `Cancelled`. With `force` every
    /// in-flight physical call is aborted first and an adapter failure
    /// still ends in DISCONNECTED. From ERROR only a forced disconnect is
    /// accepted; it releases the medium and the pipe stays in ERROR.
    pub async fn disconnect(&self, force: bool) -> Result<(), PipeError> {
        let inner = &self.inner;
        let from = inner.state();
        match from {
            PipeState::Disconnected => return Ok(()),
            PipeState::Error if force => {
                inner.release_after_error().await;
                return Ok(());
            }
            PipeState::Initializing | PipeState::Error => {
                return Err(PipeError::InvalidState {
                    operation: "disconnect",
                    state: from,
                })
            }
            PipeState::Disconnecting if !force => {
                return Err(PipeError::InvalidState {
                    operation: "disconnect",
                    state: from,
                })
            }
            _ => {}
        }

        if force {
            inner.abort_tx.send_modify(|generation| *generation += 1);
        }
        inner.transition(PipeState::Disconnecting);
        inner.coordinator.cancel_all();

        let result = inner
            .guarded(PipeError::Connection, inner.adapter.do_disconnect(force))
            .await;

        if inner.state() != PipeState::Disconnecting {
            debug!(pipe_id = %inner.id, state = %inner.state(), "Disconnect superseded");
            return Ok(());
        }

        inner.status.write().connected_at = None;
        match result {
            Ok(()) => {
                inner.transition(PipeState::Disconnected);
                Ok(())
            }
            Err(e) if force => {
                warn!(pipe_id = %inner.id, error = %e, "Adapter failed during forced disconnect");
                inner.transition(PipeState::Disconnected);
                Ok(())
            }
            Err(e) => {
                inner.fail(&e);
                Err(e)
            }
        }
    }

    /// Reliable send: frame, transmit, wait for the acknowledgment and
    /// retransmit with backoff until acknowledged or retries run out.
    pub async fn send_message(&self, message: &NetworkMessage) -> Result<DeliveryReport, PipeError> {
        let inner = &self.inner;
        inner.require_state("send", &[PipeState::Connected])?;
        let bytes = message.encode(inner.message_limit())?;
        let codec = inner.codec()?;

        let report = inner
            .coordinator
            .send(&**inner, &codec, &bytes, FrameType::Data, &BTreeMap::new())
            .await?;

        inner.status.write().round_trip = Some(report.round_trip);
        debug!(
            pipe_id = %inner.id,
            message_id = %message.id,
            attempts = report.attempts,
            "Message delivered"
        );
        Ok(report)
    }

    /// Fire-and-forget: every frame is written once, nothing is awaited
    pub async fn send_message_unreliable(&self, message: &NetworkMessage) -> Result<(), PipeError> {
        let inner = &self.inner;
        inner.require_state("send", &[PipeState::Connected])?;
        let bytes = message.encode(inner.message_limit())?;
        let codec = inner.codec()?;

        for frame in codec.encode_frames(&bytes, FrameType::Data, &BTreeMap::new())? {
            inner.send_physical(frame.to_bytes()?).await?;
        }
        Ok(())
    }

    /// Opaque bytes, framed like a message and written once per frame.
    /// The peer gets them back whole from [`receive_payloads`](Self::receive_payloads).
    pub async fn send_data(&self, data: &[u8]) -> Result<(), PipeError> {
        let inner = &self.inner;
        inner.require_state("send", &[PipeState::Connected])?;
        inner.check_size(data.len())?;
        let codec = inner.codec()?;

        let headers = BTreeMap::from([(CONTENT_HEADER.to_string(), RAW_CONTENT.to_string())]);
        for frame in codec.encode_frames(data, FrameType::Data, &headers)? {
            inner.send_physical(frame.to_bytes()?).await?;
        }
        Ok(())
    }

    /// Bytes straight to the medium in one physical write, no framing.
    /// They must fit the medium's transfer unit.
    pub async fn send_unframed(&self, bytes: &[u8]) -> Result<(), PipeError> {
        self.inner.require_state("send", &[PipeState::Connected])?;
        self.inner.send_physical(bytes.to_vec()).await
    }

    /// Heartbeat round trip, also recorded as the pipe's RTT
    pub async fn ping(&self) -> Result<Duration, PipeError> {
        let inner = &self.inner;
        inner.require_state("ping", &[PipeState::Connected])?;
        let codec = inner.codec()?;
        let payload = crate::now_ms().to_le_bytes();

        let report = inner
            .coordinator
            .send(&**inner, &codec, &payload, FrameType::Heartbeat, &BTreeMap::new())
            .await?;
        inner.status.write().round_trip = Some(report.round_trip);
        Ok(report.round_trip)
    }

    /// Complete incoming messages. Each call is a fresh subscription that
    /// sees messages arriving from now on.
    pub fn receive_messages(&self) -> impl Stream<Item = NetworkMessage> + Send + Unpin + 'static {
        subscribe(&self.inner.message_tx, &self.inner.id)
    }

    /// Reassembled payloads the peer sent with `send_data`
    pub fn receive_payloads(&self) -> impl Stream<Item = Vec<u8>> + Send + Unpin + 'static {
        subscribe(&self.inner.payload_tx, &self.inner.id)
    }

    /// Every physical read, valid frame or not
    pub fn receive_data(&self) -> impl Stream<Item = Vec<u8>> + Send + Unpin + 'static {
        subscribe(&self.inner.data_tx, &self.inner.id)
    }

    pub fn subscribe_events(&self) -> impl Stream<Item = PipeEvent> + Send + Unpin + 'static {
        subscribe(&self.inner.event_tx, &self.inner.id)
    }

    pub fn status(&self) -> PipeStatus {
        let cell = self.inner.status.read();
        let uptime_seconds = match (cell.state, cell.connected_at) {
            (PipeState::Connected, Some(at)) => at.elapsed().as_secs(),
            _ => 0,
        };
        PipeStatus {
            pipe_id: self.inner.id.clone(),
            pipe_type: self.inner.adapter.pipe_type(),
            state: cell.state,
            error_message: cell.error_message.clone(),
            bytes_sent: cell.bytes_sent,
            bytes_received: cell.bytes_received,
            round_trip_time_ms: cell.round_trip.map(|rtt| rtt.as_millis() as u64),
            uptime_seconds,
        }
    }

    /// Reliable sends still waiting for an acknowledgment
    pub fn pending_sends(&self) -> usize {
        self.inner.coordinator.pending_count()
    }
}

fn subscribe<T: Clone + Send + 'static>(
    tx: &broadcast::Sender<T>,
    pipe_id: &str,
) -> impl Stream<Item = T> + Send + Unpin + 'static {
    let pipe_id = pipe_id.to_string();
    BroadcastStream::new(tx.subscribe()).filter_map(move |item| match item {
        Ok(value) => Some(value),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(pipe_id = %pipe_id, skipped, "Subscriber lagged, items dropped");
            None
        }
    })
}

async fn receive_loop(inner: Weak<PipeInner>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(item) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match item {
            Inbound::Data(bytes) => inner.handle_inbound(bytes).await,
            Inbound::LinkLost(reason) => inner.handle_link_lost(reason),
        }
    }
    trace!("Pipe receive loop ended");
}

impl PipeInner {
    fn state(&self) -> PipeState {
        self.status.read().state
    }

    fn require_state(&self, operation: &'static str, allowed: &[PipeState]) -> Result<(), PipeError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(PipeError::InvalidState { operation, state })
        }
    }

    /// Check and move in one step so two callers cannot both start
    fn begin(
        &self,
        operation: &'static str,
        allowed: &[PipeState],
        to: PipeState,
    ) -> Result<(), PipeError> {
        let from = {
            let mut status = self.status.write();
            let from = status.state;
            if !allowed.contains(&from) {
                return Err(PipeError::InvalidState {
                    operation,
                    state: from,
                });
            }
            status.state = to;
            from
        };
        self.announce(from, to);
        Ok(())
    }

    fn check_config(&self, config: &PipeConfiguration) -> Result<(), PipeError> {
        config.validate()?;
        let expected = self.adapter.pipe_type();
        if config.pipe_type() != expected {
            return Err(PipeError::Configuration(format!(
                "{} settings given to a {} pipe",
                config.pipe_type(),
                expected
            )));
        }
        Ok(())
    }

    fn codec(&self) -> Result<Arc<FrameCodec>, PipeError> {
        self.codec
            .read()
            .clone()
            .ok_or(PipeError::InvalidState {
                operation: "send",
                state: PipeState::Initializing,
            })
    }

    /// Size bound from the adapter's declared capabilities
    fn message_limit(&self) -> usize {
        self.adapter.capabilities().max_message_size
    }

    fn check_size(&self, len: usize) -> Result<(), PipeError> {
        let limit = self.message_limit();
        if len > limit {
            return Err(PipeError::Encoding(format!(
                "{} bytes exceed the {} byte limit of a {} pipe",
                len,
                limit,
                self.adapter.pipe_type()
            )));
        }
        Ok(())
    }

    fn transition(&self, to: PipeState) {
        let from = {
            let mut status = self.status.write();
            let from = status.state;
            status.state = to;
            if to != PipeState::Error {
                status.error_message = None;
            }
            from
        };
        if from != to {
            self.announce(from, to);
        }
    }

    fn announce(&self, from: PipeState, to: PipeState) {
        info!(pipe_id = %self.id, %from, %to, "Pipe state changed");
        let _ = self.event_tx.send(PipeEvent::StateChanged { from, to });
    }

    /// Move to ERROR and remember why. Cancellation is not a failure.
    fn fail(&self, error: &PipeError) {
        if matches!(error, PipeError::Cancelled) {
            return;
        }
        let message = error.to_string();
        let from = {
            let mut status = self.status.write();
            let from = status.state;
            status.state = PipeState::Error;
            status.error_message = Some(message.clone());
            status.connected_at = None;
            from
        };
        warn!(pipe_id = %self.id, %from, error = %message, "Pipe failed");
        if from != PipeState::Error {
            let _ = self.event_tx.send(PipeEvent::StateChanged {
                from,
                to: PipeState::Error,
            });
        }
        let _ = self.event_tx.send(PipeEvent::Failed(message));
        self.coordinator.cancel_all();
    }

    /// Forced disconnect from ERROR: stop in-flight calls and let the
    /// adapter free the medium. Adapter failures are only logged.
    async fn release_after_error(&self) {
        self.abort_tx.send_modify(|generation| *generation += 1);
        self.coordinator.cancel_all();
        if let Err(e) = self
            .guarded(PipeError::Connection, self.adapter.do_disconnect(true))
            .await
        {
            warn!(pipe_id = %self.id, error = %e, "Adapter failed while releasing a failed pipe");
        }
        self.status.write().connected_at = None;
        debug!(pipe_id = %self.id, "Failed pipe released");
    }

    /// Run a physical call under the pipe timeout; a forced disconnect
    /// aborts it with `Cancelled`.
    async fn guarded<T>(
        &self,
        on_timeout: fn(String) -> PipeError,
        operation: impl Future<Output = Result<T, PipeError>>,
    ) -> Result<T, PipeError> {
        let mut abort = self.abort_tx.subscribe();
        let timeout = *self.timeout.read();
        tokio::select! {
            result = tokio::time::timeout(timeout, operation) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(on_timeout(format!("timed out after {} ms", timeout.as_millis()))),
            },
            _ = abort.changed() => Err(PipeError::Cancelled),
        }
    }

    /// One physical write with byte accounting. A failed write puts the
    /// pipe into ERROR.
    async fn send_physical(&self, bytes: Vec<u8>) -> Result<(), PipeError> {
        let len = bytes.len() as u64;
        match self
            .guarded(PipeError::Send, self.adapter.do_send_data(&bytes))
            .await
        {
            Ok(()) => {
                self.status.write().bytes_sent += len;
                Ok(())
            }
            Err(PipeError::Cancelled) => Err(PipeError::Cancelled),
            Err(e) => {
                let e = match e {
                    PipeError::Send(_) => e,
                    other => PipeError::Send(other.to_string()),
                };
                if self.state() == PipeState::Connected {
                    self.fail(&e);
                }
                Err(e)
            }
        }
    }

    fn handle_link_lost(&self, reason: String) {
        if !matches!(self.state(), PipeState::Connecting | PipeState::Connected) {
            debug!(pipe_id = %self.id, state = %self.state(), %reason, "Link loss ignored");
            return;
        }
        self.fail(&PipeError::Connection(format!("link lost: {}", reason)));
    }

    async fn handle_inbound(&self, bytes: Vec<u8>) {
        self.status.write().bytes_received += bytes.len() as u64;
        let frame = decode_frame(&bytes);
        let _ = self.data_tx.send(bytes);

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(pipe_id = %self.id, error = %e, "Dropping undecodable frame");
                let _ = self.event_tx.send(PipeEvent::DecodeFailed(e.to_string()));
                return;
            }
        };

        match frame.frame_type {
            FrameType::Acknowledgment => match Acknowledgment::from_frame(&frame) {
                Ok(ack) => {
                    self.coordinator.acknowledge(&ack);
                }
                Err(e) => warn!(pipe_id = %self.id, error = %e, "Malformed acknowledgment"),
            },
            FrameType::Heartbeat => self.reply_ack(&frame).await,
            FrameType::Error => warn!(
                pipe_id = %self.id,
                frame_id = %frame.frame_id,
                reason = %String::from_utf8_lossy(&frame.payload),
                "Peer reported an error"
            ),
            FrameType::Data | FrameType::Control => self.handle_payload_frame(frame).await,
        }
    }

    async fn handle_payload_frame(&self, frame: Frame) {
        let now = crate::now_ms();
        let outcome = match self.reassembler.lock().as_mut() {
            Some(reassembler) => {
                let expired = reassembler.purge_expired(now);
                if expired > 0 {
                    debug!(pipe_id = %self.id, expired, "Dropped stale partial messages");
                }
                reassembler.accept_at(&frame, now)
            }
            None => return,
        };

        match outcome {
            Ok(Reassembly::Complete(payload)) => {
                self.reply_ack(&frame).await;
                let raw = frame.headers.get(CONTENT_HEADER).map(String::as_str) == Some(RAW_CONTENT);
                if frame.frame_type == FrameType::Data && raw {
                    trace!(pipe_id = %self.id, frame_id = %frame.frame_id, bytes = payload.len(), "Payload received");
                    let _ = self.payload_tx.send(payload);
                } else if frame.frame_type == FrameType::Data {
                    self.emit_message(&payload);
                } else {
                    debug!(pipe_id = %self.id, frame_id = %frame.frame_id, "Control frame received");
                }
            }
            Ok(Reassembly::Duplicate) => {
                // Our earlier ack was probably lost; confirm again, once per
                // retransmitted message rather than once per chunk.
                debug!(pipe_id = %self.id, frame_id = %frame.frame_id, chunk = frame.chunk_index, "Duplicate frame");
                if frame.chunk_index == 0 {
                    self.reply_ack(&frame).await;
                }
            }
            Ok(Reassembly::Incomplete { received, expected }) => {
                trace!(pipe_id = %self.id, frame_id = %frame.frame_id, received, expected, "Chunk buffered");
            }
            Err(e) => {
                warn!(pipe_id = %self.id, frame_id = %frame.frame_id, error = %e, "Reassembly failed");
                let _ = self.event_tx.send(PipeEvent::DecodeFailed(e.to_string()));
            }
        }
    }

    fn emit_message(&self, payload: &[u8]) {
        match NetworkMessage::decode(payload, self.message_limit()) {
            Ok(message) => {
                debug!(pipe_id = %self.id, message_id = %message.id, bytes = payload.len(), "Message received");
                let _ = self
                    .event_tx
                    .send(PipeEvent::MessageReceived(message.id.clone()));
                let _ = self.message_tx.send(message);
            }
            Err(e) => {
                warn!(pipe_id = %self.id, error = %e, "Payload is not a message");
                let _ = self.event_tx.send(PipeEvent::DecodeFailed(e.to_string()));
            }
        }
    }

    /// Best effort: a lost ack only costs the peer a retransmission.
    async fn reply_ack(&self, frame: &Frame) {
        if self.state() != PipeState::Connected {
            trace!(pipe_id = %self.id, "Not connected, ack skipped");
            return;
        }
        let bytes = match Acknowledgment::for_frame(frame).to_frame().to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(pipe_id = %self.id, error = %e, "Could not encode ack");
                return;
            }
        };
        let len = bytes.len() as u64;
        match self
            .guarded(PipeError::Send, self.adapter.do_send_data(&bytes))
            .await
        {
            Ok(()) => self.status.write().bytes_sent += len,
            Err(e) => warn!(pipe_id = %self.id, frame_id = %frame.frame_id, error = %e, "Ack not sent"),
        }
    }
}

#[async_trait]
impl FrameLink for PipeInner {
    async fn transmit(&self, bytes: Vec<u8>) -> Result<(), PipeError> {
        self.send_physical(bytes).await
    }

    fn is_connected(&self) -> bool {
        self.state() == PipeState::Connected
    }
}

impl Drop for PipeInner {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.get_mut().take() {
            task.abort();
        }
    }
}
