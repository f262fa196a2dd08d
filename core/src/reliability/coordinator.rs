//! Reliability Coordinator — per-send state machine
//!
//! ```text
//! Pending --ack--> Acked
//! Pending --timeout, retries left--> Retrying --> Pending
//! Pending --timeout, no retries left--> Failed
//! ```
//!
//! Acknowledgments are matched by frame id, never by arrival order. An ack
//! for an unknown or already-acked frame id is ignored.

use super::backoff::ReliabilityConfig;
use crate::frame::{Acknowledgment, FrameCodec, FrameType};
use crate::pipe::PipeError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the coordinator puts encoded frames
#[async_trait]
pub trait FrameLink: Send + Sync {
    /// Hand one encoded frame to the physical layer
    async fn transmit(&self, bytes: Vec<u8>) -> Result<(), PipeError>;

    /// Whether sending still makes sense
    fn is_connected(&self) -> bool;
}

/// State of one outstanding send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Pending,
    Retrying,
    Acked,
    Failed,
}

/// Successful delivery summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub frame_id: Uuid,
    /// Attempts used, first try included
    pub attempts: u32,
    /// Time from the last transmission to its acknowledgment
    pub round_trip: Duration,
}

struct PendingSend {
    state: SendState,
    attempts: u32,
    ack_tx: Option<oneshot::Sender<Acknowledgment>>,
}

/// Removes the pending entry however `send` exits, including when the
/// caller drops the future.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<Uuid, PendingSend>>,
    frame_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.frame_id);
    }
}

/// Acknowledgment tracking and retransmission for one pipe
pub struct ReliabilityCoordinator {
    config: RwLock<ReliabilityConfig>,
    pending: Mutex<HashMap<Uuid, PendingSend>>,
}

impl ReliabilityCoordinator {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config: RwLock::new(config),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> ReliabilityConfig {
        self.config.read().clone()
    }

    /// Applies to sends started after the call
    pub fn set_config(&self, config: ReliabilityConfig) {
        *self.config.write() = config;
    }

    /// Send `payload` over `link` until acknowledged or out of retries.
    ///
    /// Every attempt re-encodes and re-sends all chunks under the same frame
    /// id. Fails with `Cancelled` when the link drops or [`cancel_all`] runs,
    /// and with `ReliabilityExhausted` when no acknowledgment arrives.
    ///
    /// [`cancel_all`]: ReliabilityCoordinator::cancel_all
    pub async fn send(
        &self,
        link: &dyn FrameLink,
        codec: &FrameCodec,
        payload: &[u8],
        frame_type: FrameType,
        headers: &BTreeMap<String, String>,
    ) -> Result<DeliveryReport, PipeError> {
        let config = self.config();
        let max_attempts = config.max_attempts();
        let frame_id = Uuid::new_v4();
        let sequence = codec.next_sequence();

        let (ack_tx, mut ack_rx) = oneshot::channel();
        self.pending.lock().insert(
            frame_id,
            PendingSend {
                state: SendState::Pending,
                attempts: 0,
                ack_tx: Some(ack_tx),
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            frame_id,
        };

        for attempt in 1..=max_attempts {
            if !link.is_connected() {
                debug!(frame_id = %frame_id, attempt, "Link gone, abandoning send");
                self.set_state(frame_id, SendState::Failed);
                return Err(PipeError::Cancelled);
            }
            {
                let mut pending = self.pending.lock();
                match pending.get_mut(&frame_id) {
                    Some(entry) if entry.state == SendState::Acked => {}
                    Some(entry) => {
                        entry.state = SendState::Pending;
                        entry.attempts = attempt;
                    }
                    None => return Err(PipeError::Cancelled),
                }
            }

            let frames =
                codec.encode_frames_with_id(frame_id, sequence, payload, frame_type, headers)?;
            let sent_at = Instant::now();
            for frame in &frames {
                link.transmit(frame.to_bytes()?).await?;
            }

            let wait = config.timeout_for_attempt(attempt);
            match tokio::time::timeout(wait, &mut ack_rx).await {
                Ok(Ok(ack)) => {
                    let round_trip = sent_at.elapsed();
                    debug!(
                        frame_id = %frame_id,
                        attempt,
                        rtt_ms = round_trip.as_millis() as u64,
                        sequence = ack.sequence_number,
                        "Send acknowledged"
                    );
                    return Ok(DeliveryReport {
                        frame_id,
                        attempts: attempt,
                        round_trip,
                    });
                }
                Ok(Err(_)) => {
                    debug!(frame_id = %frame_id, "Send cancelled");
                    return Err(PipeError::Cancelled);
                }
                Err(_) if attempt < max_attempts => {
                    self.set_state(frame_id, SendState::Retrying);
                    warn!(
                        frame_id = %frame_id,
                        attempt,
                        waited_ms = wait.as_millis() as u64,
                        "No acknowledgment, retrying"
                    );
                }
                Err(_) => {}
            }
        }

        self.set_state(frame_id, SendState::Failed);
        info!(frame_id = %frame_id, attempts = max_attempts, "Retries exhausted");
        Err(PipeError::ReliabilityExhausted {
            frame_id,
            attempts: max_attempts,
        })
    }

    /// Resolve the send waiting on `ack.frame_id`.
    ///
    /// Returns `false` (and does nothing) for unknown or already-acked ids.
    pub fn acknowledge(&self, ack: &Acknowledgment) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&ack.frame_id) else {
            debug!(frame_id = %ack.frame_id, "Ack for unknown frame ignored");
            return false;
        };
        let Some(tx) = entry.ack_tx.take() else {
            return false;
        };
        entry.state = SendState::Acked;
        // The receiver may already be gone if the send was dropped.
        tx.send(*ack).is_ok()
    }

    /// Abort every outstanding send with `Cancelled`
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let mut cancelled = 0;
        for entry in pending.values_mut() {
            if entry.ack_tx.take().is_some() {
                entry.state = SendState::Failed;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled outstanding sends");
        }
        cancelled
    }

    pub fn state_of(&self, frame_id: &Uuid) -> Option<SendState> {
        self.pending.lock().get(frame_id).map(|p| p.state)
    }

    pub fn attempts_of(&self, frame_id: &Uuid) -> Option<u32> {
        self.pending.lock().get(frame_id).map(|p| p.attempts)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn set_state(&self, frame_id: Uuid, state: SendState) {
        if let Some(entry) = self.pending.lock().get_mut(&frame_id) {
            entry.state = state;
        }
    }
}

impl Default for ReliabilityCoordinator {
    fn default() -> Self {
        Self::new(ReliabilityConfig::default())
    }
}
