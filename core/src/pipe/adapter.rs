//! Adapter contract — the physical primitives a medium has to supply
//!
//! Everything else (state machine, framing, acknowledgments, retries,
//! counters) lives in [`Pipe`](super::Pipe) and is shared by every adapter.

use super::abstraction::{PipeCapabilities, PipeError, PipeType};
use super::config::PipeConfiguration;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What an adapter reports from the medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One physical read
    Data(Vec<u8>),
    /// The peer or the medium dropped the link
    LinkLost(String),
}

/// Where an adapter pushes what it received from the medium.
///
/// Cheap to clone; adapters hand copies to whatever callback or task reads
/// from the platform.
#[derive(Debug, Clone)]
pub struct InboundSink {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSink {
    /// A sink and the receiving end it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push one physical read. Returns `false` once the pipe is gone.
    pub fn deliver(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(Inbound::Data(bytes)).is_ok()
    }

    /// The link went away underneath the pipe
    pub fn link_lost(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Inbound::LinkLost(reason.into())).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Physical layer of one pipe.
///
/// Implementations only move bytes. They are called by [`Pipe`](super::Pipe)
/// with the state already validated and under the configured timeout.
#[async_trait]
pub trait PipeAdapter: Send + Sync {
    fn pipe_type(&self) -> PipeType;

    fn capabilities(&self) -> PipeCapabilities;

    /// Largest frame payload that fits one physical write.
    /// Only meaningful after `do_initialize` succeeded.
    fn max_chunk_size(&self) -> usize;

    /// Check the medium is usable and take the configuration.
    /// Must reject settings of another pipe type with `Configuration`.
    async fn do_initialize(
        &self,
        config: &PipeConfiguration,
        target: Option<&str>,
        inbound: InboundSink,
    ) -> Result<(), PipeError>;

    async fn do_connect(&self, is_initiator: bool) -> Result<(), PipeError>;

    async fn do_disconnect(&self, force: bool) -> Result<(), PipeError>;

    /// Write one encoded frame (or raw bytes) to the medium
    async fn do_send_data(&self, data: &[u8]) -> Result<(), PipeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_delivers_until_receiver_dropped() {
        let (sink, mut rx) = InboundSink::channel();
        assert!(sink.deliver(vec![1, 2, 3]));
        assert_eq!(rx.recv().await.unwrap(), Inbound::Data(vec![1, 2, 3]));
        assert!(sink.link_lost("peer closed"));
        assert_eq!(rx.recv().await.unwrap(), Inbound::LinkLost("peer closed".into()));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(vec![4]));
    }
}
