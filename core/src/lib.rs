// Meshpipe Core — one delivery contract over every physical medium
//
// A pipe is a single link over QR codes, BLE, NFC or a web socket. Every
// pipe shares the same framing, acknowledgment/retry, store-and-forward and
// distance-vector relay machinery; adapters only move bytes.

pub mod frame;
pub mod logging;
pub mod message;
pub mod pipe;
pub mod relay;
pub mod reliability;
pub mod routing;
pub mod store;
pub mod transport;

pub use frame::{
    decode_frame, Acknowledgment, CodecConfig, Compression, DecodeError, Frame, FrameCodec,
    FrameType, Reassembler, PROTOCOL_VERSION,
};
pub use message::{MessageKind, NetworkMessage, MAX_MESSAGE_SIZE};
pub use pipe::{
    Inbound, InboundSink, Pipe, PipeAdapter, PipeCapabilities, PipeConfiguration, PipeError,
    PipeEvent, PipeSettings, PipeState, PipeStatus, PipeType, QrKissConfig, RadioConfig, WebConfig,
};
pub use relay::{DispatchOutcome, Dispatcher};
pub use reliability::{DeliveryReport, ReliabilityConfig, ReliabilityCoordinator, SendState};
pub use routing::{RoutingConfig, RoutingEntry, RoutingTable, INFINITE_DISTANCE};
pub use store::{MessageStore, MessageStoreConfig, StoredMessage};
pub use transport::{BleAdapter, BridgeError, NfcAdapter, QrKissAdapter, WebAdapter};

/// Milliseconds since the unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000, "clock should be past 2020");
    }
}
