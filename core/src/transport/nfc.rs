// NFC pipe adapter
//
// Frames travel as APDU bodies between a reader (the initiator) and a card
// emulator. `RadioConfig::service_uuid` is used as the application
// identifier; `mtu` is the largest APDU the pair supports.

use super::{chunk_size_for, BridgeError};
use crate::pipe::{
    InboundSink, PipeAdapter, PipeCapabilities, PipeConfiguration, PipeError, PipeSettings,
    PipeType, RadioConfig,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// CLA INS P1 P2 Lc
pub const APDU_HEADER_LEN: usize = 5;

/// Platform NFC primitives
#[async_trait]
pub trait NfcBridge: Send + Sync {
    async fn is_available(&self) -> Result<bool, BridgeError>;

    /// Register the application identifier to select / emulate
    async fn select_application(&self, aid: &str) -> Result<(), BridgeError>;

    fn set_receiver(&self, sink: InboundSink);

    /// Reader mode polls for the card; card mode waits to be tapped
    async fn start_session(&self, as_reader: bool) -> Result<(), BridgeError>;

    async fn end_session(&self) -> Result<(), BridgeError>;

    async fn transmit(&self, apdu_body: &[u8]) -> Result<(), BridgeError>;
}

pub struct NfcAdapter {
    bridge: Arc<dyn NfcBridge>,
    radio: RwLock<Option<RadioConfig>>,
}

impl NfcAdapter {
    pub fn new(bridge: Arc<dyn NfcBridge>) -> Self {
        Self {
            bridge,
            radio: RwLock::new(None),
        }
    }

    fn apdu_limit(&self) -> Option<usize> {
        self.radio
            .read()
            .as_ref()
            .map(|r| r.mtu.saturating_sub(APDU_HEADER_LEN))
    }
}

#[async_trait]
impl PipeAdapter for NfcAdapter {
    fn pipe_type(&self) -> PipeType {
        PipeType::Nfc
    }

    fn capabilities(&self) -> PipeCapabilities {
        PipeCapabilities {
            max_message_size: 32 * 1024,
            max_throughput_bps: 53_000,
            bidirectional: true,
            requires_user_interaction: true,
            supports_background: false,
        }
    }

    fn max_chunk_size(&self) -> usize {
        self.radio
            .read()
            .as_ref()
            .and_then(|r| chunk_size_for(r.mtu, APDU_HEADER_LEN).ok())
            .unwrap_or(0)
    }

    async fn do_initialize(
        &self,
        config: &PipeConfiguration,
        _target: Option<&str>,
        inbound: InboundSink,
    ) -> Result<(), PipeError> {
        let radio = match &config.settings {
            PipeSettings::Nfc(radio) => radio.clone(),
            other => {
                return Err(PipeError::Configuration(format!(
                    "NFC adapter cannot use {} settings",
                    other.pipe_type()
                )))
            }
        };
        chunk_size_for(radio.mtu, APDU_HEADER_LEN)?;

        match self.bridge.is_available().await {
            Ok(true) => {}
            Ok(false) => return Err(PipeError::Initialization("NFC unavailable".into())),
            Err(e) => return Err(PipeError::Initialization(e.to_string())),
        }
        self.bridge
            .select_application(&radio.service_uuid)
            .await
            .map_err(|e| PipeError::Initialization(e.to_string()))?;
        self.bridge.set_receiver(inbound);

        info!(aid = %radio.service_uuid, mtu = radio.mtu, "NFC adapter ready");
        *self.radio.write() = Some(radio);
        Ok(())
    }

    async fn do_connect(&self, is_initiator: bool) -> Result<(), PipeError> {
        debug!(reader = is_initiator, "NFC session starting");
        self.bridge
            .start_session(is_initiator)
            .await
            .map_err(|e| PipeError::Connection(e.to_string()))
    }

    async fn do_disconnect(&self, _force: bool) -> Result<(), PipeError> {
        match self.bridge.end_session().await {
            Ok(()) | Err(BridgeError::NotConnected) => Ok(()),
            Err(e) => Err(PipeError::Connection(e.to_string())),
        }
    }

    async fn do_send_data(&self, data: &[u8]) -> Result<(), PipeError> {
        let limit = self
            .apdu_limit()
            .ok_or_else(|| PipeError::Send("NFC adapter not initialized".into()))?;
        if data.len() > limit {
            return Err(PipeError::Send(format!(
                "{} bytes exceed the {} byte APDU body",
                data.len(),
                limit
            )));
        }
        self.bridge
            .transmit(data)
            .await
            .map_err(|e| PipeError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{Pipe, PipeState};
    use parking_lot::Mutex;

    /// Tap that never leaves: records selected AIDs and transmitted bodies
    #[derive(Default)]
    struct FakeNfc {
        available: bool,
        selected: Mutex<Vec<String>>,
        sent: Mutex<Vec<Vec<u8>>>,
        tapped_out: bool,
    }

    #[async_trait]
    impl NfcBridge for FakeNfc {
        async fn is_available(&self) -> Result<bool, BridgeError> {
            Ok(self.available)
        }

        async fn select_application(&self, aid: &str) -> Result<(), BridgeError> {
            self.selected.lock().push(aid.to_string());
            Ok(())
        }

        fn set_receiver(&self, _sink: InboundSink) {}

        async fn start_session(&self, _as_reader: bool) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn end_session(&self) -> Result<(), BridgeError> {
            if self.tapped_out {
                Err(BridgeError::NotConnected)
            } else {
                Ok(())
            }
        }

        async fn transmit(&self, apdu_body: &[u8]) -> Result<(), BridgeError> {
            if self.tapped_out {
                return Err(BridgeError::NotConnected);
            }
            self.sent.lock().push(apdu_body.to_vec());
            Ok(())
        }
    }

    fn config() -> PipeConfiguration {
        PipeConfiguration::new(PipeSettings::Nfc(RadioConfig {
            service_uuid: "F0010203040506".into(),
            characteristic_uuid: "-".into(),
            mtu: 261,
        }))
    }

    #[tokio::test]
    async fn test_selects_aid_from_service_uuid() {
        let bridge = Arc::new(FakeNfc {
            available: true,
            ..Default::default()
        });
        let pipe = Pipe::new("nfc", Arc::new(NfcAdapter::new(bridge.clone())));
        pipe.initialize(config(), None).await.unwrap();

        assert_eq!(*bridge.selected.lock(), vec!["F0010203040506".to_string()]);
        assert!(pipe.capabilities().requires_user_interaction);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let pipe = Pipe::new("nfc", Arc::new(NfcAdapter::new(Arc::new(FakeNfc::default()))));
        assert!(matches!(
            pipe.initialize(config(), None).await,
            Err(PipeError::Initialization(_))
        ));
    }

    #[tokio::test]
    async fn test_lost_tap_fails_send_and_pipe_stays_failed() {
        let bridge = Arc::new(FakeNfc {
            available: true,
            tapped_out: true,
            ..Default::default()
        });
        let pipe = Pipe::new("nfc", Arc::new(NfcAdapter::new(bridge)));
        pipe.initialize(config(), None).await.unwrap();
        pipe.connect(true).await.unwrap();

        assert!(matches!(pipe.send_data(b"x").await, Err(PipeError::Send(_))));
        assert_eq!(pipe.state(), PipeState::Error);

        assert!(matches!(
            pipe.disconnect(false).await,
            Err(PipeError::InvalidState { .. })
        ));
        // The session teardown fails too, but a forced release still returns.
        pipe.disconnect(true).await.unwrap();
        assert_eq!(pipe.state(), PipeState::Error);
    }
}
