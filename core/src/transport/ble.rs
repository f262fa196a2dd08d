// BLE pipe adapter
//
// One GATT characteristic carries whole frames. The initiator acts as the
// central and connects to the target; the other side advertises the service
// and waits. Every write must fit the ATT MTU, so the frame payload budget
// is `mtu - ATT header - frame overhead`.

use super::{chunk_size_for, BridgeError};
use crate::pipe::{
    InboundSink, PipeAdapter, PipeCapabilities, PipeConfiguration, PipeError, PipeSettings,
    PipeType, RadioConfig,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// ATT write header (opcode + handle)
pub const ATT_HEADER_LEN: usize = 3;

/// Platform Bluetooth LE primitives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleBridge: Send + Sync {
    /// Radio present, powered and permitted
    async fn is_available(&self) -> Result<bool, BridgeError>;

    /// Register the GATT service/characteristic and the negotiated MTU
    async fn configure(
        &self,
        service_uuid: String,
        characteristic_uuid: String,
        mtu: usize,
    ) -> Result<(), BridgeError>;

    /// Where notifications/writes from the peer go, and where a dropped
    /// connection is reported with `InboundSink::link_lost`
    fn set_receiver(&self, sink: InboundSink);

    /// Central: connect to `target`. Peripheral: advertise and accept.
    async fn connect(&self, target: Option<String>, as_central: bool) -> Result<(), BridgeError>;

    async fn disconnect(&self) -> Result<(), BridgeError>;

    async fn write(&self, data: Vec<u8>) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone)]
struct BleSession {
    radio: RadioConfig,
    target: Option<String>,
    chunk_size: usize,
}

pub struct BleAdapter {
    bridge: Arc<dyn BleBridge>,
    session: RwLock<Option<BleSession>>,
}

impl BleAdapter {
    pub fn new(bridge: Arc<dyn BleBridge>) -> Self {
        Self {
            bridge,
            session: RwLock::new(None),
        }
    }

    fn session(&self) -> Result<BleSession, PipeError> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| PipeError::Connection("BLE adapter not initialized".into()))
    }
}

#[async_trait]
impl PipeAdapter for BleAdapter {
    fn pipe_type(&self) -> PipeType {
        PipeType::Ble
    }

    fn capabilities(&self) -> PipeCapabilities {
        PipeCapabilities {
            max_message_size: 1024 * 1024,
            max_throughput_bps: 20_000,
            bidirectional: true,
            requires_user_interaction: false,
            supports_background: true,
        }
    }

    fn max_chunk_size(&self) -> usize {
        self.session.read().as_ref().map_or(0, |s| s.chunk_size)
    }

    async fn do_initialize(
        &self,
        config: &PipeConfiguration,
        target: Option<&str>,
        inbound: InboundSink,
    ) -> Result<(), PipeError> {
        let radio = match &config.settings {
            PipeSettings::Ble(radio) => radio.clone(),
            other => {
                return Err(PipeError::Configuration(format!(
                    "BLE adapter cannot use {} settings",
                    other.pipe_type()
                )))
            }
        };
        let chunk_size = chunk_size_for(radio.mtu, ATT_HEADER_LEN)?;

        let available = self
            .bridge
            .is_available()
            .await
            .map_err(|e| PipeError::Initialization(e.to_string()))?;
        if !available {
            return Err(PipeError::Initialization("Bluetooth LE unavailable".into()));
        }

        self.bridge
            .configure(
                radio.service_uuid.clone(),
                radio.characteristic_uuid.clone(),
                radio.mtu,
            )
            .await
            .map_err(|e| PipeError::Initialization(e.to_string()))?;
        self.bridge.set_receiver(inbound);

        info!(service = %radio.service_uuid, mtu = radio.mtu, chunk_size, "BLE adapter ready");
        *self.session.write() = Some(BleSession {
            radio,
            target: target.map(str::to_string),
            chunk_size,
        });
        Ok(())
    }

    async fn do_connect(&self, is_initiator: bool) -> Result<(), PipeError> {
        let session = self.session()?;
        if is_initiator && session.target.is_none() {
            return Err(PipeError::Connection(
                "central role needs a target peripheral".into(),
            ));
        }
        debug!(target = ?session.target, central = is_initiator, "BLE connecting");
        self.bridge
            .connect(session.target, is_initiator)
            .await
            .map_err(|e| PipeError::Connection(e.to_string()))
    }

    async fn do_disconnect(&self, force: bool) -> Result<(), PipeError> {
        debug!(force, "BLE disconnecting");
        match self.bridge.disconnect().await {
            Ok(()) | Err(BridgeError::NotConnected) => Ok(()),
            Err(e) => Err(PipeError::Connection(e.to_string())),
        }
    }

    async fn do_send_data(&self, data: &[u8]) -> Result<(), PipeError> {
        let session = self.session().map_err(|e| PipeError::Send(e.to_string()))?;
        let limit = session.radio.mtu - ATT_HEADER_LEN;
        if data.len() > limit {
            return Err(PipeError::Send(format!(
                "{} bytes exceed the {} byte ATT payload",
                data.len(),
                limit
            )));
        }
        self.bridge
            .write(data.to_vec())
            .await
            .map_err(|e| PipeError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::wire::MIN_FRAME_LEN;
    use crate::pipe::{Pipe, PipeState, QrKissConfig};
    use mockall::predicate::eq;

    fn radio(mtu: usize) -> RadioConfig {
        RadioConfig {
            service_uuid: "0000df01-0000-1000-8000-00805f9b34fb".into(),
            characteristic_uuid: "0000df02-0000-1000-8000-00805f9b34fb".into(),
            mtu,
        }
    }

    fn ready_bridge() -> MockBleBridge {
        let mut bridge = MockBleBridge::new();
        bridge.expect_is_available().returning(|| Ok(true));
        bridge.expect_configure().returning(|_, _, _| Ok(()));
        bridge.expect_set_receiver().return_const(());
        bridge
    }

    #[tokio::test]
    async fn test_chunk_size_follows_mtu() {
        let adapter = BleAdapter::new(Arc::new(ready_bridge()));
        let (sink, _rx) = InboundSink::channel();
        adapter
            .do_initialize(
                &PipeConfiguration::new(PipeSettings::Ble(radio(185))),
                Some("AA:BB"),
                sink,
            )
            .await
            .unwrap();
        assert_eq!(adapter.max_chunk_size(), 185 - ATT_HEADER_LEN - MIN_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_rejects_other_settings() {
        let adapter = BleAdapter::new(Arc::new(MockBleBridge::new()));
        let (sink, _rx) = InboundSink::channel();
        let err = adapter
            .do_initialize(
                &PipeConfiguration::new(PipeSettings::QrKiss(QrKissConfig::default())),
                None,
                sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_tiny_mtu_is_configuration_error() {
        let adapter = BleAdapter::new(Arc::new(MockBleBridge::new()));
        let (sink, _rx) = InboundSink::channel();
        let err = adapter
            .do_initialize(&PipeConfiguration::new(PipeSettings::Ble(radio(23))), None, sink)
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unavailable_radio_fails_pipe_initialize() {
        let mut bridge = MockBleBridge::new();
        bridge.expect_is_available().returning(|| Ok(false));
        let pipe = Pipe::new("ble", Arc::new(BleAdapter::new(Arc::new(bridge))));

        let err = pipe
            .initialize(PipeConfiguration::new(PipeSettings::Ble(radio(512))), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::Initialization(_)));
        assert_eq!(pipe.state(), PipeState::Error);
    }

    #[tokio::test]
    async fn test_central_connects_to_target_and_writes() {
        let mut bridge = ready_bridge();
        bridge
            .expect_connect()
            .with(eq(Some("AA:BB".to_string())), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        bridge
            .expect_write()
            .withf(|data| data == b"raw")
            .times(1)
            .returning(|_| Ok(()));

        let pipe = Pipe::new("ble", Arc::new(BleAdapter::new(Arc::new(bridge))));
        pipe.initialize(PipeConfiguration::new(PipeSettings::Ble(radio(512))), Some("AA:BB"))
            .await
            .unwrap();
        pipe.connect(true).await.unwrap();
        pipe.send_unframed(b"raw").await.unwrap();
        assert_eq!(pipe.status().bytes_sent, 3);
    }

    #[tokio::test]
    async fn test_send_data_beyond_mtu_is_chunked() {
        let written = Arc::new(parking_lot::Mutex::new(Vec::<Vec<u8>>::new()));
        let log = written.clone();
        let mut bridge = ready_bridge();
        bridge.expect_connect().returning(|_, _| Ok(()));
        bridge.expect_write().returning(move |data| {
            log.lock().push(data);
            Ok(())
        });

        let pipe = Pipe::new("ble", Arc::new(BleAdapter::new(Arc::new(bridge))));
        pipe.initialize(PipeConfiguration::new(PipeSettings::Ble(radio(185))), Some("AA:BB"))
            .await
            .unwrap();
        pipe.connect(true).await.unwrap();

        pipe.send_data(&[7u8; 1000]).await.unwrap();
        assert_eq!(pipe.state(), PipeState::Connected);
        let written = written.lock();
        assert!(written.len() > 1);
        assert!(written.iter().all(|w| w.len() <= 185 - ATT_HEADER_LEN));
        assert_eq!(
            pipe.status().bytes_sent,
            written.iter().map(|w| w.len() as u64).sum::<u64>()
        );
    }

    #[tokio::test]
    async fn test_central_without_target_fails() {
        let pipe = Pipe::new("ble", Arc::new(BleAdapter::new(Arc::new(ready_bridge()))));
        pipe.initialize(PipeConfiguration::new(PipeSettings::Ble(radio(512))), None)
            .await
            .unwrap();

        let err = pipe.connect(true).await.unwrap_err();
        assert!(matches!(err, PipeError::Connection(_)));
        assert_eq!(pipe.state(), PipeState::Error);
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let mut bridge = ready_bridge();
        bridge.expect_write().never();
        let adapter = BleAdapter::new(Arc::new(bridge));
        let (sink, _rx) = InboundSink::channel();
        adapter
            .do_initialize(&PipeConfiguration::new(PipeSettings::Ble(radio(100))), None, sink)
            .await
            .unwrap();

        let err = adapter.do_send_data(&[0u8; 98]).await.unwrap_err();
        assert!(matches!(err, PipeError::Send(_)));
    }

    #[tokio::test]
    async fn test_disconnect_when_link_already_gone() {
        let mut bridge = MockBleBridge::new();
        bridge
            .expect_disconnect()
            .returning(|| Err(BridgeError::NotConnected));
        let adapter = BleAdapter::new(Arc::new(bridge));
        assert!(adapter.do_disconnect(false).await.is_ok());
    }
}
