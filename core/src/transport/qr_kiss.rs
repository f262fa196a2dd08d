// QR-KISS pipe adapter — animated QR codes over a screen/camera pair
//
// Each frame is shown as one QR code for at least `frame_interval_ms`
// before the next one replaces it. Both sides display and scan, so the
// channel is bidirectional but slow and needs the user to hold the devices
// in view of each other.

use super::BridgeError;
use crate::frame::wire::MIN_FRAME_LEN;
use crate::pipe::{
    InboundSink, PipeAdapter, PipeCapabilities, PipeConfiguration, PipeError, PipeSettings,
    PipeType, QrKissConfig,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Platform display and camera primitives
#[async_trait]
pub trait QrCodeBridge: Send + Sync {
    /// Display and camera both usable
    async fn is_available(&self) -> Result<bool, BridgeError>;

    /// Start the camera; every decoded code is pushed to `sink`
    async fn start_scanning(&self, sink: InboundSink) -> Result<(), BridgeError>;

    async fn stop_scanning(&self) -> Result<(), BridgeError>;

    /// Replace the code on screen with one encoding `data`
    async fn show_code(&self, data: &[u8]) -> Result<(), BridgeError>;

    async fn clear_display(&self) -> Result<(), BridgeError>;
}

pub struct QrKissAdapter {
    bridge: Arc<dyn QrCodeBridge>,
    /// Largest code and fastest refresh this display supports
    display: QrKissConfig,
    capabilities: PipeCapabilities,
    settings: RwLock<Option<QrKissConfig>>,
    inbound: Mutex<Option<InboundSink>>,
    /// When the code currently on screen went up
    last_shown: tokio::sync::Mutex<Option<Instant>>,
}

impl QrKissAdapter {
    /// `display` bounds what a later configuration may ask for; the
    /// capabilities are derived from it once, here.
    pub fn new(bridge: Arc<dyn QrCodeBridge>, display: QrKissConfig) -> Self {
        let per_second = (1_000 / display.frame_interval_ms.max(1)).max(1);
        let capabilities = PipeCapabilities {
            max_message_size: 64 * 1024,
            max_throughput_bps: display.chunk_size as u64 * per_second,
            bidirectional: true,
            requires_user_interaction: true,
            supports_background: false,
        };
        Self {
            bridge,
            display,
            capabilities,
            settings: RwLock::new(None),
            inbound: Mutex::new(None),
            last_shown: tokio::sync::Mutex::new(None),
        }
    }

    fn frame_interval(&self) -> Duration {
        let ms = self
            .settings
            .read()
            .as_ref()
            .map_or(self.display.frame_interval_ms, |s| s.frame_interval_ms);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl PipeAdapter for QrKissAdapter {
    fn pipe_type(&self) -> PipeType {
        PipeType::QrKiss
    }

    fn capabilities(&self) -> PipeCapabilities {
        self.capabilities.clone()
    }

    fn max_chunk_size(&self) -> usize {
        self.settings.read().as_ref().map_or(0, |s| s.chunk_size)
    }

    async fn do_initialize(
        &self,
        config: &PipeConfiguration,
        _target: Option<&str>,
        inbound: InboundSink,
    ) -> Result<(), PipeError> {
        let qr = match &config.settings {
            PipeSettings::QrKiss(qr) => qr.clone(),
            other => {
                return Err(PipeError::Configuration(format!(
                    "QR adapter cannot use {} settings",
                    other.pipe_type()
                )))
            }
        };
        if qr.chunk_size > self.display.chunk_size {
            return Err(PipeError::Configuration(format!(
                "chunk size {} exceeds the display limit of {}",
                qr.chunk_size, self.display.chunk_size
            )));
        }
        if qr.frame_interval_ms < self.display.frame_interval_ms {
            return Err(PipeError::Configuration(format!(
                "frame interval {} ms is faster than the display's {} ms",
                qr.frame_interval_ms, self.display.frame_interval_ms
            )));
        }

        let available = self
            .bridge
            .is_available()
            .await
            .map_err(|e| PipeError::Initialization(e.to_string()))?;
        if !available {
            return Err(PipeError::Initialization("display or camera unavailable".into()));
        }

        info!(
            chunk_size = qr.chunk_size,
            frame_interval_ms = qr.frame_interval_ms,
            code_bytes = qr.chunk_size + MIN_FRAME_LEN,
            "QR adapter ready"
        );
        *self.inbound.lock() = Some(inbound);
        *self.settings.write() = Some(qr);
        Ok(())
    }

    async fn do_connect(&self, is_initiator: bool) -> Result<(), PipeError> {
        let sink = self
            .inbound
            .lock()
            .clone()
            .ok_or_else(|| PipeError::Connection("QR adapter not initialized".into()))?;
        debug!(initiator = is_initiator, "QR scanning started");
        self.bridge
            .start_scanning(sink)
            .await
            .map_err(|e| PipeError::Connection(e.to_string()))
    }

    async fn do_disconnect(&self, _force: bool) -> Result<(), PipeError> {
        *self.last_shown.lock().await = None;
        let stopped = self.bridge.stop_scanning().await;
        let cleared = self.bridge.clear_display().await;
        stopped
            .and(cleared)
            .map_err(|e| PipeError::Connection(e.to_string()))
    }

    /// Waits out the current code's display interval, then shows `data`.
    /// Concurrent sends queue up behind each other.
    async fn do_send_data(&self, data: &[u8]) -> Result<(), PipeError> {
        let interval = self.frame_interval();
        let mut last_shown = self.last_shown.lock().await;
        if let Some(shown_at) = *last_shown {
            let due = shown_at + interval;
            if due > Instant::now() {
                trace!(wait_ms = (due - Instant::now()).as_millis() as u64, "QR pacing");
                tokio::time::sleep_until(due).await;
            }
        }
        self.bridge
            .show_code(data)
            .await
            .map_err(|e| PipeError::Send(e.to_string()))?;
        *last_shown = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{Pipe, RadioConfig};

    #[derive(Default)]
    struct FakeScreen {
        shown: Mutex<Vec<(Instant, Vec<u8>)>>,
        scanning: Mutex<Option<InboundSink>>,
    }

    #[async_trait]
    impl QrCodeBridge for FakeScreen {
        async fn is_available(&self) -> Result<bool, BridgeError> {
            Ok(true)
        }

        async fn start_scanning(&self, sink: InboundSink) -> Result<(), BridgeError> {
            *self.scanning.lock() = Some(sink);
            Ok(())
        }

        async fn stop_scanning(&self) -> Result<(), BridgeError> {
            *self.scanning.lock() = None;
            Ok(())
        }

        async fn show_code(&self, data: &[u8]) -> Result<(), BridgeError> {
            self.shown.lock().push((Instant::now(), data.to_vec()));
            Ok(())
        }

        async fn clear_display(&self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    fn config(chunk_size: usize, frame_interval_ms: u64) -> PipeConfiguration {
        PipeConfiguration::new(PipeSettings::QrKiss(QrKissConfig {
            chunk_size,
            frame_interval_ms,
        }))
    }

    fn display() -> QrKissConfig {
        QrKissConfig {
            chunk_size: 300,
            frame_interval_ms: 50,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_codes_are_paced_by_frame_interval() {
        let screen = Arc::new(FakeScreen::default());
        let pipe = Pipe::new("qr", Arc::new(QrKissAdapter::new(screen.clone(), display())));
        pipe.initialize(config(32, 200), None).await.unwrap();
        pipe.connect(true).await.unwrap();

        for _ in 0..3 {
            pipe.send_data(b"code").await.unwrap();
        }

        let shown = screen.shown.lock();
        assert_eq!(shown.len(), 3);
        assert_eq!(shown[1].0 - shown[0].0, Duration::from_millis(200));
        assert_eq!(shown[2].0 - shown[1].0, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_capabilities_fixed_at_construction() {
        let adapter = QrKissAdapter::new(Arc::new(FakeScreen::default()), display());
        let before = adapter.capabilities();
        assert_eq!(before.max_throughput_bps, 300 * 20);

        let (sink, _rx) = InboundSink::channel();
        adapter.do_initialize(&config(100, 200), None, sink).await.unwrap();
        assert_eq!(adapter.max_chunk_size(), 100);
        assert_eq!(adapter.capabilities(), before);
    }

    #[tokio::test]
    async fn test_settings_beyond_display_rejected() {
        let adapter = QrKissAdapter::new(Arc::new(FakeScreen::default()), display());
        let (sink, _rx) = InboundSink::channel();
        assert!(matches!(
            adapter.do_initialize(&config(301, 100), None, sink.clone()).await,
            Err(PipeError::Configuration(_))
        ));
        assert!(matches!(
            adapter.do_initialize(&config(64, 10), None, sink).await,
            Err(PipeError::Configuration(_))
        ));
        assert_eq!(adapter.max_chunk_size(), 0);
    }

    #[tokio::test]
    async fn test_scanner_feeds_pipe_and_stops_on_disconnect() {
        let screen = Arc::new(FakeScreen::default());
        let pipe = Pipe::new("qr", Arc::new(QrKissAdapter::new(screen.clone(), display())));
        pipe.initialize(config(32, 50), None).await.unwrap();
        pipe.connect(false).await.unwrap();
        assert!(screen.scanning.lock().is_some());

        pipe.disconnect(false).await.unwrap();
        assert!(screen.scanning.lock().is_none());
    }

    #[tokio::test]
    async fn test_rejects_radio_settings() {
        let adapter = QrKissAdapter::new(Arc::new(FakeScreen::default()), display());
        let (sink, _rx) = InboundSink::channel();
        let radio = PipeConfiguration::new(PipeSettings::Ble(RadioConfig {
            service_uuid: "s".into(),
            characteristic_uuid: "c".into(),
            mtu: 512,
        }));
        assert!(matches!(
            adapter.do_initialize(&radio, None, sink).await,
            Err(PipeError::Configuration(_))
        ));
    }
}
