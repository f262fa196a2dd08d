// Shared fixtures: an in-memory BLE link between two pipes

#![allow(dead_code)]

use async_trait::async_trait;
use meshpipe_core::pipe::{
    InboundSink, Pipe, PipeConfiguration, PipeSettings, RadioConfig,
};
use meshpipe_core::transport::{BleAdapter, BleBridge, BridgeError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Slot = Arc<Mutex<Option<InboundSink>>>;

/// One end of a perfect radio link. Writes land in the other end's sink
/// unless the link is told to lose them.
pub struct LinkedRadio {
    inbox: Slot,
    peer_inbox: Slot,
    connected: AtomicBool,
    /// Silently lose this many upcoming writes
    lose_next: AtomicUsize,
    /// Lose every write (peer out of range)
    blackhole: AtomicBool,
    pub writes: AtomicUsize,
}

impl LinkedRadio {
    pub fn lose_next(&self, n: usize) {
        self.lose_next.store(n, Ordering::SeqCst);
    }

    pub fn set_blackhole(&self, on: bool) {
        self.blackhole.store(on, Ordering::SeqCst);
    }
}

pub fn radio_pair() -> (Arc<LinkedRadio>, Arc<LinkedRadio>) {
    let a: Slot = Arc::new(Mutex::new(None));
    let b: Slot = Arc::new(Mutex::new(None));
    let make = |inbox: &Slot, peer: &Slot| {
        Arc::new(LinkedRadio {
            inbox: inbox.clone(),
            peer_inbox: peer.clone(),
            connected: AtomicBool::new(false),
            lose_next: AtomicUsize::new(0),
            blackhole: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    };
    (make(&a, &b), make(&b, &a))
}

#[async_trait]
impl BleBridge for LinkedRadio {
    async fn is_available(&self) -> Result<bool, BridgeError> {
        Ok(true)
    }

    async fn configure(
        &self,
        _service_uuid: String,
        _characteristic_uuid: String,
        _mtu: usize,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    fn set_receiver(&self, sink: InboundSink) {
        *self.inbox.lock() = Some(sink);
    }

    async fn connect(&self, _target: Option<String>, _as_central: bool) -> Result<(), BridgeError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, data: Vec<u8>) -> Result<(), BridgeError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.blackhole.load(Ordering::SeqCst) {
            return Ok(());
        }
        let lost = self
            .lose_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(());
        }
        if let Some(sink) = self.peer_inbox.lock().as_ref() {
            sink.deliver(data);
        }
        Ok(())
    }
}

pub fn radio_config(mtu: usize) -> PipeConfiguration {
    PipeConfiguration::new(PipeSettings::Ble(RadioConfig {
        service_uuid: "0000df01-0000-1000-8000-00805f9b34fb".into(),
        characteristic_uuid: "0000df02-0000-1000-8000-00805f9b34fb".into(),
        mtu,
    }))
}

/// Two connected BLE pipes talking over a [`LinkedRadio`] pair
pub async fn connected_pair(
    name_a: &str,
    name_b: &str,
    config: PipeConfiguration,
) -> (Pipe, Pipe, Arc<LinkedRadio>, Arc<LinkedRadio>) {
    let (radio_a, radio_b) = radio_pair();
    let a = Pipe::new(name_a, Arc::new(BleAdapter::new(radio_a.clone())));
    let b = Pipe::new(name_b, Arc::new(BleAdapter::new(radio_b.clone())));

    a.initialize(config.clone(), Some(name_b)).await.unwrap();
    b.initialize(config, Some(name_a)).await.unwrap();
    b.connect(false).await.unwrap();
    a.connect(true).await.unwrap();
    (a, b, radio_a, radio_b)
}
