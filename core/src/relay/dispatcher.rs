//! Dispatcher — send, forward, park and retry messages across pipes

use crate::message::{MessageKind, NetworkMessage};
use crate::pipe::{Pipe, PipeError};
use crate::routing::{RoutingEntry, RoutingTable};
use crate::store::MessageStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// What happened to a message handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Addressed to this node and delivered to local subscribers
    Local,
    /// Acknowledged by the next hop
    Sent { next_hop: String, attempts: u32 },
    /// No usable pipe right now; parked in the message store
    Stored,
    /// Hop budget exhausted
    Dropped,
    /// Route advertisement applied; number of entries that changed
    RoutesUpdated(usize),
}

pub struct Dispatcher {
    local_id: String,
    routing: Arc<RoutingTable>,
    store: Arc<MessageStore>,
    pipes: RwLock<HashMap<String, Pipe>>,
    receivers: Mutex<HashMap<String, JoinHandle<()>>>,
    local_tx: broadcast::Sender<NetworkMessage>,
}

impl Dispatcher {
    pub fn new(routing: Arc<RoutingTable>, store: Arc<MessageStore>) -> Self {
        let (local_tx, _) = broadcast::channel(256);
        Self {
            local_id: routing.local_id().to_string(),
            routing,
            store,
            pipes: RwLock::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
            local_tx,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Use `pipe` for the direct neighbour `neighbor` (one hop away)
    pub fn register_pipe(&self, neighbor: impl Into<String>, pipe: Pipe) {
        let neighbor = neighbor.into();
        self.routing
            .add_route(RoutingEntry::new(neighbor.clone(), neighbor.clone(), 1));
        info!(neighbor = %neighbor, pipe_id = %pipe.id(), "Pipe registered");
        self.pipes.write().insert(neighbor, pipe);
    }

    /// Forget the neighbour; routes through it become unreachable
    pub fn unregister_pipe(&self, neighbor: &str) -> Option<Pipe> {
        if let Some(task) = self.receivers.lock().remove(neighbor) {
            task.abort();
        }
        self.routing.remove_neighbor(neighbor);
        self.pipes.write().remove(neighbor)
    }

    pub fn pipe_for(&self, neighbor: &str) -> Option<Pipe> {
        self.pipes.read().get(neighbor).cloned()
    }

    /// Feed everything arriving on the neighbour's pipe into
    /// [`handle_incoming`](Self::handle_incoming).
    pub fn start_receiving(self: &Arc<Self>, neighbor: &str) -> bool {
        let Some(pipe) = self.pipe_for(neighbor) else {
            return false;
        };
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        let mut incoming = pipe.receive_messages();
        let from = neighbor.to_string();

        let task = tokio::spawn(async move {
            while let Some(message) = incoming.next().await {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                if let Err(e) = dispatcher.handle_incoming(message).await {
                    warn!(from = %from, error = %e, "Incoming message not handled");
                }
            }
        });
        if let Some(old) = self.receivers.lock().insert(neighbor.to_string(), task) {
            old.abort();
        }
        true
    }

    /// Messages delivered to this node
    pub fn local_messages(&self) -> impl Stream<Item = NetworkMessage> + Send + Unpin + 'static {
        BroadcastStream::new(self.local_tx.subscribe()).filter_map(|item| item.ok())
    }

    /// Connected pipe towards `destination`: the neighbour itself, or the
    /// routing table's next hop.
    fn route(&self, destination: &str) -> Option<(String, Pipe)> {
        let pipes = self.pipes.read();
        if let Some(pipe) = pipes.get(destination).filter(|p| p.is_connected()) {
            return Some((destination.to_string(), pipe.clone()));
        }
        let next_hop = self.routing.get_next_hop(destination)?;
        pipes
            .get(&next_hop)
            .filter(|p| p.is_connected())
            .map(|p| (next_hop, p.clone()))
    }

    /// Deliver locally, send towards the destination, or park in the store.
    ///
    /// Only encoding problems are errors; anything transient ends up
    /// stored for [`flush_pending`](Self::flush_pending).
    pub async fn dispatch(&self, message: NetworkMessage) -> Result<DispatchOutcome, PipeError> {
        if message.destination == self.local_id {
            self.deliver_local(message);
            return Ok(DispatchOutcome::Local);
        }

        let Some((next_hop, pipe)) = self.route(&message.destination) else {
            debug!(message_id = %message.id, destination = %message.destination, "No route, storing");
            self.store.add(message);
            return Ok(DispatchOutcome::Stored);
        };

        match pipe.send_message(&message).await {
            Ok(report) => {
                debug!(
                    message_id = %message.id,
                    next_hop = %next_hop,
                    attempts = report.attempts,
                    "Message sent"
                );
                Ok(DispatchOutcome::Sent {
                    next_hop,
                    attempts: report.attempts,
                })
            }
            Err(e @ PipeError::Encoding(_)) => Err(e),
            Err(e) => {
                warn!(message_id = %message.id, next_hop = %next_hop, error = %e, "Send failed, storing");
                self.store.add(message);
                Ok(DispatchOutcome::Stored)
            }
        }
    }

    /// Retry every stored message that is due. Returns how many left.
    pub async fn flush_pending(&self) -> usize {
        let mut delivered = 0;
        for stored in self.store.get_pending() {
            let message = stored.message;
            let Some((next_hop, pipe)) = self.route(&message.destination) else {
                continue;
            };
            match pipe.send_message(&message).await {
                Ok(_) => {
                    self.store.mark_delivered(&message.id);
                    debug!(message_id = %message.id, next_hop = %next_hop, "Stored message delivered");
                    delivered += 1;
                }
                Err(e) => {
                    debug!(message_id = %message.id, error = %e, attempts = stored.attempts, "Stored message still undeliverable");
                }
            }
        }
        if delivered > 0 {
            info!(delivered, "Flushed stored messages");
        }
        delivered
    }

    /// A message that arrived on one of our pipes
    pub async fn handle_incoming(
        &self,
        message: NetworkMessage,
    ) -> Result<DispatchOutcome, PipeError> {
        if message.kind == MessageKind::RouteAdvertisement {
            let entries: Vec<RoutingEntry> = bincode::deserialize(&message.payload)
                .map_err(|e| PipeError::Encoding(e.to_string()))?;
            let changed = self.routing.update_routes(entries);
            debug!(from = %message.source, changed, "Route advertisement applied");
            return Ok(DispatchOutcome::RoutesUpdated(changed));
        }

        if message.destination == self.local_id {
            self.deliver_local(message);
            return Ok(DispatchOutcome::Local);
        }

        match message.forwarded() {
            Some(next) => self.dispatch(next).await,
            None => {
                warn!(message_id = %message.id, destination = %message.destination, "TTL expired, dropping");
                Ok(DispatchOutcome::Dropped)
            }
        }
    }

    /// Send our routing table to every connected neighbour. Returns how
    /// many neighbours it reached.
    pub async fn advertise_routes(&self) -> Result<usize, PipeError> {
        let connected: Vec<(String, Pipe)> = self
            .pipes
            .read()
            .iter()
            .filter(|(_, p)| p.is_connected())
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();

        for (neighbor, _) in &connected {
            self.routing
                .add_route(RoutingEntry::new(neighbor.clone(), neighbor.clone(), 1));
        }
        let payload = bincode::serialize(&self.routing.advertisement())
            .map_err(|e| PipeError::Encoding(e.to_string()))?;

        let mut reached = 0;
        for (neighbor, pipe) in connected {
            let ad = NetworkMessage::route_advertisement(&self.local_id, &neighbor, payload.clone());
            match pipe.send_message(&ad).await {
                Ok(_) => reached += 1,
                Err(e) => warn!(neighbor = %neighbor, error = %e, "Route advertisement failed"),
            }
        }
        Ok(reached)
    }

    fn deliver_local(&self, message: NetworkMessage) {
        debug!(message_id = %message.id, source = %message.source, "Delivered locally");
        let _ = self.local_tx.send(message);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for (_, task) in self.receivers.get_mut().drain() {
            task.abort();
        }
    }
}
