// Message store — bounded cache of undelivered messages
//
// Capacity: when full, the oldest entry (insertion order) is evicted before
// the new one goes in. A message is handed out by `get_pending` at most once
// per `delivery_attempt_interval_ms`, and every hand-out counts as an
// attempt.

use crate::message::NetworkMessage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStoreConfig {
    pub max_messages: usize,
    pub max_delivery_attempts: u32,
    pub delivery_attempt_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_age_ms: u64,
}

impl Default for MessageStoreConfig {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_delivery_attempts: 5,
            delivery_attempt_interval_ms: 30_000,
            cleanup_interval_ms: 60_000,
            max_age_ms: 3_600_000,
        }
    }
}

/// A cached message and its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: NetworkMessage,
    /// When it entered the store (unix ms)
    pub added: u64,
    pub attempts: u32,
    /// Last time `get_pending` handed it out (unix ms)
    pub last_attempt: Option<u64>,
    pub delivered: bool,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, StoredMessage>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

impl Entries {
    fn remove(&mut self, id: &str) -> Option<StoredMessage> {
        let removed = self.by_id.remove(id)?;
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
        Some(removed)
    }
}

/// Shared store; wrap in `Arc` to use the background cleanup.
pub struct MessageStore {
    config: MessageStoreConfig,
    entries: Mutex<Entries>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageStore {
    pub fn new(config: MessageStoreConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries::default()),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MessageStoreConfig {
        &self.config
    }

    pub fn add(&self, message: NetworkMessage) {
        self.add_at(message, crate::now_ms());
    }

    /// Insert (or replace) `message`, evicting the oldest entry when full.
    pub fn add_at(&self, message: NetworkMessage, now_ms: u64) {
        let mut entries = self.entries.lock();
        let id = message.id.clone();

        if entries.remove(&id).is_none() && entries.by_id.len() >= self.config.max_messages {
            if let Some(oldest) = entries.order.front().cloned() {
                entries.remove(&oldest);
                debug!(evicted = %oldest, "Message store full, evicted oldest");
            }
        }
        if self.config.max_messages == 0 {
            return;
        }

        entries.order.push_back(id.clone());
        entries.by_id.insert(
            id,
            StoredMessage {
                message,
                added: now_ms,
                attempts: 0,
                last_attempt: None,
                delivered: false,
            },
        );
    }

    pub fn remove(&self, id: &str) -> Option<StoredMessage> {
        self.entries.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<StoredMessage> {
        self.entries.lock().by_id.get(id).cloned()
    }

    pub fn get_pending(&self) -> Vec<StoredMessage> {
        self.get_pending_at(crate::now_ms())
    }

    /// Messages due for another attempt, oldest first. Each returned
    /// message has its attempt recorded before the lock is released.
    pub fn get_pending_at(&self, now_ms: u64) -> Vec<StoredMessage> {
        let mut guard = self.entries.lock();
        let Entries { by_id, order } = &mut *guard;
        let mut due = Vec::new();

        for id in order.iter() {
            let Some(entry) = by_id.get_mut(id) else {
                continue;
            };
            if entry.delivered || entry.attempts >= self.config.max_delivery_attempts {
                continue;
            }
            let waited_enough = match entry.last_attempt {
                None => true,
                Some(last) => {
                    now_ms.saturating_sub(last) >= self.config.delivery_attempt_interval_ms
                }
            };
            if waited_enough {
                entry.attempts += 1;
                entry.last_attempt = Some(now_ms);
                due.push(entry.clone());
            }
        }
        due
    }

    /// Undelivered messages addressed to `destination`, oldest first.
    /// Does not count as an attempt.
    pub fn pending_for(&self, destination: &str) -> Vec<NetworkMessage> {
        let entries = self.entries.lock();
        entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id))
            .filter(|e| !e.delivered && e.message.destination == destination)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn mark_delivered(&self, id: &str) -> bool {
        match self.entries.lock().by_id.get_mut(id) {
            Some(entry) => {
                entry.delivered = true;
                true
            }
            None => false,
        }
    }

    pub fn cleanup(&self, max_age_ms: u64) -> usize {
        self.cleanup_at(max_age_ms, crate::now_ms())
    }

    /// Drop entries older than `max_age_ms`, delivered entries older than
    /// half of it, and entries out of attempts. Returns how many went.
    pub fn cleanup_at(&self, max_age_ms: u64, now_ms: u64) -> usize {
        let mut entries = self.entries.lock();
        let max_attempts = self.config.max_delivery_attempts;

        let expired: Vec<String> = entries
            .by_id
            .values()
            .filter(|e| {
                let age = now_ms.saturating_sub(e.added);
                age > max_age_ms
                    || (e.delivered && age > max_age_ms / 2)
                    || e.attempts >= max_attempts
            })
            .map(|e| e.message.id.clone())
            .collect();

        for id in &expired {
            entries.remove(id);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = entries.by_id.len(), "Message store cleanup");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `cleanup(max_age_ms)` every `cleanup_interval_ms` until stopped
    /// or the store is dropped. Restarting replaces the previous timer.
    pub fn start_cleanup(self: &Arc<Self>) {
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        let store: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.cleanup(store.config.max_age_ms);
            }
        });

        if let Some(old) = self.cleanup_task.lock().replace(handle) {
            old.abort();
        }
        debug!(interval_ms = period.as_millis() as u64, "Message store cleanup started");
    }

    pub fn stop_cleanup(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
            debug!("Message store cleanup stopped");
        }
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(MessageStoreConfig::default())
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
    }
}
