//! Routing table with distance-vector relaxation

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Hop count that means "unreachable"
pub const INFINITE_DISTANCE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub destination: String,
    /// Neighbour to forward to. In an advertisement: the advertiser.
    pub next_hop: String,
    /// Hops to the destination, capped at [`INFINITE_DISTANCE`]
    pub distance: u32,
    /// Unix ms of the last change or refresh
    pub last_updated: u64,
}

impl RoutingEntry {
    pub fn new(destination: impl Into<String>, next_hop: impl Into<String>, distance: u32) -> Self {
        Self {
            destination: destination.into(),
            next_hop: next_hop.into(),
            distance: distance.min(INFINITE_DISTANCE),
            last_updated: crate::now_ms(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.distance < INFINITE_DISTANCE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// This node's id; advertisements about it are ignored
    pub local_id: String,
    pub max_age_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl RoutingConfig {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            max_age_ms: 180_000,
            cleanup_interval_ms: 30_000,
        }
    }
}

pub struct RoutingTable {
    config: RoutingConfig,
    routes: RwLock<BTreeMap<String, RoutingEntry>>,
    aging_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoutingTable {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            routes: RwLock::new(BTreeMap::new()),
            aging_task: Mutex::new(None),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.config.local_id
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Insert or replace the entry for `entry.destination`
    pub fn add_route(&self, mut entry: RoutingEntry) {
        entry.distance = entry.distance.min(INFINITE_DISTANCE);
        debug!(
            destination = %entry.destination,
            next_hop = %entry.next_hop,
            distance = entry.distance,
            "Route added"
        );
        self.routes.write().insert(entry.destination.clone(), entry);
    }

    pub fn remove_route(&self, destination: &str) -> Option<RoutingEntry> {
        self.routes.write().remove(destination)
    }

    /// Neighbour to forward to, `None` when unknown or unreachable
    pub fn get_next_hop(&self, destination: &str) -> Option<String> {
        self.routes
            .read()
            .get(destination)
            .filter(|e| e.is_reachable())
            .map(|e| e.next_hop.clone())
    }

    pub fn get_route(&self, destination: &str) -> Option<RoutingEntry> {
        self.routes.read().get(destination).cloned()
    }

    /// All entries, ordered by destination
    pub fn get_routes(&self) -> Vec<RoutingEntry> {
        self.routes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update_routes(&self, advertised: Vec<RoutingEntry>) -> usize {
        self.update_routes_at(advertised, crate::now_ms())
    }

    /// Relax the table against a neighbour's advertisement.
    ///
    /// Each advertised entry names the advertiser in `next_hop`. A route is
    /// taken when the destination is new or the path through the advertiser
    /// is strictly shorter. A new destination advertised as unreachable is
    /// kept at [`INFINITE_DISTANCE`] until it ages out. An entry from the neighbour we already route
    /// through always wins, so it can also lengthen or poison the route.
    /// Returns how many entries changed.
    pub fn update_routes_at(&self, advertised: Vec<RoutingEntry>, now_ms: u64) -> usize {
        let mut routes = self.routes.write();
        let mut changed = 0;

        for adv in advertised {
            if adv.destination == self.config.local_id || adv.next_hop == self.config.local_id {
                continue;
            }
            let distance = adv.distance.saturating_add(1).min(INFINITE_DISTANCE);

            let replace = match routes.get(&adv.destination) {
                None => true,
                Some(current) if current.next_hop == adv.next_hop => true,
                Some(current) => distance < current.distance,
            };
            if !replace {
                continue;
            }

            let previous = routes.insert(
                adv.destination.clone(),
                RoutingEntry {
                    destination: adv.destination.clone(),
                    next_hop: adv.next_hop.clone(),
                    distance,
                    last_updated: now_ms,
                },
            );
            let moved = previous
                .as_ref()
                .map(|p| p.next_hop != adv.next_hop || p.distance != distance)
                .unwrap_or(true);
            if moved {
                debug!(
                    destination = %adv.destination,
                    next_hop = %adv.next_hop,
                    distance,
                    "Route updated"
                );
                changed += 1;
            }
        }
        changed
    }

    /// Mark every route through `neighbor` unreachable. Returns the count.
    pub fn remove_neighbor(&self, neighbor: &str) -> usize {
        let now = crate::now_ms();
        let mut routes = self.routes.write();
        let mut poisoned = 0;
        for entry in routes.values_mut() {
            if entry.next_hop == neighbor && entry.is_reachable() {
                entry.distance = INFINITE_DISTANCE;
                entry.last_updated = now;
                poisoned += 1;
            }
        }
        if poisoned > 0 {
            info!(neighbor, poisoned, "Neighbour lost, routes poisoned");
        }
        poisoned
    }

    /// This node's table as seen by a neighbour: every entry with
    /// `next_hop` set to the local id. Unreachable entries are included so
    /// the poison spreads.
    pub fn advertisement(&self) -> Vec<RoutingEntry> {
        let now = crate::now_ms();
        self.routes
            .read()
            .values()
            .map(|e| RoutingEntry {
                destination: e.destination.clone(),
                next_hop: self.config.local_id.clone(),
                distance: e.distance,
                last_updated: now,
            })
            .collect()
    }

    pub fn cleanup(&self, max_age_ms: u64) -> usize {
        self.cleanup_at(max_age_ms, crate::now_ms())
    }

    /// Drop entries not refreshed within `max_age_ms`
    pub fn cleanup_at(&self, max_age_ms: u64, now_ms: u64) -> usize {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|_, e| now_ms.saturating_sub(e.last_updated) <= max_age_ms);
        let removed = before - routes.len();
        if removed > 0 {
            info!(removed, remaining = routes.len(), "Stale routes pruned");
        }
        removed
    }

    /// Prune with `max_age_ms` every `cleanup_interval_ms`
    pub fn start_aging(self: &Arc<Self>) {
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        let table: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(table) = table.upgrade() else {
                    break;
                };
                table.cleanup(table.config.max_age_ms);
            }
        });

        if let Some(old) = self.aging_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop_aging(&self) {
        if let Some(task) = self.aging_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RoutingTable {
    fn drop(&mut self) {
        if let Some(task) = self.aging_task.get_mut().take() {
            task.abort();
        }
    }
}
