//! Background heartbeat monitor.
//!
//! One Tokio task per server probes on the configured heartbeat interval, folds
//! the measured round trip into the server's average and publishes the
//! resulting description. A failed probe resets the server to `Unknown`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lodestar_core::ServerAddress;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::monitor::heartbeat::Heartbeat;
use crate::topology::SharedTopology;

/// Runs one heartbeat task per server in a topology.
///
/// Dropping the monitor stops every task.
#[derive(Debug)]
pub struct Monitor<H: Heartbeat> {
    topology: SharedTopology,
    heartbeat: Arc<H>,
    tasks: DashMap<ServerAddress, JoinHandle<()>>,
}

impl<H: Heartbeat> Monitor<H> {
    /// Create a monitor. No tasks run until [`Self::start`].
    pub fn new(topology: SharedTopology, heartbeat: Arc<H>) -> Self {
        Self {
            topology,
            heartbeat,
            tasks: DashMap::new(),
        }
    }

    /// Start monitoring every server in the current snapshot.
    ///
    /// Servers already monitored are left alone. Returns how many tasks were
    /// started.
    pub fn start(&self) -> usize {
        let snapshot = self.topology.description();
        let addresses: Vec<_> = snapshot
            .servers()
            .map(|server| server.address().clone())
            .collect();

        let started = addresses
            .into_iter()
            .filter(|address| self.ensure_task(address.clone()))
            .count();
        info!(
            started,
            monitored = self.tasks.len(),
            "heartbeat monitor started"
        );
        started
    }

    /// Add a server to the topology and begin monitoring it.
    pub fn add_server(&self, address: ServerAddress) {
        self.topology.add_server(address.clone());
        self.ensure_task(address);
    }

    /// Stop monitoring a server and remove it from the topology.
    pub fn remove_server(&self, address: &ServerAddress) {
        if let Some((_, task)) = self.tasks.remove(address) {
            task.abort();
        }
        self.topology.remove_server(address);
        debug!(%address, "server removed from monitoring");
    }

    /// Whether a heartbeat task is running for `address`.
    pub fn is_monitoring(&self, address: &ServerAddress) -> bool {
        self.tasks
            .get(address)
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop every heartbeat task.
    pub fn shutdown(&self) {
        self.tasks.retain(|_, task| {
            task.abort();
            false
        });
    }

    fn ensure_task(&self, address: ServerAddress) -> bool {
        match self.tasks.entry(address.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_finished() {
                    return false;
                }
                entry.insert(self.spawn(address));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn(address));
                true
            }
        }
    }

    fn spawn(&self, address: ServerAddress) -> JoinHandle<()> {
        tokio::spawn(monitor_server(
            Arc::clone(&self.topology),
            Arc::clone(&self.heartbeat),
            address,
        ))
    }
}

impl<H: Heartbeat> Drop for Monitor<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Probe one server until it leaves the topology.
async fn monitor_server<H: Heartbeat>(
    topology: SharedTopology,
    heartbeat: Arc<H>,
    address: ServerAddress,
) {
    let mut ticker = time::interval(topology.config().heartbeat_frequency());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let started = Instant::now();
        let outcome = heartbeat.check(&address).await;
        let sample_ms = started.elapsed().as_secs_f64() * 1000.0;

        let snapshot = topology.description();
        let Some(previous) = snapshot.server(&address) else {
            debug!(%address, "server left the topology, stopping heartbeats");
            return;
        };

        let next = match outcome {
            Ok(reply) => reply.into_description(
                address.clone(),
                sample_ms,
                previous.average_round_trip_time(),
                Utc::now(),
            ),
            Err(err) => {
                warn!(%address, error = %err, "heartbeat failed");
                previous.reset_to_unknown(err.to_string())
            }
        };

        if next.server_type() != previous.server_type() {
            info!(
                %address,
                from = %previous.server_type(),
                to = %next.server_type(),
                "server type changed"
            );
        }
        debug!(
            %address,
            sample_ms,
            average_ms = ?next.average_round_trip_time(),
            "heartbeat complete"
        );

        if !topology.apply_server_description(next) {
            debug!(%address, "server left the topology, stopping heartbeats");
            return;
        }
    }
}
