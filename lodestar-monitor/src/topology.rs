//! The live topology: the current snapshot plus change notification.

use std::sync::Arc;

use lodestar_core::{
    SelectionConfig, SelectionConfigBuilder, SelectionCriteria, ServerAddress, ServerDescription,
    SharedTopologyCell, TopologyCell, TopologyDescription,
};
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{MonitorError, Result};

/// The current topology snapshot together with the selection settings.
///
/// Monitors publish new snapshots here; selectors read one snapshot per attempt
/// and, if nothing is suitable, wait for the next publication.
#[derive(Debug)]
pub struct Topology {
    cell: SharedTopologyCell,
    config: SelectionConfig,
    changed: Notify,
}

/// A shared reference to the live topology.
pub type SharedTopology = Arc<Topology>;

impl Topology {
    /// Create a live topology from an initial snapshot.
    pub fn new(initial: TopologyDescription, config: SelectionConfig) -> Self {
        Self {
            cell: Arc::new(TopologyCell::new(initial)),
            config,
            changed: Notify::new(),
        }
    }

    /// Create a live topology, building its settings from `builder`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] if the builder rejects the settings.
    pub fn from_builder(
        initial: TopologyDescription,
        builder: SelectionConfigBuilder,
    ) -> Result<Self> {
        let config = builder
            .build()
            .map_err(|err| MonitorError::config(err.to_string()))?;
        Ok(Self::new(initial, config))
    }

    /// The selection settings.
    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// The current snapshot.
    pub fn description(&self) -> Arc<TopologyDescription> {
        self.cell.load()
    }

    /// Replace the snapshot and wake waiting selectors.
    pub fn publish(&self, description: TopologyDescription) {
        self.cell.publish(description);
        self.changed.notify_waiters();
    }

    /// Replace one server's description.
    ///
    /// Servers no longer in the topology are not re-added. Returns whether the
    /// description was applied.
    pub fn apply_server_description(&self, server: ServerDescription) -> bool {
        let mut applied = false;
        self.cell.update(|current| {
            applied = current.server(server.address()).is_some();
            if applied {
                current.with_server(server.clone())
            } else {
                current.clone()
            }
        });
        if applied {
            self.changed.notify_waiters();
        }
        applied
    }

    /// Add a server as `Unknown` if it is not already present.
    pub fn add_server(&self, address: ServerAddress) -> bool {
        let mut added = false;
        self.cell.update(|current| {
            added = current.server(&address).is_none();
            if added {
                current.with_server(ServerDescription::unknown(address.clone()))
            } else {
                current.clone()
            }
        });
        if added {
            self.changed.notify_waiters();
        }
        added
    }

    /// Remove a server. Returns whether it was present.
    pub fn remove_server(&self, address: &ServerAddress) -> bool {
        let mut removed = false;
        self.cell.update(|current| {
            removed = current.server(address).is_some();
            current.without_server(address)
        });
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Wait until at least one server is suitable and return all of them.
    ///
    /// `None` selects for a write. Each attempt reads a single snapshot. When
    /// nothing is suitable the call waits for the next published snapshot, up
    /// to the configured server selection timeout.
    ///
    /// # Errors
    ///
    /// Fails immediately if the criteria can never be satisfied, and with
    /// [`MonitorError::ServerSelectionTimeout`] once the timeout elapses.
    pub async fn suitable_servers(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<Vec<ServerDescription>> {
        let timeout = self.config.server_selection_timeout();
        let deadline = Instant::now() + timeout;
        let wanted = criteria.map_or_else(|| "write".to_string(), ToString::to_string);

        loop {
            // register before reading so a publish in between is not missed
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let snapshot = self.description();
            let servers = snapshot.find_suitable_servers_with(criteria, &self.config)?;
            if !servers.is_empty() {
                return Ok(servers.into_iter().cloned().collect());
            }

            debug!(
                topology_type = %snapshot.topology_type(),
                servers = snapshot.len(),
                criteria = %wanted,
                "no suitable server, waiting for topology change"
            );

            if time::timeout_at(deadline, changed).await.is_err() {
                return Err(MonitorError::ServerSelectionTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    message: format!(
                        "no server suitable for {wanted} in {} topology of {} server(s)",
                        snapshot.topology_type(),
                        snapshot.len()
                    ),
                });
            }
        }
    }

    /// Wait for suitable servers and pick one uniformly at random.
    pub async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<ServerDescription> {
        self.select_server_by(criteria, |mut servers| {
            let index = rand::rng().random_range(0..servers.len());
            servers.swap_remove(index)
        })
        .await
    }

    /// Wait for suitable servers and let `pick` choose among them.
    ///
    /// `pick` always receives at least one candidate.
    pub async fn select_server_by<F>(
        &self,
        criteria: Option<&SelectionCriteria>,
        pick: F,
    ) -> Result<ServerDescription>
    where
        F: FnOnce(Vec<ServerDescription>) -> ServerDescription,
    {
        let servers = self.suitable_servers(criteria).await?;
        Ok(pick(servers))
    }

    /// Select a server for a read using the configured default read preference.
    ///
    /// Reads go to the primary when no default is configured.
    pub async fn select_read_server(&self) -> Result<ServerDescription> {
        let criteria = SelectionCriteria::ReadPreference(
            self.config.read_preference().cloned().unwrap_or_default(),
        );
        self.select_server(Some(&criteria)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_core::{ServerType, TopologyType};

    fn server(host: &str, server_type: ServerType) -> ServerDescription {
        ServerDescription::new(ServerAddress::new(host, 27017), server_type)
            .with_average_round_trip_time(1.0)
    }

    #[test]
    fn test_apply_ignores_removed_servers() {
        let topology = Topology::new(
            TopologyDescription::new(TopologyType::Sharded, vec![server("a", ServerType::Mongos)]),
            SelectionConfig::default(),
        );

        assert!(topology.remove_server(&ServerAddress::new("a", 27017)));
        assert!(!topology.apply_server_description(server("a", ServerType::Mongos)));
        assert!(topology.description().is_empty());
    }

    #[test]
    fn test_add_server_starts_unknown() {
        let topology = Topology::new(
            TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, vec![]),
            SelectionConfig::default(),
        );
        let address = ServerAddress::new("b", 27017);

        assert!(topology.add_server(address.clone()));
        assert!(!topology.add_server(address.clone()));

        let description = topology.description();
        assert_eq!(
            description.server(&address).map(ServerDescription::server_type),
            Some(ServerType::Unknown)
        );
    }

    #[tokio::test]
    async fn test_select_server_picks_a_candidate() {
        let topology = Topology::new(
            TopologyDescription::new(
                TopologyType::Sharded,
                vec![server("a", ServerType::Mongos), server("b", ServerType::Mongos)],
            ),
            SelectionConfig::default(),
        );

        for _ in 0..20 {
            let picked = topology.select_server(None).await.unwrap();
            assert!(["a", "b"].contains(&picked.address().host()));
        }
    }
}
