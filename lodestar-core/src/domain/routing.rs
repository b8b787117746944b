//! Routing module for publishing topology snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::domain::topology::TopologyDescription;

/// A lock-free cell holding the current topology snapshot.
///
/// Uses `ArcSwap` so the monitor can publish a whole new snapshot atomically
/// while selectors keep reading without locks. A reader holds one `Arc` for the
/// duration of a selection and never sees a half-applied update.
#[derive(Debug)]
pub struct TopologyCell {
    topology: ArcSwap<TopologyDescription>,
}

impl TopologyCell {
    /// Create a cell holding the initial snapshot.
    pub fn new(initial: TopologyDescription) -> Self {
        Self {
            topology: ArcSwap::from_pointee(initial),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<TopologyDescription> {
        self.topology.load_full()
    }

    /// Atomically replace the snapshot.
    pub fn publish(&self, topology: TopologyDescription) {
        self.topology.store(Arc::new(topology));
    }

    /// Derive and publish a new snapshot from the current one.
    ///
    /// `f` may run more than once if another writer publishes concurrently, so any
    /// state it records must be overwritten on each run. Returns the snapshot
    /// that was published.
    pub fn update<F>(&self, mut f: F) -> Arc<TopologyDescription>
    where
        F: FnMut(&TopologyDescription) -> TopologyDescription,
    {
        let mut published = None;
        self.topology.rcu(|current| {
            let next = Arc::new(f(current));
            published = Some(Arc::clone(&next));
            next
        });
        // rcu always runs the closure at least once
        published.unwrap_or_else(|| self.load())
    }
}

impl Default for TopologyCell {
    fn default() -> Self {
        Self::new(TopologyDescription::unknown())
    }
}

/// A shared reference to the lock-free topology cell.
pub type SharedTopologyCell = Arc<TopologyCell>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerAddress, ServerDescription, ServerType};
    use crate::domain::topology::TopologyType;

    #[test]
    fn test_publish_replaces_snapshot() {
        let cell = TopologyCell::default();
        let before = cell.load();

        cell.publish(TopologyDescription::new(TopologyType::Sharded, vec![]));

        assert_eq!(before.topology_type(), TopologyType::Unknown);
        assert_eq!(cell.load().topology_type(), TopologyType::Sharded);
    }

    #[test]
    fn test_update_returns_published_snapshot() {
        let cell = TopologyCell::new(TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, vec![]));
        let primary = ServerDescription::new(ServerAddress::new("a", 1), ServerType::RsPrimary);

        let published = cell.update(|current| current.with_server(primary.clone()));

        assert_eq!(published.topology_type(), TopologyType::ReplicaSetWithPrimary);
        assert!(Arc::ptr_eq(&published, &cell.load()));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let cell: SharedTopologyCell = Arc::new(TopologyCell::new(TopologyDescription::new(
            TopologyType::Sharded,
            vec![],
        )));

        let mut handles = Vec::new();
        for port in 0..32u16 {
            let cell = Arc::clone(&cell);
            handles.push(tokio::spawn(async move {
                let mongos = ServerDescription::new(ServerAddress::new("m", port), ServerType::Mongos);
                cell.update(|current| current.with_server(mongos.clone()));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cell.load().len(), 32);
    }
}
