//! Topology description: the whole deployment as seen at one instant.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::SelectionConfig;
use crate::domain::read_preference::ReadPreference;
use crate::domain::server::{ServerAddress, ServerDescription, ServerType};
use crate::error::Result;
use crate::selection::criteria::SelectionCriteria;
use crate::selection::selector::{self, DEFAULT_LOCAL_THRESHOLD_MS};

/// The shape of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyType {
    /// Nothing is known yet.
    #[default]
    Unknown,
    /// A direct connection to exactly one server.
    Single,
    /// A replica set with a known primary.
    ReplicaSetWithPrimary,
    /// A replica set without a known primary.
    ReplicaSetNoPrimary,
    /// A sharded cluster reached through mongos routers.
    Sharded,
    /// A deployment behind a load balancer.
    LoadBalanced,
}

impl TopologyType {
    /// The name used for this type in the SDAM documentation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Single => "Single",
            Self::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            Self::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            Self::Sharded => "Sharded",
            Self::LoadBalanced => "LoadBalanced",
        }
    }

    /// Whether this is one of the replica set types.
    pub fn is_replica_set(self) -> bool {
        matches!(self, Self::ReplicaSetWithPrimary | Self::ReplicaSetNoPrimary)
    }
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable snapshot of the deployment.
///
/// Snapshots are never mutated once built. [`Self::with_server`] returns a new
/// snapshot, which the monitor publishes through a
/// [`TopologyCell`](crate::TopologyCell).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologyDescription {
    topology_type: TopologyType,
    set_name: Option<String>,
    servers: BTreeMap<ServerAddress, ServerDescription>,
}

impl TopologyDescription {
    /// Create a snapshot from a type and its servers.
    ///
    /// Servers sharing an address collapse to the last one given.
    pub fn new(
        topology_type: TopologyType,
        servers: impl IntoIterator<Item = ServerDescription>,
    ) -> Self {
        Self {
            topology_type,
            set_name: None,
            servers: servers
                .into_iter()
                .map(|server| (server.address().clone(), server))
                .collect(),
        }
    }

    /// An empty snapshot of unknown type.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Return a copy with the replica set name set.
    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    /// Return a new snapshot with `server` added or replacing the server at its address.
    ///
    /// For replica sets the type is re-derived from whether any member is now
    /// primary.
    pub fn with_server(&self, server: ServerDescription) -> Self {
        let mut servers = self.servers.clone();
        servers.insert(server.address().clone(), server);
        Self {
            topology_type: derive_replica_set_type(self.topology_type, &servers),
            set_name: self.set_name.clone(),
            servers,
        }
    }

    /// Return a new snapshot without the server at `address`.
    pub fn without_server(&self, address: &ServerAddress) -> Self {
        let mut servers = self.servers.clone();
        servers.remove(address);
        Self {
            topology_type: derive_replica_set_type(self.topology_type, &servers),
            set_name: self.set_name.clone(),
            servers,
        }
    }

    /// The deployment type.
    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    /// The replica set name, if known.
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// All servers, ordered by address.
    pub fn servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values()
    }

    /// The server at `address`.
    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the snapshot has no servers.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The primary, if one is known.
    ///
    /// Should a snapshot momentarily hold two primaries this returns the first
    /// by address; selection itself treats both as primaries.
    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers()
            .find(|server| server.server_type() == ServerType::RsPrimary)
    }

    /// Servers eligible for an operation, using the default 15ms latency window.
    ///
    /// `None` routes a write. Otherwise servers are filtered by role, staleness
    /// and tags, then narrowed to those within the latency window of the
    /// fastest. An empty result is not an error; an error means the read
    /// preference can never be satisfied as given.
    ///
    /// A `Single` topology serves reads in every mode from any available
    /// server, but a write through a direct connection needs a writable type
    /// (`Standalone`, `RsPrimary`, `Mongos` or `LoadBalancer`). A direct
    /// connection to a secondary returns nothing for `None`.
    pub fn find_suitable_servers(
        &self,
        read_preference: Option<&ReadPreference>,
        heartbeat_frequency_ms: u64,
    ) -> Result<Vec<&ServerDescription>> {
        selector::suitable_servers(
            self,
            read_preference,
            heartbeat_frequency_ms,
            DEFAULT_LOCAL_THRESHOLD_MS,
        )
    }

    /// Servers eligible for an operation under a full selection config.
    ///
    /// Follows the same rules as [`Self::find_suitable_servers`], including
    /// writes through a direct connection needing a writable server.
    pub fn find_suitable_servers_with(
        &self,
        criteria: Option<&SelectionCriteria>,
        config: &SelectionConfig,
    ) -> Result<Vec<&ServerDescription>> {
        let heartbeat_frequency_ms = duration_ms(config.heartbeat_frequency());
        let local_threshold_ms = duration_ms(config.local_threshold());

        match criteria {
            Some(SelectionCriteria::Predicate(predicate)) => Ok(selector::predicate_servers(
                self,
                predicate.as_ref(),
                local_threshold_ms,
            )),
            _ => selector::suitable_servers(
                self,
                criteria.and_then(SelectionCriteria::as_read_preference),
                heartbeat_frequency_ms,
                local_threshold_ms,
            ),
        }
    }

    /// Whether any server could serve a read with `read_preference` right now.
    ///
    /// A read preference that can never be satisfied counts as no.
    pub fn has_readable_server(&self, read_preference: Option<&ReadPreference>) -> bool {
        let read_preference = read_preference.cloned().unwrap_or_default();
        self.find_suitable_servers_with(
            Some(&SelectionCriteria::ReadPreference(read_preference)),
            &SelectionConfig::default(),
        )
        .is_ok_and(|servers| !servers.is_empty())
    }

    /// Whether any server could accept a write right now.
    pub fn has_writable_server(&self) -> bool {
        self.find_suitable_servers_with(None, &SelectionConfig::default())
            .is_ok_and(|servers| !servers.is_empty())
    }
}

fn derive_replica_set_type(
    current: TopologyType,
    servers: &BTreeMap<ServerAddress, ServerDescription>,
) -> TopologyType {
    if !current.is_replica_set() {
        return current;
    }
    if servers
        .values()
        .any(|server| server.server_type() == ServerType::RsPrimary)
    {
        TopologyType::ReplicaSetWithPrimary
    } else {
        TopologyType::ReplicaSetNoPrimary
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
