//! Server description models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::domain::read_preference::TagSet;
use crate::error::SelectionError;
use crate::selection::rtt::update_average_round_trip_time;

/// Port assumed when an address omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// The lowest `maxWireVersion` (server 3.4) that reports `lastWriteDate`.
pub const MAX_STALENESS_MIN_WIRE_VERSION: i32 = 5;

/// The host/port identity of a server.
///
/// Hosts are normalized to lowercase so the same server reached through
/// differently-cased seed lists maps to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Create an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// The hostname or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SelectionError::invalid_argument(format!("invalid server address '{s}'"));

        // [ipv6] or [ipv6]:port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => DEFAULT_PORT,
                _ => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(invalid)?,
            };
            if host.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::new(host, port));
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
            None => (s, DEFAULT_PORT),
        };
        if host.is_empty() || host.contains(':') {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

/// The role a server reported in its most recent heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerType {
    /// Not yet contacted, or the last heartbeat failed.
    #[default]
    Unknown,
    /// A server that is not part of a replica set.
    Standalone,
    /// A sharded-cluster router.
    Mongos,
    /// A replica set member another member claims is primary, not yet confirmed.
    PossiblePrimary,
    /// The replica set primary.
    RsPrimary,
    /// A replica set secondary.
    RsSecondary,
    /// A replica set arbiter; holds no data.
    RsArbiter,
    /// A hidden, starting-up or recovering replica set member.
    RsOther,
    /// A replica set member that has not been configured yet.
    RsGhost,
    /// The frontend of a load-balanced deployment.
    LoadBalancer,
}

impl ServerType {
    /// The name used for this type in the SDAM documentation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Standalone => "Standalone",
            Self::Mongos => "Mongos",
            Self::PossiblePrimary => "PossiblePrimary",
            Self::RsPrimary => "RSPrimary",
            Self::RsSecondary => "RSSecondary",
            Self::RsArbiter => "RSArbiter",
            Self::RsOther => "RSOther",
            Self::RsGhost => "RSGhost",
            Self::LoadBalancer => "LoadBalancer",
        }
    }

    /// Whether the server answered its last heartbeat.
    pub fn is_available(self) -> bool {
        self != Self::Unknown
    }

    /// Whether operations on this server can read data.
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::Mongos | Self::RsPrimary | Self::RsSecondary | Self::LoadBalancer
        )
    }

    /// Whether this server accepts writes.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::Mongos | Self::RsPrimary | Self::LoadBalancer
        )
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A replication operation time: timestamp plus election term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpTime {
    /// Seconds and increment packed the way the server reports its timestamps.
    pub timestamp: u64,
    /// The election term the write happened in.
    pub term: i64,
}

/// Election identifier reported by a primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectionId(pub [u8; 12]);

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// An immutable snapshot of one server's observed state.
///
/// There are no setters. The `with_*` methods consume the value and return a new
/// description, so a description already shared inside a topology snapshot can
/// never change underneath a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
    address: ServerAddress,
    server_type: ServerType,
    average_round_trip_time: Option<f64>,
    last_update_time: DateTime<Utc>,
    last_write_date: Option<DateTime<Utc>>,
    op_time: Option<OpTime>,
    tags: TagSet,
    min_wire_version: i32,
    max_wire_version: i32,
    set_name: Option<String>,
    set_version: Option<i64>,
    election_id: Option<ElectionId>,
    error: Option<String>,
}

impl ServerDescription {
    /// Create a description of the given type with no heartbeat data yet.
    pub fn new(address: ServerAddress, server_type: ServerType) -> Self {
        Self {
            address,
            server_type,
            average_round_trip_time: None,
            last_update_time: Utc::now(),
            last_write_date: None,
            op_time: None,
            tags: TagSet::new(),
            min_wire_version: 0,
            max_wire_version: 0,
            set_name: None,
            set_version: None,
            election_id: None,
            error: None,
        }
    }

    /// Create a description for a server that has not been contacted.
    pub fn unknown(address: ServerAddress) -> Self {
        Self::new(address, ServerType::Unknown)
    }

    /// Return a copy reset to `Unknown` after a failed heartbeat.
    ///
    /// The round-trip average is discarded: the next successful heartbeat starts
    /// a fresh average.
    pub fn reset_to_unknown(&self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::unknown(self.address.clone())
        }
    }

    /// Set the server type.
    pub fn with_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    /// Set the averaged round-trip time in milliseconds.
    pub fn with_average_round_trip_time(mut self, rtt_ms: f64) -> Self {
        self.average_round_trip_time = Some(rtt_ms);
        self
    }

    /// Fold a new round-trip sample into the average.
    pub fn with_round_trip_sample(mut self, sample_ms: f64) -> Self {
        self.average_round_trip_time = Some(update_average_round_trip_time(
            self.average_round_trip_time,
            sample_ms,
        ));
        self
    }

    /// Set when this description was produced.
    pub fn with_last_update_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_update_time = at;
        self
    }

    /// Set the server's most recent write date.
    pub fn with_last_write_date(mut self, at: DateTime<Utc>) -> Self {
        self.last_write_date = Some(at);
        self
    }

    /// Set the server's most recent operation time.
    pub fn with_op_time(mut self, op_time: OpTime) -> Self {
        self.op_time = Some(op_time);
        self
    }

    /// Replace the member tags.
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Add a single member tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the supported wire version range.
    pub fn with_wire_versions(mut self, min: i32, max: i32) -> Self {
        self.min_wire_version = min;
        self.max_wire_version = max;
        self
    }

    /// Set the replica set name.
    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    /// Set the replica set configuration version.
    pub fn with_set_version(mut self, set_version: i64) -> Self {
        self.set_version = Some(set_version);
        self
    }

    /// Set the election id reported by a primary.
    pub fn with_election_id(mut self, election_id: ElectionId) -> Self {
        self.election_id = Some(election_id);
        self
    }

    /// The server's address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The server's role.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Averaged round-trip time in milliseconds, if a heartbeat has succeeded.
    pub fn average_round_trip_time(&self) -> Option<f64> {
        self.average_round_trip_time
    }

    /// When this description was produced.
    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    /// The server's most recent write date.
    pub fn last_write_date(&self) -> Option<DateTime<Utc>> {
        self.last_write_date
    }

    /// The server's most recent operation time.
    pub fn op_time(&self) -> Option<OpTime> {
        self.op_time
    }

    /// Member tags. Empty for servers outside a replica set.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Lowest supported wire version.
    pub fn min_wire_version(&self) -> i32 {
        self.min_wire_version
    }

    /// Highest supported wire version.
    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    /// Replica set name, if the server is a member.
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// Replica set configuration version.
    pub fn set_version(&self) -> Option<i64> {
        self.set_version
    }

    /// Election id reported by a primary.
    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// The error from the heartbeat that made this server `Unknown`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the server answered its last heartbeat.
    pub fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    /// Whether operations on this server can read data.
    pub fn is_data_bearing(&self) -> bool {
        self.server_type.is_data_bearing()
    }

    /// Whether this server accepts writes.
    pub fn is_writable(&self) -> bool {
        self.server_type.is_writable()
    }

    /// Whether the server reports `lastWriteDate`, which staleness estimation needs.
    pub fn supports_max_staleness(&self) -> bool {
        self.max_wire_version >= MAX_STALENESS_MIN_WIRE_VERSION
    }

    /// Whether every pair of `tag_set` appears with the same value in this server's tags.
    ///
    /// An empty tag set matches every server.
    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}
