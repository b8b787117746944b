//! The heartbeat probe seam.
//!
//! The wire protocol behind a heartbeat lives outside this crate. Implementors
//! of [`Heartbeat`] perform one probe and report what the server said; the
//! monitor measures the round trip and builds the next description.

use std::future::Future;

use chrono::{DateTime, Utc};
use lodestar_core::{
    update_average_round_trip_time, ElectionId, OpTime, ServerAddress, ServerDescription,
    ServerType, TagSet,
};

use crate::error::Result;

/// Performs a single heartbeat against a server.
pub trait Heartbeat: Send + Sync + 'static {
    /// Probe `address` once.
    ///
    /// An error marks the server `Unknown` until a later probe succeeds.
    fn check(&self, address: &ServerAddress) -> impl Future<Output = Result<HeartbeatReply>> + Send;
}

/// What a server reported in answer to a heartbeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatReply {
    /// The role the server reported.
    pub server_type: ServerType,
    /// Replica set member tags.
    pub tags: TagSet,
    /// Date of the server's most recent write.
    pub last_write_date: Option<DateTime<Utc>>,
    /// The server's most recent operation time.
    pub op_time: Option<OpTime>,
    /// Lowest supported wire version.
    pub min_wire_version: i32,
    /// Highest supported wire version.
    pub max_wire_version: i32,
    /// Replica set name.
    pub set_name: Option<String>,
    /// Replica set configuration version.
    pub set_version: Option<i64>,
    /// Election id, reported by primaries.
    pub election_id: Option<ElectionId>,
}

impl HeartbeatReply {
    /// A reply carrying only a server type.
    pub fn of_type(server_type: ServerType) -> Self {
        Self {
            server_type,
            ..Self::default()
        }
    }

    /// Build the server's next description from this reply.
    ///
    /// `rtt_sample_ms` is folded into `previous_rtt` by the moving average.
    pub fn into_description(
        self,
        address: ServerAddress,
        rtt_sample_ms: f64,
        previous_rtt: Option<f64>,
        observed_at: DateTime<Utc>,
    ) -> ServerDescription {
        let mut description = ServerDescription::new(address, self.server_type)
            .with_last_update_time(observed_at)
            .with_tags(self.tags)
            .with_wire_versions(self.min_wire_version, self.max_wire_version)
            .with_average_round_trip_time(update_average_round_trip_time(
                previous_rtt,
                rtt_sample_ms,
            ));

        if let Some(at) = self.last_write_date {
            description = description.with_last_write_date(at);
        }
        if let Some(op_time) = self.op_time {
            description = description.with_op_time(op_time);
        }
        if let Some(set_name) = self.set_name {
            description = description.with_set_name(set_name);
        }
        if let Some(set_version) = self.set_version {
            description = description.with_set_version(set_version);
        }
        if let Some(election_id) = self.election_id {
            description = description.with_election_id(election_id);
        }
        description
    }
}
