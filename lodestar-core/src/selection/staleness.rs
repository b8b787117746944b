//! Max-staleness estimation.
//!
//! A secondary's staleness is estimated from the `lastWriteDate` values reported
//! in heartbeats. With a known primary the estimate compares how far each server
//! was behind its own clock at its last heartbeat:
//!
//! ```text
//! (S.lastUpdateTime - S.lastWriteDate) - (P.lastUpdateTime - P.lastWriteDate) + heartbeatFrequencyMS
//! ```
//!
//! Without a primary, the freshest secondary stands in for it:
//!
//! ```text
//! SMax.lastWriteDate - S.lastWriteDate + heartbeatFrequencyMS
//! ```

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::domain::read_preference::ReadPreference;
use crate::domain::server::{ServerDescription, ServerType, MAX_STALENESS_MIN_WIRE_VERSION};
use crate::domain::topology::TopologyDescription;
use crate::error::{Result, SelectionError};

/// The point of comparison for staleness estimates.
#[derive(Debug, Clone, Copy)]
pub enum StalenessReference<'a> {
    /// The topology's primary.
    Primary(&'a ServerDescription),
    /// The greatest `lastWriteDate` among secondaries, used when there is no primary.
    FreshestWrite(DateTime<Utc>),
}

impl<'a> StalenessReference<'a> {
    /// Pick the reference for a topology snapshot.
    ///
    /// Returns `None` when there is no primary and no secondary has reported a
    /// write date.
    pub fn for_topology(topology: &'a TopologyDescription) -> Option<Self> {
        if let Some(primary) = topology.primary() {
            return Some(Self::Primary(primary));
        }
        topology
            .servers()
            .filter(|server| server.server_type() == ServerType::RsSecondary)
            .filter_map(ServerDescription::last_write_date)
            .max()
            .map(Self::FreshestWrite)
    }
}

/// Estimate how far `server` lags the reference, in milliseconds.
///
/// `None` when a write date needed for the estimate is missing.
pub fn estimated_staleness_ms(
    server: &ServerDescription,
    reference: StalenessReference<'_>,
    heartbeat_frequency_ms: u64,
) -> Option<i64> {
    let heartbeat_ms = i64::try_from(heartbeat_frequency_ms).unwrap_or(i64::MAX);
    let last_write = server.last_write_date()?;

    let lag_ms = match reference {
        StalenessReference::Primary(primary) => {
            let primary_write = primary.last_write_date()?;
            let server_behind = server.last_update_time().signed_duration_since(last_write);
            let primary_behind = primary.last_update_time().signed_duration_since(primary_write);
            (server_behind - primary_behind).num_milliseconds()
        }
        StalenessReference::FreshestWrite(freshest) => {
            freshest.signed_duration_since(last_write).num_milliseconds()
        }
    };

    Some(lag_ms.saturating_add(heartbeat_ms))
}

/// Reject staleness bounds that cannot be honoured for this topology.
pub(crate) fn validate(
    topology: &TopologyDescription,
    read_preference: &ReadPreference,
    heartbeat_frequency_ms: u64,
) -> Result<()> {
    if read_preference.max_staleness_seconds().is_none() {
        return Ok(());
    }

    read_preference.validate_max_staleness(heartbeat_frequency_ms)?;

    if let Some(server) = topology
        .servers()
        .find(|server| server.is_available() && !server.supports_max_staleness())
    {
        return Err(SelectionError::invalid_argument(format!(
            "maxStalenessSeconds requires maxWireVersion >= {MAX_STALENESS_MIN_WIRE_VERSION}, \
             but server {} reports {}",
            server.address(),
            server.max_wire_version()
        )));
    }

    Ok(())
}

/// Drop secondaries whose estimated staleness exceeds the bound.
///
/// Servers that are not secondaries pass through untouched. A secondary whose
/// staleness cannot be estimated is dropped.
pub(crate) fn filter_stale<'a>(
    topology: &TopologyDescription,
    candidates: Vec<&'a ServerDescription>,
    max_staleness_seconds: u64,
    heartbeat_frequency_ms: u64,
) -> Vec<&'a ServerDescription> {
    let reference = StalenessReference::for_topology(topology);
    let max_staleness_ms = i64::try_from(max_staleness_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);

    candidates
        .into_iter()
        .filter(|server| {
            if server.server_type() != ServerType::RsSecondary {
                return true;
            }
            let staleness = reference
                .and_then(|reference| estimated_staleness_ms(server, reference, heartbeat_frequency_ms));
            trace!(
                address = %server.address(),
                staleness_ms = ?staleness,
                max_staleness_ms,
                "estimated secondary staleness"
            );
            matches!(staleness, Some(ms) if ms <= max_staleness_ms)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::ServerAddress;
    use crate::domain::topology::TopologyType;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn member(host: &str, server_type: ServerType, write_lag_ms: i64) -> ServerDescription {
        ServerDescription::new(ServerAddress::new(host, 27017), server_type)
            .with_wire_versions(0, 21)
            .with_last_update_time(epoch())
            .with_last_write_date(epoch() - Duration::milliseconds(write_lag_ms))
            .with_average_round_trip_time(5.0)
    }

    #[test]
    fn test_estimate_against_primary() {
        let primary = member("p", ServerType::RsPrimary, 1_000);
        let secondary = member("s", ServerType::RsSecondary, 61_000);

        let staleness =
            estimated_staleness_ms(&secondary, StalenessReference::Primary(&primary), 10_000);
        assert_eq!(staleness, Some(70_000));
    }

    #[test]
    fn test_estimate_against_freshest_secondary() {
        let fresh = member("a", ServerType::RsSecondary, 0);
        let stale = member("b", ServerType::RsSecondary, 100_000);
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetNoPrimary,
            vec![fresh.clone(), stale.clone()],
        );

        let reference = StalenessReference::for_topology(&topology).unwrap();
        assert_eq!(estimated_staleness_ms(&fresh, reference, 10_000), Some(10_000));
        assert_eq!(estimated_staleness_ms(&stale, reference, 10_000), Some(110_000));
    }

    #[test]
    fn test_missing_write_date_cannot_be_estimated() {
        let primary = member("p", ServerType::RsPrimary, 0);
        let secondary = ServerDescription::new(ServerAddress::new("s", 1), ServerType::RsSecondary);
        assert_eq!(
            estimated_staleness_ms(&secondary, StalenessReference::Primary(&primary), 10_000),
            None
        );
    }

    #[test]
    fn test_filter_keeps_primary_and_fresh_secondaries() {
        let primary = member("p", ServerType::RsPrimary, 0);
        let fresh = member("a", ServerType::RsSecondary, 30_000);
        let stale = member("b", ServerType::RsSecondary, 200_000);
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetWithPrimary,
            vec![primary.clone(), fresh.clone(), stale.clone()],
        );

        let candidates = topology.servers().collect();
        let kept = filter_stale(&topology, candidates, 90, 10_000);
        let hosts: Vec<_> = kept.iter().map(|s| s.address().host()).collect();
        assert_eq!(hosts, vec!["a", "p"]);
    }

    #[test]
    fn test_validate_rejects_old_wire_version() {
        let old = ServerDescription::new(ServerAddress::new("a", 1), ServerType::RsSecondary)
            .with_wire_versions(0, 4);
        let topology = TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, vec![old]);
        let rp = ReadPreference::secondary()
            .with_max_staleness_seconds(120)
            .unwrap();

        let err = validate(&topology, &rp, 10_000).unwrap_err();
        assert!(err.to_string().contains("maxWireVersion"));
    }

    #[test]
    fn test_validate_ignores_unknown_servers() {
        let unknown = ServerDescription::unknown(ServerAddress::new("a", 1));
        let topology = TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, vec![unknown]);
        let rp = ReadPreference::secondary()
            .with_max_staleness_seconds(120)
            .unwrap();
        assert!(validate(&topology, &rp, 10_000).is_ok());
    }
}
