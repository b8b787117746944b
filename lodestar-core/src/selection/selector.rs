//! Server selection logic
//!
//! Selection runs in stages over one immutable snapshot:
//!
//! 1. role filtering by topology type and read preference mode,
//! 2. max-staleness filtering of secondaries,
//! 3. tag-set filtering,
//! 4. narrowing to the latency window around the fastest candidate.
//!
//! A direct connection (`Single`) skips the latency window: its one server is
//! returned whenever its role allows.

use tracing::trace;

use crate::domain::read_preference::{filter_by_tag_sets, ReadPreference, ReadPreferenceMode};
use crate::domain::server::{ServerDescription, ServerType};
use crate::domain::topology::{TopologyDescription, TopologyType};
use crate::error::Result;
use crate::selection::staleness;

/// Width of the latency window above the fastest server, in milliseconds.
pub const DEFAULT_LOCAL_THRESHOLD_MS: u64 = 15;

/// Select the servers suitable for a read preference, or for a write when `None`.
pub(crate) fn suitable_servers<'a>(
    topology: &'a TopologyDescription,
    read_preference: Option<&ReadPreference>,
    heartbeat_frequency_ms: u64,
    local_threshold_ms: u64,
) -> Result<Vec<&'a ServerDescription>> {
    let topology_type = topology.topology_type();
    if topology_type == TopologyType::Unknown {
        return Ok(Vec::new());
    }

    if let Some(read_preference) = read_preference {
        staleness::validate(topology, read_preference, heartbeat_frequency_ms)?;
    }

    let candidates = match topology_type {
        TopologyType::Unknown => Vec::new(),
        TopologyType::Single => single_candidates(topology, read_preference),
        TopologyType::Sharded => of_types(topology, &[ServerType::Mongos]),
        TopologyType::LoadBalanced => {
            of_types(topology, &[ServerType::LoadBalancer, ServerType::Mongos])
        }
        TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
            replica_set_candidates(topology, read_preference, heartbeat_frequency_ms)
        }
    };

    trace!(
        topology_type = %topology_type,
        mode = ?read_preference.map(ReadPreference::mode),
        candidates = candidates.len(),
        "role, staleness and tag filtering done"
    );

    if topology_type == TopologyType::Single {
        return Ok(candidates);
    }
    Ok(within_latency_window(candidates, local_threshold_ms))
}

/// Select every available server accepted by `predicate`, then apply the latency window.
pub(crate) fn predicate_servers<'a>(
    topology: &'a TopologyDescription,
    predicate: &(dyn Fn(&ServerDescription) -> bool + Send + Sync),
    local_threshold_ms: u64,
) -> Vec<&'a ServerDescription> {
    match topology.topology_type() {
        TopologyType::Unknown => Vec::new(),
        topology_type => {
            let candidates: Vec<_> = topology
                .servers()
                .filter(|server| server.is_available() && predicate(*server))
                .collect();
            if topology_type == TopologyType::Single {
                candidates
            } else {
                within_latency_window(candidates, local_threshold_ms)
            }
        }
    }
}

/// Keep the candidates whose average RTT is within `local_threshold_ms` of the fastest.
///
/// Candidates that have never completed a heartbeat have no RTT and are dropped.
pub fn within_latency_window(
    candidates: Vec<&ServerDescription>,
    local_threshold_ms: u64,
) -> Vec<&ServerDescription> {
    let Some(fastest) = candidates
        .iter()
        .filter_map(|server| server.average_round_trip_time())
        .min_by(f64::total_cmp)
    else {
        return Vec::new();
    };

    let limit = fastest + local_threshold_ms as f64;
    candidates
        .into_iter()
        .filter(|server| {
            server
                .average_round_trip_time()
                .is_some_and(|rtt| rtt <= limit)
        })
        .collect()
}

/// A direct connection serves reads in every mode; writes need a writable server.
fn single_candidates<'a>(
    topology: &'a TopologyDescription,
    read_preference: Option<&ReadPreference>,
) -> Vec<&'a ServerDescription> {
    topology
        .servers()
        .filter(|server| match read_preference {
            Some(_) => server.is_available(),
            None => server.is_writable(),
        })
        .collect()
}

fn replica_set_candidates<'a>(
    topology: &'a TopologyDescription,
    read_preference: Option<&ReadPreference>,
    heartbeat_frequency_ms: u64,
) -> Vec<&'a ServerDescription> {
    let primaries = || of_types(topology, &[ServerType::RsPrimary]);
    let Some(read_preference) = read_preference else {
        return primaries();
    };
    let secondaries = || {
        eligible(
            topology,
            &[ServerType::RsSecondary],
            read_preference,
            heartbeat_frequency_ms,
        )
    };

    match read_preference.mode() {
        ReadPreferenceMode::Primary => primaries(),
        ReadPreferenceMode::PrimaryPreferred => {
            let found = primaries();
            if found.is_empty() {
                secondaries()
            } else {
                found
            }
        }
        ReadPreferenceMode::Secondary => secondaries(),
        ReadPreferenceMode::SecondaryPreferred => {
            let found = secondaries();
            if found.is_empty() {
                primaries()
            } else {
                found
            }
        }
        ReadPreferenceMode::Nearest => eligible(
            topology,
            &[ServerType::RsPrimary, ServerType::RsSecondary],
            read_preference,
            heartbeat_frequency_ms,
        ),
    }
}

/// Role-filtered servers narrowed by staleness and then by tag sets.
fn eligible<'a>(
    topology: &'a TopologyDescription,
    types: &[ServerType],
    read_preference: &ReadPreference,
    heartbeat_frequency_ms: u64,
) -> Vec<&'a ServerDescription> {
    let mut candidates = of_types(topology, types);
    if let Some(max_staleness_seconds) = read_preference.max_staleness_seconds() {
        candidates = staleness::filter_stale(
            topology,
            candidates,
            max_staleness_seconds,
            heartbeat_frequency_ms,
        );
    }
    filter_by_tag_sets(candidates, read_preference.tag_sets())
}

fn of_types<'a>(
    topology: &'a TopologyDescription,
    types: &[ServerType],
) -> Vec<&'a ServerDescription> {
    topology
        .servers()
        .filter(|server| types.contains(&server.server_type()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::read_preference::TagSet;
    use crate::domain::server::ServerAddress;

    fn server(host: &str, server_type: ServerType, rtt: f64) -> ServerDescription {
        ServerDescription::new(ServerAddress::new(host, 27017), server_type)
            .with_wire_versions(0, 21)
            .with_average_round_trip_time(rtt)
    }

    fn hosts(servers: &[&ServerDescription]) -> Vec<String> {
        servers
            .iter()
            .map(|server| server.address().host().to_string())
            .collect()
    }

    #[test]
    fn test_latency_window_drops_slow_and_unprobed() {
        let fast = server("a", ServerType::RsSecondary, 5.0);
        let edge = server("b", ServerType::RsSecondary, 20.0);
        let slow = server("c", ServerType::RsSecondary, 20.5);
        let unprobed = ServerDescription::new(ServerAddress::new("d", 1), ServerType::RsSecondary);

        let kept = within_latency_window(vec![&fast, &edge, &slow, &unprobed], 15);
        assert_eq!(hosts(&kept), vec!["a", "b"]);
    }

    #[test]
    fn test_latency_window_of_nothing() {
        assert!(within_latency_window(Vec::new(), 15).is_empty());
        let unprobed = ServerDescription::new(ServerAddress::new("d", 1), ServerType::Mongos);
        assert!(within_latency_window(vec![&unprobed], 15).is_empty());
    }

    #[test]
    fn test_nearest_applies_tags_to_primary() {
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetWithPrimary,
            vec![
                server("p", ServerType::RsPrimary, 1.0).with_tag("dc", "ny"),
                server("s", ServerType::RsSecondary, 1.0).with_tag("dc", "sf"),
            ],
        );
        let tag_set: TagSet = [("dc".to_string(), "ny".to_string())].into();
        let rp = ReadPreference::nearest().with_tag_sets(vec![tag_set]).unwrap();

        let found = suitable_servers(&topology, Some(&rp), 10_000, 15).unwrap();
        assert_eq!(hosts(&found), vec!["p"]);
    }

    #[test]
    fn test_secondary_never_falls_back_to_primary() {
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetWithPrimary,
            vec![server("p", ServerType::RsPrimary, 1.0)],
        );
        let found = suitable_servers(&topology, Some(&ReadPreference::secondary()), 10_000, 15)
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_arbiters_and_ghosts_never_selected() {
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetNoPrimary,
            vec![
                server("a", ServerType::RsArbiter, 1.0),
                server("g", ServerType::RsGhost, 1.0),
                server("o", ServerType::RsOther, 1.0),
                server("pp", ServerType::PossiblePrimary, 1.0),
            ],
        );
        for rp in [
            ReadPreference::primary_preferred(),
            ReadPreference::secondary_preferred(),
            ReadPreference::nearest(),
        ] {
            assert!(suitable_servers(&topology, Some(&rp), 10_000, 15)
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn test_two_primaries_both_pass() {
        let topology = TopologyDescription::new(
            TopologyType::ReplicaSetWithPrimary,
            vec![
                server("p1", ServerType::RsPrimary, 2.0),
                server("p2", ServerType::RsPrimary, 3.0),
            ],
        );
        let found = suitable_servers(&topology, None, 10_000, 15).unwrap();
        assert_eq!(hosts(&found), vec!["p1", "p2"]);
    }

    #[test]
    fn test_predicate_respects_latency_window() {
        let topology = TopologyDescription::new(
            TopologyType::Sharded,
            vec![
                server("m1", ServerType::Mongos, 1.0),
                server("m2", ServerType::Mongos, 50.0),
                server("m3", ServerType::Mongos, 2.0),
            ],
        );
        let found = predicate_servers(&topology, &|s: &ServerDescription| s.address().host() != "m1", 15);
        assert_eq!(hosts(&found), vec!["m3"]);
    }
}
