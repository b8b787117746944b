//! Lodestar Core functionality.
//!
//! This crate contains the topology model, read preferences and the server
//! selection algorithm. Everything here is synchronous and operates on immutable
//! snapshots, so a single [`TopologyDescription`] can be shared across any number
//! of threads and selected against without locking.

pub mod config;
pub mod domain;
pub mod error;
pub mod selection;

pub use config::{SelectionConfig, SelectionConfigBuilder};
pub use domain::read_preference::{ReadPreference, ReadPreferenceMode, TagSet};
pub use domain::routing::{SharedTopologyCell, TopologyCell};
pub use domain::server::{ElectionId, OpTime, ServerAddress, ServerDescription, ServerType};
pub use domain::topology::{TopologyDescription, TopologyType};
pub use error::{Result, SelectionError};
pub use selection::criteria::{Predicate, SelectionCriteria};
pub use selection::rtt::update_average_round_trip_time;
