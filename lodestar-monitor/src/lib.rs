//! Lodestar Monitor
//!
//! The async side of server selection: a heartbeat monitor that keeps each
//! server's description and round-trip average current, and a selector that
//! waits for a suitable server to appear until the selection timeout elapses.
//!
//! All selection decisions are delegated to `lodestar-core`; this crate only
//! decides *when* to select and publishes the snapshots selection reads.

pub mod error;
pub mod monitor;
pub mod topology;

pub use error::{MonitorError, Result};
pub use monitor::heartbeat::{Heartbeat, HeartbeatReply};
pub use monitor::prober::Monitor;
pub use topology::{SharedTopology, Topology};
