//! Heartbeat monitoring.

pub mod heartbeat;
pub mod prober;
