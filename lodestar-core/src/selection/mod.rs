//! Server selection logic.

pub mod criteria;
pub mod rtt;
pub mod selector;
pub mod staleness;
