//! Domain models: servers, topologies, read preferences and the shared snapshot cell.

pub mod read_preference;
pub mod routing;
pub mod server;
pub mod topology;
