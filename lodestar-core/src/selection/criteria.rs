//! What an operation asks of the server it runs on.

use std::fmt;
use std::sync::Arc;

use crate::domain::read_preference::ReadPreference;
use crate::domain::server::ServerDescription;

/// A caller-supplied filter over available servers.
pub type Predicate = Arc<dyn Fn(&ServerDescription) -> bool + Send + Sync>;

/// How to choose servers for an operation.
///
/// Writes pass no criteria at all; see
/// [`TopologyDescription::find_suitable_servers`](crate::TopologyDescription::find_suitable_servers).
#[derive(Clone)]
pub enum SelectionCriteria {
    /// Select by role, tags and staleness.
    ReadPreference(ReadPreference),
    /// Select every available server the predicate accepts.
    Predicate(Predicate),
}

impl SelectionCriteria {
    /// The read preference, if these criteria carry one.
    pub fn as_read_preference(&self) -> Option<&ReadPreference> {
        match self {
            Self::ReadPreference(read_preference) => Some(read_preference),
            Self::Predicate(_) => None,
        }
    }

    /// Build criteria from a predicate closure.
    pub fn from_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&ServerDescription) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_preference: ReadPreference) -> Self {
        Self::ReadPreference(read_preference)
    }
}

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadPreference(read_preference) => {
                f.debug_tuple("ReadPreference").field(read_preference).finish()
            }
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl fmt::Display for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadPreference(read_preference) => write!(f, "read preference {read_preference}"),
            Self::Predicate(_) => f.write_str("custom predicate"),
        }
    }
}
