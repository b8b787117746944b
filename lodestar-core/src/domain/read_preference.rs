//! Read preference model.
//!
//! A [`ReadPreference`] says which server roles may serve a read, optionally
//! narrowed by member tags and by how far behind the primary a secondary may be.
//! Contradictory combinations are rejected when the value is built, never
//! silently ignored at selection time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::server::ServerDescription;
use crate::error::{Result, SelectionError};

/// A set of member tags, or a tag filter to match against them.
pub type TagSet = BTreeMap<String, String>;

/// How often a primary writes a no-op when idle, in milliseconds.
pub const IDLE_WRITE_PERIOD_MS: u64 = 10_000;

/// The smallest `maxStalenessSeconds` accepted regardless of heartbeat settings.
pub const SMALLEST_MAX_STALENESS_SECONDS: u64 = 90;

/// Which server roles may serve an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreferenceMode {
    /// Only the primary.
    #[default]
    Primary,
    /// The primary if there is one, otherwise a secondary.
    PrimaryPreferred,
    /// Only secondaries.
    Secondary,
    /// A secondary if one qualifies, otherwise the primary.
    SecondaryPreferred,
    /// Any primary or secondary within the latency window.
    Nearest,
}

impl ReadPreferenceMode {
    /// The option-string spelling of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

impl fmt::Display for ReadPreferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadPreferenceMode {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(SelectionError::invalid_argument(format!(
                "unknown read preference mode '{s}'"
            ))),
        }
    }
}

/// A validated read preference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ReadPreferenceOptions", into = "ReadPreferenceOptions")]
pub struct ReadPreference {
    mode: ReadPreferenceMode,
    tag_sets: Vec<TagSet>,
    max_staleness_seconds: Option<u64>,
}

impl ReadPreference {
    /// Create a read preference, rejecting contradictory combinations.
    ///
    /// A `max_staleness_seconds` of `Some(0)` is the same as `None`. Any other
    /// value must be at least [`SMALLEST_MAX_STALENESS_SECONDS`]; the
    /// heartbeat-dependent minimum is checked by [`Self::validate_max_staleness`].
    pub fn new(
        mode: ReadPreferenceMode,
        tag_sets: Vec<TagSet>,
        max_staleness_seconds: Option<u64>,
    ) -> Result<Self> {
        let max_staleness_seconds = max_staleness_seconds.filter(|secs| *secs > 0);

        if mode == ReadPreferenceMode::Primary {
            if !tag_sets.is_empty() {
                return Err(SelectionError::invalid_argument(
                    "read preference mode 'primary' cannot be combined with tag sets",
                ));
            }
            if max_staleness_seconds.is_some() {
                return Err(SelectionError::invalid_argument(
                    "read preference mode 'primary' cannot be combined with maxStalenessSeconds",
                ));
            }
        }

        if let Some(secs) = max_staleness_seconds {
            if secs < SMALLEST_MAX_STALENESS_SECONDS {
                return Err(SelectionError::invalid_argument(format!(
                    "maxStalenessSeconds must be at least {SMALLEST_MAX_STALENESS_SECONDS}, got {secs}"
                )));
            }
        }

        Ok(Self {
            mode,
            tag_sets,
            max_staleness_seconds,
        })
    }

    /// Read only from the primary.
    pub fn primary() -> Self {
        Self::of_mode(ReadPreferenceMode::Primary)
    }

    /// Prefer the primary, fall back to secondaries.
    pub fn primary_preferred() -> Self {
        Self::of_mode(ReadPreferenceMode::PrimaryPreferred)
    }

    /// Read only from secondaries.
    pub fn secondary() -> Self {
        Self::of_mode(ReadPreferenceMode::Secondary)
    }

    /// Prefer secondaries, fall back to the primary.
    pub fn secondary_preferred() -> Self {
        Self::of_mode(ReadPreferenceMode::SecondaryPreferred)
    }

    /// Read from the nearest member regardless of role.
    pub fn nearest() -> Self {
        Self::of_mode(ReadPreferenceMode::Nearest)
    }

    fn of_mode(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
            max_staleness_seconds: None,
        }
    }

    /// Return a copy with the given tag sets.
    pub fn with_tag_sets(self, tag_sets: Vec<TagSet>) -> Result<Self> {
        Self::new(self.mode, tag_sets, self.max_staleness_seconds)
    }

    /// Return a copy with the given staleness bound.
    pub fn with_max_staleness_seconds(self, secs: u64) -> Result<Self> {
        Self::new(self.mode, self.tag_sets, Some(secs))
    }

    /// The mode.
    pub fn mode(&self) -> ReadPreferenceMode {
        self.mode
    }

    /// The ordered tag sets. Empty means no tag filtering.
    pub fn tag_sets(&self) -> &[TagSet] {
        &self.tag_sets
    }

    /// The staleness bound, if any.
    pub fn max_staleness_seconds(&self) -> Option<u64> {
        self.max_staleness_seconds
    }

    /// Check the staleness bound against the heartbeat frequency in use.
    pub fn validate_max_staleness(&self, heartbeat_frequency_ms: u64) -> Result<()> {
        let Some(secs) = self.max_staleness_seconds else {
            return Ok(());
        };
        let minimum = min_max_staleness_seconds(heartbeat_frequency_ms);
        if secs < minimum {
            return Err(SelectionError::invalid_argument(format!(
                "maxStalenessSeconds must be at least {minimum} with heartbeatFrequencyMS={heartbeat_frequency_ms}, got {secs}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ mode: {}", self.mode)?;
        if !self.tag_sets.is_empty() {
            write!(f, ", tagSets: {:?}", self.tag_sets)?;
        }
        if let Some(secs) = self.max_staleness_seconds {
            write!(f, ", maxStalenessSeconds: {secs}")?;
        }
        f.write_str(" }")
    }
}

/// The smallest staleness bound allowed for a heartbeat frequency, in seconds.
///
/// A secondary's staleness can only be measured to within one heartbeat plus
/// one idle write period, and never below [`SMALLEST_MAX_STALENESS_SECONDS`].
pub fn min_max_staleness_seconds(heartbeat_frequency_ms: u64) -> u64 {
    let measurable_ms = heartbeat_frequency_ms.saturating_add(IDLE_WRITE_PERIOD_MS);
    SMALLEST_MAX_STALENESS_SECONDS.max(measurable_ms.div_ceil(1000))
}

/// Keep the candidates matching the first tag set that matches anything.
///
/// Tag sets are tried in order. An empty list keeps every candidate; a list
/// none of whose sets match leaves nothing.
pub(crate) fn filter_by_tag_sets<'a>(
    candidates: Vec<&'a ServerDescription>,
    tag_sets: &[TagSet],
) -> Vec<&'a ServerDescription> {
    if tag_sets.is_empty() {
        return candidates;
    }

    for tag_set in tag_sets {
        let matched: Vec<_> = candidates
            .iter()
            .copied()
            .filter(|server| server.matches_tag_set(tag_set))
            .collect();
        if !matched.is_empty() {
            return matched;
        }
    }

    Vec::new()
}

/// Serialized form of a read preference, using the connection option names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadPreferenceOptions {
    mode: ReadPreferenceMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tag_sets: Vec<TagSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_staleness_seconds: Option<u64>,
}

impl TryFrom<ReadPreferenceOptions> for ReadPreference {
    type Error = SelectionError;

    fn try_from(options: ReadPreferenceOptions) -> Result<Self> {
        Self::new(options.mode, options.tag_sets, options.max_staleness_seconds)
    }
}

impl From<ReadPreference> for ReadPreferenceOptions {
    fn from(read_preference: ReadPreference) -> Self {
        Self {
            mode: read_preference.mode,
            tag_sets: read_preference.tag_sets,
            max_staleness_seconds: read_preference.max_staleness_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerAddress, ServerType};

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_primary_rejects_tag_sets() {
        let err = ReadPreference::new(
            ReadPreferenceMode::Primary,
            vec![tags(&[("dc", "ny")])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::InvalidArgument { .. }));
    }

    #[test]
    fn test_primary_rejects_max_staleness() {
        assert!(ReadPreference::primary()
            .with_max_staleness_seconds(120)
            .is_err());
    }

    #[test]
    fn test_zero_max_staleness_means_unset() {
        let rp = ReadPreference::new(ReadPreferenceMode::Primary, Vec::new(), Some(0)).unwrap();
        assert_eq!(rp.max_staleness_seconds(), None);
    }

    #[test]
    fn test_max_staleness_absolute_floor() {
        assert!(ReadPreference::secondary()
            .with_max_staleness_seconds(89)
            .is_err());
        assert!(ReadPreference::secondary()
            .with_max_staleness_seconds(90)
            .is_ok());
    }

    #[test]
    fn test_max_staleness_heartbeat_minimum() {
        let rp = ReadPreference::nearest()
            .with_max_staleness_seconds(100)
            .unwrap();
        assert!(rp.validate_max_staleness(10_000).is_ok());
        // 95s heartbeat + 10s idle period needs at least 105s
        assert!(rp.validate_max_staleness(95_000).is_err());
    }

    #[test]
    fn test_min_max_staleness_seconds() {
        assert_eq!(min_max_staleness_seconds(10_000), 90);
        assert_eq!(min_max_staleness_seconds(85_000), 95);
        assert_eq!(min_max_staleness_seconds(85_001), 96);
    }

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!(
            "SecondaryPreferred".parse::<ReadPreferenceMode>().unwrap(),
            ReadPreferenceMode::SecondaryPreferred
        );
        assert!("fastest".parse::<ReadPreferenceMode>().is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let rp: ReadPreference = serde_json::from_str(
            r#"{"mode":"secondary","tagSets":[{"dc":"ny"},{}],"maxStalenessSeconds":120}"#,
        )
        .unwrap();
        assert_eq!(rp.mode(), ReadPreferenceMode::Secondary);
        assert_eq!(rp.tag_sets().len(), 2);
        assert_eq!(rp.max_staleness_seconds(), Some(120));

        let bad = serde_json::from_str::<ReadPreference>(r#"{"mode":"primary","tagSets":[{"dc":"ny"}]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        let json = serde_json::to_string(&ReadPreference::nearest()).unwrap();
        assert_eq!(json, r#"{"mode":"nearest"}"#);
    }

    #[test]
    fn test_filter_by_tag_sets_uses_first_matching_set() {
        let ny = ServerDescription::new(ServerAddress::new("a", 1), ServerType::RsSecondary)
            .with_tag("dc", "ny");
        let sf = ServerDescription::new(ServerAddress::new("b", 1), ServerType::RsSecondary)
            .with_tag("dc", "sf");
        let candidates = vec![&ny, &sf];

        let picked = filter_by_tag_sets(
            candidates.clone(),
            &[tags(&[("dc", "la")]), tags(&[("dc", "sf")]), tags(&[("dc", "ny")])],
        );
        assert_eq!(picked, vec![&sf]);

        let none = filter_by_tag_sets(candidates.clone(), &[tags(&[("dc", "la")])]);
        assert!(none.is_empty());

        let all = filter_by_tag_sets(candidates.clone(), &[tags(&[("dc", "la")]), TagSet::new()]);
        assert_eq!(all.len(), 2);

        assert_eq!(filter_by_tag_sets(candidates, &[]).len(), 2);
    }
}
