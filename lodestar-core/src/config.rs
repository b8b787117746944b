//! Selection configuration with builder pattern.
//!
//! Holds the client options that shape server selection:
//! - heartbeat frequency, which bounds staleness estimates
//! - the latency window (`localThresholdMS`)
//! - the server selection timeout used by waiting selectors
//! - the default read preference
//!
//! The same options can be deserialized from their connection-string names.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::read_preference::{ReadPreference, ReadPreferenceMode, TagSet};
use crate::error::{Result, SelectionError};
use crate::selection::selector::DEFAULT_LOCAL_THRESHOLD_MS;

/// Default interval between heartbeats (10 seconds).
pub const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

/// Shortest heartbeat interval a client may configure (500 milliseconds).
pub const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// Default latency window above the fastest server (15 milliseconds).
pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(DEFAULT_LOCAL_THRESHOLD_MS);

/// Default time to wait for a suitable server (30 seconds).
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for server selection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "SelectionOptions")]
pub struct SelectionConfig {
    heartbeat_frequency: Duration,
    local_threshold: Duration,
    server_selection_timeout: Duration,
    read_preference: Option<ReadPreference>,
}

impl SelectionConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> SelectionConfigBuilder {
        SelectionConfigBuilder::default()
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_frequency
    }

    /// Returns the latency window width.
    #[must_use]
    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }

    /// Returns how long a selector waits for a suitable server.
    #[must_use]
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Returns the default read preference for reads, if one was configured.
    #[must_use]
    pub fn read_preference(&self) -> Option<&ReadPreference> {
        self.read_preference.as_ref()
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
            read_preference: None,
        }
    }
}

/// Builder for [`SelectionConfig`].
#[derive(Debug, Default)]
pub struct SelectionConfigBuilder {
    heartbeat_frequency: Option<Duration>,
    local_threshold: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    read_preference: Option<ReadPreference>,
}

impl SelectionConfigBuilder {
    /// Sets the heartbeat interval.
    ///
    /// Must be at least 500ms.
    #[must_use]
    pub fn with_heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.heartbeat_frequency = Some(frequency);
        self
    }

    /// Sets the latency window width.
    #[must_use]
    pub fn with_local_threshold(mut self, threshold: Duration) -> Self {
        self.local_threshold = Some(threshold);
        self
    }

    /// Sets how long a selector waits for a suitable server.
    #[must_use]
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Sets the default read preference.
    ///
    /// Its staleness bound is checked against the heartbeat frequency in [`Self::build`].
    #[must_use]
    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error if the heartbeat frequency is below
    /// 500ms or the read preference's staleness bound is too small to be
    /// measured at that frequency.
    pub fn build(self) -> Result<SelectionConfig> {
        let heartbeat_frequency = self
            .heartbeat_frequency
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);
        if heartbeat_frequency < MIN_HEARTBEAT_FREQUENCY {
            return Err(SelectionError::invalid_argument(format!(
                "heartbeatFrequencyMS must be at least {}, got {}",
                MIN_HEARTBEAT_FREQUENCY.as_millis(),
                heartbeat_frequency.as_millis()
            )));
        }

        if let Some(read_preference) = &self.read_preference {
            let heartbeat_ms = u64::try_from(heartbeat_frequency.as_millis()).unwrap_or(u64::MAX);
            read_preference.validate_max_staleness(heartbeat_ms)?;
        }

        Ok(SelectionConfig {
            heartbeat_frequency,
            local_threshold: self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD),
            server_selection_timeout: self
                .server_selection_timeout
                .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT),
            read_preference: self.read_preference,
        })
    }
}

/// Connection-option spelling of [`SelectionConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectionOptions {
    #[serde(rename = "heartbeatFrequencyMS")]
    heartbeat_frequency_ms: Option<u64>,
    #[serde(rename = "localThresholdMS")]
    local_threshold_ms: Option<u64>,
    #[serde(rename = "serverSelectionTimeoutMS")]
    server_selection_timeout_ms: Option<u64>,
    #[serde(rename = "readPreference")]
    read_preference: Option<ReadPreferenceMode>,
    #[serde(rename = "readPreferenceTags")]
    read_preference_tags: Vec<TagSet>,
    #[serde(rename = "maxStalenessSeconds")]
    max_staleness_seconds: Option<u64>,
}

impl TryFrom<SelectionOptions> for SelectionConfig {
    type Error = SelectionError;

    fn try_from(options: SelectionOptions) -> Result<Self> {
        let mut builder = SelectionConfig::builder();
        if let Some(ms) = options.heartbeat_frequency_ms {
            builder = builder.with_heartbeat_frequency(Duration::from_millis(ms));
        }
        if let Some(ms) = options.local_threshold_ms {
            builder = builder.with_local_threshold(Duration::from_millis(ms));
        }
        if let Some(ms) = options.server_selection_timeout_ms {
            builder = builder.with_server_selection_timeout(Duration::from_millis(ms));
        }

        let tag_sets = options.read_preference_tags;
        match options.read_preference {
            Some(mode) => {
                builder = builder.with_read_preference(ReadPreference::new(
                    mode,
                    tag_sets,
                    options.max_staleness_seconds,
                )?);
            }
            None if !tag_sets.is_empty() || options.max_staleness_seconds.is_some() => {
                return Err(SelectionError::invalid_argument(
                    "readPreferenceTags and maxStalenessSeconds require readPreference",
                ));
            }
            None => {}
        }

        builder.build()
    }
}
