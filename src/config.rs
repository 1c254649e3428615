//! Engine tuning options.
//!
//! # Load Order
//!
//! 1. Default values
//! 2. Builder calls
//! 3. Environment variables (`HEMMER_STACKS_*`) via [`EngineOptions::from_env`]
//!
//! Invalid environment values are ignored with a warning.

use std::time::Duration;
use tracing::warn;

/// Default number of resource instances worked on concurrently.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Default cap on list resource results.
pub const DEFAULT_LIST_RESOURCE_LIMIT: usize = 100;

/// Default capacity of event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

macro_rules! parse_env {
    ($lookup:expr, $field:expr, $var:literal, $parse:expr) => {
        if let Some(raw) = $lookup($var) {
            match $parse(raw.trim()) {
                Some(value) => $field = value,
                None => warn!(variable = $var, value = %raw, "ignoring invalid environment override"),
            }
        }
    };
}

/// Options shared by planning and applying.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Resource instances worked on concurrently. Always at least 1.
    pub parallelism: usize,
    /// Upper bound on list resource results.
    pub list_resource_limit: usize,
    /// How long a provider may take to stop.
    pub stop_timeout: Duration,
    /// Capacity of event channels.
    pub event_buffer: usize,
    /// Whether providers may defer results.
    pub allow_deferral: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            list_resource_limit: DEFAULT_LIST_RESOURCE_LIMIT,
            stop_timeout: Duration::from_secs(30),
            event_buffer: DEFAULT_EVENT_BUFFER,
            allow_deferral: true,
        }
    }
}

fn positive(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|n| *n > 0)
}

impl EngineOptions {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `HEMMER_STACKS_*` overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        parse_env!(lookup, self.parallelism, "HEMMER_STACKS_PARALLELISM", positive);
        parse_env!(lookup, self.list_resource_limit, "HEMMER_STACKS_LIST_LIMIT", positive);
        parse_env!(
            lookup,
            self.stop_timeout,
            "HEMMER_STACKS_STOP_TIMEOUT_SECS",
            |raw: &str| raw.parse::<u64>().ok().map(Duration::from_secs)
        );
        parse_env!(lookup, self.event_buffer, "HEMMER_STACKS_EVENT_BUFFER", positive);
        self
    }

    /// Set concurrency.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the list resource cap.
    pub fn with_list_resource_limit(mut self, limit: usize) -> Self {
        self.list_resource_limit = limit;
        self
    }

    /// Set the provider stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set event channel capacity.
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    /// Allow or forbid deferred results.
    pub fn with_deferral(mut self, allow: bool) -> Self {
        self.allow_deferral = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.parallelism, 10);
        assert_eq!(options.list_resource_limit, 100);
        assert_eq!(options.stop_timeout, Duration::from_secs(30));
        assert!(options.allow_deferral);
    }

    #[test]
    fn test_env_overrides() {
        let options = EngineOptions::default().with_env_overrides(lookup(&[
            ("HEMMER_STACKS_PARALLELISM", "4"),
            ("HEMMER_STACKS_LIST_LIMIT", "7"),
            ("HEMMER_STACKS_STOP_TIMEOUT_SECS", "2"),
            ("HEMMER_STACKS_EVENT_BUFFER", "8"),
        ]));
        assert_eq!(options.parallelism, 4);
        assert_eq!(options.list_resource_limit, 7);
        assert_eq!(options.stop_timeout, Duration::from_secs(2));
        assert_eq!(options.event_buffer, 8);
    }

    #[test]
    fn test_invalid_env_ignored() {
        let options = EngineOptions::default().with_env_overrides(lookup(&[
            ("HEMMER_STACKS_PARALLELISM", "0"),
            ("HEMMER_STACKS_LIST_LIMIT", "many"),
        ]));
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn test_builder_clamps() {
        let options = EngineOptions::new().with_parallelism(0).with_event_buffer(0);
        assert_eq!(options.parallelism, 1);
        assert_eq!(options.event_buffer, 1);
    }
}
