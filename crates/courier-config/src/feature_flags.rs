//! Feature gate for runtime capability toggling
//!
//! Every component asks the gate on each public call whether its capability is
//! on, so flipping a flag takes effect on the next call without a restart.
//! Flags that are not configured at all evaluate as enabled: a missing admin
//! entry never switches a component off.
//!
//! Supported flag types:
//! - Boolean: Simple on/off
//! - Time-based: Enabled only inside a time window (e.g. outside maintenance)

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Capability names consulted by the Courier components.
pub mod capabilities {
    /// Persistent priority queue (off: immediate single delivery).
    pub const QUEUE: &str = "queue.enabled";
    /// Two-tier cache path (off: legacy fallback cache only).
    pub const CACHE_TWO_TIER: &str = "cache.two_tier.enabled";
    /// Audit trail recording (off: `log` returns an empty id).
    pub const AUDIT: &str = "audit.enabled";
}

/// Synchronous boolean lookup by capability name.
pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self, capability: &str) -> bool;
}

/// Gate that enables every capability. Used when no flag source is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEnabled;

impl FeatureGate for AlwaysEnabled {
    fn is_enabled(&self, _capability: &str) -> bool {
        true
    }
}

/// Type of feature flag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureFlagType {
    /// Simple on/off toggle
    #[default]
    Boolean,
    /// Enabled only during a time window
    TimeBased {
        #[serde(with = "time::serde::rfc3339::option", default)]
        start: Option<OffsetDateTime>,
        #[serde(with = "time::serde::rfc3339::option", default)]
        end: Option<OffsetDateTime>,
    },
}

/// A single feature flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name (e.g., "queue.enabled"). Filled from the map key when loaded from config.
    #[serde(default)]
    pub name: String,
    /// Whether the flag is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Flag type for advanced evaluation. Absent means boolean.
    #[serde(flatten)]
    pub flag_type: Option<FeatureFlagType>,
    /// Description of what this flag controls
    #[serde(default)]
    pub description: Option<String>,
}

impl FeatureFlag {
    /// Create a new boolean feature flag
    pub fn boolean(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            flag_type: Some(FeatureFlagType::Boolean),
            description: None,
        }
    }

    /// Create a flag that is only on between `start` and `end`
    pub fn time_window(
        name: impl Into<String>,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            flag_type: Some(FeatureFlagType::TimeBased { start, end }),
            description: None,
        }
    }

    /// Add description to flag
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Evaluate this flag now
    pub fn evaluate(&self) -> bool {
        self.evaluate_at(OffsetDateTime::now_utc())
    }

    fn evaluate_at(&self, now: OffsetDateTime) -> bool {
        if !self.enabled {
            return false;
        }

        match &self.flag_type {
            None | Some(FeatureFlagType::Boolean) => true,
            Some(FeatureFlagType::TimeBased { start, end }) => {
                let after_start = start.is_none_or(|s| now >= s);
                let before_end = end.is_none_or(|e| now <= e);
                after_start && before_end
            }
        }
    }
}

/// Collection of feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(flatten)]
    flags: HashMap<String, FeatureFlag>,
}

impl FeatureFlags {
    /// Create a new empty feature flags collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with the built-in capability flags, all enabled
    pub fn with_defaults() -> Self {
        let mut flags = Self::new();

        flags.set(
            FeatureFlag::boolean(capabilities::QUEUE, true)
                .with_description("Persist messages to the priority queue"),
        );
        flags.set(
            FeatureFlag::boolean(capabilities::CACHE_TWO_TIER, true)
                .with_description("Use the in-process + shared two-tier cache"),
        );
        flags.set(
            FeatureFlag::boolean(capabilities::AUDIT, true)
                .with_description("Record audit trail events"),
        );

        flags
    }

    /// Set a feature flag
    pub fn set(&mut self, flag: FeatureFlag) {
        self.flags.insert(flag.name.clone(), flag);
    }

    /// Get a feature flag by name
    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(name)
    }

    /// Check if a flag is enabled. Unknown flags are enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).is_none_or(FeatureFlag::evaluate)
    }

    /// Merge with another set of flags (other takes precedence)
    pub fn merge(&mut self, other: FeatureFlags) {
        for (name, mut flag) in other.flags {
            if flag.name.is_empty() {
                flag.name = name.clone();
            }
            self.flags.insert(name, flag);
        }
    }

    /// List all flags
    pub fn list(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.flags.values()
    }

    /// Get the number of flags
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl FeatureGate for FeatureFlags {
    fn is_enabled(&self, capability: &str) -> bool {
        FeatureFlags::is_enabled(self, capability)
    }
}

/// Feature flags shared between components and swappable at runtime.
///
/// Readers take a lock-free snapshot per call; writers replace the whole set.
#[derive(Debug, Clone)]
pub struct SharedFeatureFlags {
    inner: Arc<ArcSwap<FeatureFlags>>,
}

impl SharedFeatureFlags {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(flags)),
        }
    }

    /// Replace every flag at once.
    pub fn replace(&self, flags: FeatureFlags) {
        self.inner.store(Arc::new(flags));
        tracing::info!("Feature flags replaced");
    }

    /// Insert or update a single flag.
    pub fn set(&self, flag: FeatureFlag) {
        let name = flag.name.clone();
        let enabled = flag.enabled;
        self.inner.rcu(|current| {
            let mut next = FeatureFlags::clone(current);
            next.set(flag.clone());
            next
        });
        tracing::info!(flag = %name, enabled, "Feature flag updated");
    }

    pub fn snapshot(&self) -> Arc<FeatureFlags> {
        self.inner.load_full()
    }
}

impl Default for SharedFeatureFlags {
    fn default() -> Self {
        Self::new(FeatureFlags::with_defaults())
    }
}

impl FeatureGate for SharedFeatureFlags {
    fn is_enabled(&self, capability: &str) -> bool {
        self.inner.load().is_enabled(capability)
    }
}
