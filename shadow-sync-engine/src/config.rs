use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shadow_sync_core::{Direction, ShadowKey};

/// Which strategy drains the queue, and its tuning knob (spec §4.5/§4.6).
/// Matches the configuration schema of spec §6 exactly: `{type: Realtime |
/// Periodic, interval_s?}`. Worker-pool parallelism is not part of this
/// snapshot — it is the separate `parallelism` argument to
/// [`crate::handler::SyncHandler::start`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    Realtime,
    Periodic { interval_s: u64 },
}

impl StrategyKind {
    pub fn default_realtime() -> Self {
        StrategyKind::Realtime
    }

    pub fn default_periodic() -> Self {
        StrategyKind::Periodic { interval_s: 300 }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            StrategyKind::Periodic { interval_s } => Some(Duration::from_secs(*interval_s)),
            StrategyKind::Realtime => None,
        }
    }
}

/// Atomic configuration snapshot (spec §6). A change replaces the whole
/// value; the handler diffs the old and new snapshots rather than mutating
/// either in place (spec §9, "config hot-reload").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub synced_keys: BTreeSet<ShadowKey>,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        SyncConfiguration {
            strategy: StrategyKind::default_realtime(),
            direction: Direction::BetweenDeviceAndCloud,
            synced_keys: BTreeSet::new(),
        }
    }
}

impl SyncConfiguration {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// What changed between two configuration snapshots, as the handler needs
/// to apply it: keys added/removed, and whether strategy or direction
/// themselves differ (spec §6 "Handler diffs and applies").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added_keys: Vec<ShadowKey>,
    pub removed_keys: Vec<ShadowKey>,
    pub strategy_changed: bool,
    pub direction_changed: bool,
}

impl ConfigDiff {
    pub fn compute(old: &SyncConfiguration, new: &SyncConfiguration) -> Self {
        let added_keys = new.synced_keys.difference(&old.synced_keys).cloned().collect();
        let removed_keys = old.synced_keys.difference(&new.synced_keys).cloned().collect();
        ConfigDiff {
            added_keys,
            removed_keys,
            strategy_changed: old.strategy != new.strategy,
            direction_changed: old.direction != new.direction,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_keys.is_empty()
            && self.removed_keys.is_empty()
            && !self.strategy_changed
            && !self.direction_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> ShadowKey {
        ShadowKey::new(format!("thing-{n}"), "")
    }

    #[test]
    fn yaml_round_trips() {
        let mut cfg = SyncConfiguration::default();
        cfg.synced_keys.insert(key(1));
        cfg.synced_keys.insert(key(2));
        let yaml = cfg.to_yaml().unwrap();
        let parsed = SyncConfiguration::from_yaml(&yaml).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn diff_reports_added_and_removed_keys() {
        let mut old = SyncConfiguration::default();
        old.synced_keys.insert(key(1));
        old.synced_keys.insert(key(2));

        let mut new = SyncConfiguration::default();
        new.synced_keys.insert(key(2));
        new.synced_keys.insert(key(3));

        let diff = ConfigDiff::compute(&old, &new);
        assert_eq!(diff.added_keys, vec![key(3)]);
        assert_eq!(diff.removed_keys, vec![key(1)]);
        assert!(!diff.strategy_changed);
        assert!(!diff.direction_changed);
    }

    #[test]
    fn diff_detects_strategy_and_direction_changes() {
        let old = SyncConfiguration::default();
        let mut new = old.clone();
        new.strategy = StrategyKind::default_periodic();
        new.direction = Direction::CloudToDevice;

        let diff = ConfigDiff::compute(&old, &new);
        assert!(diff.strategy_changed);
        assert!(diff.direction_changed);
        assert!(diff.added_keys.is_empty());
    }

    #[test]
    fn empty_diff_for_identical_snapshots() {
        let cfg = SyncConfiguration::default();
        assert!(ConfigDiff::compute(&cfg, &cfg).is_empty());
    }
}
