//! In-memory system parameter store backing the admin key-value surface.

use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;

use qtrader_common::types::SystemParam;

/// Key-value store of runtime-tunable system parameters, grouped for the
/// admin surface.
#[derive(Default)]
pub struct SystemParamStore {
    params: RwLock<FxHashMap<String, SystemParam>>,
}

impl SystemParamStore {
    /// Create a store seeded with the trading defaults
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        store.seed("trading.default_split_strategy", "simple", "trading", "default split policy for manual order commands");
        store.seed("trading.max_volume_per_order", "10", "trading", "default per-child volume cap");
        store.seed("trading.order_interval_seconds", "0.5", "trading", "default spacing between child orders");
        store.seed("trading.order_timeout_seconds", "15", "trading", "default child fill deadline");
        store.seed("trading.total_timeout_seconds", "300", "trading", "default whole-command deadline");
        store.seed("system.heartbeat_interval_seconds", "10", "system", "ipc heartbeat emission interval");
        store
    }

    fn seed(&self, key: &str, value: &str, group: &str, description: &str) {
        self.params.write().insert(
            key.to_string(),
            SystemParam {
                key: key.to_string(),
                value: value.to_string(),
                group: group.to_string(),
                description: description.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    /// All parameters, optionally restricted to one group, sorted by key
    #[must_use]
    pub fn list(&self, group: Option<&str>) -> Vec<SystemParam> {
        let params = self.params.read();
        let mut result: Vec<SystemParam> = params
            .values()
            .filter(|p| group.map_or(true, |g| p.group == g))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        result
    }

    /// One parameter by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<SystemParam> {
        self.params.read().get(key).cloned()
    }

    /// Parameters of one group as a key → value map
    #[must_use]
    pub fn group(&self, group: &str) -> FxHashMap<String, String> {
        self.params
            .read()
            .values()
            .filter(|p| p.group == group)
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }

    /// Create or update a parameter. Updating keeps the existing group and
    /// description unless the key is new.
    pub fn update(&self, key: &str, value: &str) -> SystemParam {
        let mut params = self.params.write();
        let entry = params
            .entry(key.to_string())
            .or_insert_with(|| SystemParam {
                key: key.to_string(),
                value: String::new(),
                group: key.split('.').next().unwrap_or("misc").to_string(),
                description: String::new(),
                updated_at: Utc::now(),
            });
        entry.value = value.to_string();
        entry.updated_at = Utc::now();
        info!(key, value, "system parameter updated");
        entry.clone()
    }
}
