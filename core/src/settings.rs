use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

pub const ENV_REGION: &str = "RULEHARNESS_REGION";
pub const ENV_ACCOUNT_ID: &str = "RULEHARNESS_ACCOUNT_ID";
pub const ENV_RESOURCE_PREFIX: &str = "RULEHARNESS_RESOURCE_PREFIX";

/// Harness-wide settings shared by every scenario in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    pub region: String,
    pub account_id: String,
    pub resource_prefix: String,
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// API error codes that mark a scenario as skipped rather than failed.
    #[serde(default)]
    pub skip_error_codes: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            account_id: "123456789012".to_string(),
            resource_prefix: "tf-acc-test".to_string(),
            default_tags: BTreeMap::new(),
            skip_error_codes: vec!["InvalidAccessException".to_string()],
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(region) = non_empty(ENV_REGION) {
            self.region = region;
        }
        if let Some(account_id) = non_empty(ENV_ACCOUNT_ID) {
            self.account_id = account_id;
        }
        if let Some(prefix) = non_empty(ENV_RESOURCE_PREFIX) {
            self.resource_prefix = prefix;
        }
    }

    /// Unique per-scenario name, `<prefix>-<digits>`.
    pub fn random_name(&self) -> String {
        let suffix: u64 = rand::thread_rng().gen_range(1_000_000_000_000_000..u64::MAX / 2);
        format!("{}-{}", self.resource_prefix, suffix)
    }

    pub fn is_skippable(&self, code: &str) -> bool {
        self.skip_error_codes.iter().any(|candidate| candidate == code)
    }
}
