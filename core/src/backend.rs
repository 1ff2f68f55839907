use crate::model::{RemoteRule, RuleConfig};
use crate::settings::HarnessConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("automation rule {0} not found")]
    NotFound(String),
    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl BackendError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// An absent resource, as opposed to a failed call.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::NotFound(_) => None,
            BackendError::Api { code, .. } => Some(code.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// The remote service holding automation rules.
pub trait RuleBackend: Send + Sync {
    fn create(&self, config: &RuleConfig) -> Result<RemoteRule, BackendError>;
    fn find_by_arn(&self, arn: &str) -> Result<RemoteRule, BackendError>;
    fn update(&self, arn: &str, config: &RuleConfig) -> Result<RemoteRule, BackendError>;
    fn delete(&self, arn: &str) -> Result<(), BackendError>;
}

/// In-process backend with the service's identity and tagging behaviour.
#[derive(Debug)]
pub struct InMemoryBackend {
    region: String,
    account_id: String,
    default_tags: BTreeMap<String, String>,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: BTreeMap<String, RemoteRule>,
    failures: HashMap<Operation, VecDeque<BackendError>>,
}

impl InMemoryBackend {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            region: config.region.clone(),
            account_id: config.account_id.clone(),
            default_tags: config.default_tags.clone(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue an error returned by the next call of `operation`.
    pub fn inject_failure(&self, operation: Operation, error: BackendError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Delete a rule behind the harness's back.
    pub fn remove_out_of_band(&self, arn: &str) -> bool {
        self.lock().rules.remove(arn).is_some()
    }

    pub fn arns(&self) -> Vec<String> {
        self.lock().rules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tags_all(&self, config: &RuleConfig) -> BTreeMap<String, String> {
        let mut merged = self.default_tags.clone();
        merged.extend(config.tags.clone());
        merged
    }

    fn caller_arn(&self) -> String {
        format!("arn:aws:iam::{}:root", self.account_id)
    }
}

impl Inner {
    fn take_failure(&mut self, operation: Operation) -> Result<(), BackendError> {
        match self
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

impl RuleBackend for InMemoryBackend {
    fn create(&self, config: &RuleConfig) -> Result<RemoteRule, BackendError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::Create)?;

        let arn = format!(
            "arn:aws:securityhub:{}:{}:automation-rule/{}",
            self.region,
            self.account_id,
            Uuid::new_v4()
        );
        let timestamp = now();
        let rule = RemoteRule {
            arn: arn.clone(),
            config: config.clone(),
            tags_all: self.tags_all(config),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            created_by: self.caller_arn(),
        };
        inner.rules.insert(arn.clone(), rule.clone());
        info!(arn = %arn, rule_name = %config.rule_name, "created automation rule");
        Ok(rule)
    }

    fn find_by_arn(&self, arn: &str) -> Result<RemoteRule, BackendError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::Read)?;
        debug!(arn = %arn, "reading automation rule");
        inner
            .rules
            .get(arn)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(arn.to_string()))
    }

    fn update(&self, arn: &str, config: &RuleConfig) -> Result<RemoteRule, BackendError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::Update)?;
        let tags_all = self.tags_all(config);
        let rule = inner
            .rules
            .get_mut(arn)
            .ok_or_else(|| BackendError::NotFound(arn.to_string()))?;
        rule.config = config.clone();
        rule.tags_all = tags_all;
        rule.updated_at = now();
        info!(arn = %arn, "updated automation rule");
        Ok(rule.clone())
    }

    fn delete(&self, arn: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::Delete)?;
        match inner.rules.remove(arn) {
            Some(_) => {
                info!(arn = %arn, "deleted automation rule");
                Ok(())
            }
            None => Err(BackendError::NotFound(arn.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfigBuilder;
    use crate::model::{FindingFieldsUpdate, StringComparison, StringField};

    fn rule(name: &str) -> RuleConfig {
        let mut update = FindingFieldsUpdate::default();
        update
            .user_defined_fields
            .insert("key".to_string(), "value".to_string());
        RuleConfigBuilder::new(name)
            .description("test description")
            .finding_fields_update(update)
            .string_filter(
                StringField::AwsAccountId,
                StringComparison::Equals,
                "1234567890",
            )
            .tag("key1", "value1")
            .build()
            .expect("valid rule")
    }

    #[test]
    fn assigns_arn_and_merges_default_tags() {
        let mut settings = HarnessConfig::default();
        settings
            .default_tags
            .insert("env".to_string(), "test".to_string());
        settings
            .default_tags
            .insert("key1".to_string(), "default".to_string());
        let backend = InMemoryBackend::new(&settings);

        let created = backend.create(&rule("a")).expect("create");
        assert!(created
            .arn
            .starts_with("arn:aws:securityhub:us-west-2:123456789012:automation-rule/"));
        assert_eq!(created.tags_all.get("env").map(String::as_str), Some("test"));
        assert_eq!(
            created.tags_all.get("key1").map(String::as_str),
            Some("value1")
        );

        let read = backend.find_by_arn(&created.arn).expect("read");
        assert_eq!(read, created);
    }

    #[test]
    fn missing_rules_are_not_found() {
        let backend = InMemoryBackend::new(&HarnessConfig::default());
        let arn = "arn:aws:securityhub:us-west-2:123456789012:automation-rule/missing";

        assert!(backend.find_by_arn(arn).unwrap_err().is_not_found());
        assert!(backend.delete(arn).unwrap_err().is_not_found());
        assert!(backend.update(arn, &rule("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn injected_failures_fire_once_in_order() {
        let backend = InMemoryBackend::new(&HarnessConfig::default());
        let created = backend.create(&rule("a")).expect("create");
        backend.inject_failure(
            Operation::Read,
            BackendError::api("ThrottlingException", "slow down"),
        );

        let err = backend.find_by_arn(&created.arn).unwrap_err();
        assert_eq!(err.code(), Some("ThrottlingException"));
        assert!(!err.is_not_found());
        assert!(backend.find_by_arn(&created.arn).is_ok());
    }

    #[test]
    fn out_of_band_removal_is_visible() {
        let backend = InMemoryBackend::new(&HarnessConfig::default());
        let created = backend.create(&rule("a")).expect("create");
        assert!(backend.remove_out_of_band(&created.arn));
        assert!(backend.is_empty());
        assert!(!backend.remove_out_of_band(&created.arn));
    }
}
