use crate::backend::RuleBackend;
use crate::error::HarnessError;
use crate::oracle;
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// A post-apply assertion against the resource under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Check {
    Exists,
    AttrEquals { key: String, value: String },
    AttrAbsent { key: String },
    Disappears,
}

impl Check {
    pub fn attr(key: impl Into<String>, value: impl Into<String>) -> Self {
        Check::AttrEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Check::AttrAbsent { key: key.into() }
    }

    pub fn run(&self, ctx: &CheckContext<'_>) -> Result<(), HarnessError> {
        match self {
            Check::Exists => oracle::check_exists(ctx.backend, ctx.state, ctx.address).map(|_| ()),
            Check::AttrEquals { key, value } => {
                let resource = ctx
                    .state
                    .get(ctx.address)
                    .ok_or_else(|| HarnessError::NotInState(ctx.address.to_string()))?;
                match resource.attributes.get(key) {
                    Some(actual) if actual == value => Ok(()),
                    actual => Err(HarnessError::AttributeMismatch {
                        address: ctx.address.to_string(),
                        key: key.clone(),
                        expected: value.clone(),
                        actual: actual.cloned(),
                    }),
                }
            }
            Check::AttrAbsent { key } => {
                let resource = ctx
                    .state
                    .get(ctx.address)
                    .ok_or_else(|| HarnessError::NotInState(ctx.address.to_string()))?;
                match resource.attributes.get(key) {
                    None => Ok(()),
                    Some(actual) => Err(HarnessError::AttributeUnexpected {
                        address: ctx.address.to_string(),
                        key: key.clone(),
                        actual: actual.clone(),
                    }),
                }
            }
            Check::Disappears => {
                let resource = ctx
                    .state
                    .get(ctx.address)
                    .ok_or_else(|| HarnessError::NotInState(ctx.address.to_string()))?;
                ctx.backend.delete(&resource.id)?;
                info!(address = ctx.address, arn = %resource.id, "deleted resource out of band");
                Ok(())
            }
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Exists => write!(f, "exists"),
            Check::AttrEquals { key, value } => write!(f, "{key} == {value:?}"),
            Check::AttrAbsent { key } => write!(f, "{key} is absent"),
            Check::Disappears => write!(f, "disappears"),
        }
    }
}

pub struct CheckContext<'a> {
    pub backend: &'a dyn RuleBackend,
    pub state: &'a State,
    pub address: &'a str,
}

/// Runs checks in order, stopping at the first failure.
pub fn run_checks(checks: &[Check], ctx: &CheckContext<'_>) -> Result<usize, HarnessError> {
    for check in checks {
        check.run(ctx)?;
    }
    Ok(checks.len())
}
