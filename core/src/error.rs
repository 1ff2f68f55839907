use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::state::AttributeDiff;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HarnessError {
    #[error("resource {0} not found in state")]
    NotInState(String),
    #[error("resource {0} has no id set")]
    MissingId(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("automation rule {0} still exists")]
    StillExists(String),
    #[error("{address}: attribute '{key}' expected {expected:?}, got {actual:?}")]
    AttributeMismatch {
        address: String,
        key: String,
        expected: String,
        actual: Option<String>,
    },
    #[error("{address}: attribute '{key}' expected to be absent, got {actual:?}")]
    AttributeUnexpected {
        address: String,
        key: String,
        actual: String,
    },
    #[error("{address}: imported state differs from applied state: {}", join_diffs(.differences))]
    ImportMismatch {
        address: String,
        differences: Vec<AttributeDiff>,
    },
    #[error("after applying this step, the plan was not empty: {}", .changes.join(", "))]
    UnexpectedPlan { changes: Vec<String> },
    #[error("expected a non-empty plan, but got an empty plan")]
    ExpectedNonEmptyPlan,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// The API error code behind this failure, if it came from the backend.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            HarnessError::Backend(err) => err.code(),
            _ => None,
        }
    }
}

fn join_diffs(differences: &[AttributeDiff]) -> String {
    differences
        .iter()
        .map(|diff| diff.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
