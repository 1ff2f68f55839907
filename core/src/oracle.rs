use crate::backend::RuleBackend;
use crate::error::HarnessError;
use crate::model::{RemoteRule, RESOURCE_TYPE};
use crate::state::State;
use tracing::{debug, warn};

/// Looks the resource at `address` up remotely by its id.
pub fn check_exists(
    backend: &dyn RuleBackend,
    state: &State,
    address: &str,
) -> Result<RemoteRule, HarnessError> {
    let resource = state
        .get(address)
        .ok_or_else(|| HarnessError::NotInState(address.to_string()))?;
    if resource.id.is_empty() {
        return Err(HarnessError::MissingId(address.to_string()));
    }

    let rule = backend.find_by_arn(&resource.id)?;
    debug!(address, arn = %rule.arn, "automation rule exists");
    Ok(rule)
}

/// Passes only when every automation rule in `state` is reported absent.
pub fn check_destroyed(backend: &dyn RuleBackend, state: &State) -> Result<(), HarnessError> {
    for (address, resource) in &state.resources {
        if resource.type_name != RESOURCE_TYPE {
            continue;
        }

        match backend.find_by_arn(&resource.id) {
            Err(err) if err.is_not_found() => {
                debug!(address = %address, arn = %resource.id, "automation rule destroyed");
                continue;
            }
            Err(err) => return Err(err.into()),
            Ok(_) => {
                warn!(address = %address, arn = %resource.id, "automation rule still exists");
                return Err(HarnessError::StillExists(resource.id.clone()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, InMemoryBackend, Operation};
    use crate::config::{resource_address, RuleConfigBuilder};
    use crate::model::{FindingFieldsUpdate, StringComparison, StringField};
    use crate::settings::HarnessConfig;
    use crate::state::{flatten_rule, ResourceState};

    fn setup() -> (InMemoryBackend, State, String) {
        let backend = InMemoryBackend::new(&HarnessConfig::default());
        let config = RuleConfigBuilder::new("oracle")
            .description("test description")
            .finding_fields_update(FindingFieldsUpdate {
                types: vec!["Effects".to_string()],
                ..FindingFieldsUpdate::default()
            })
            .string_filter(StringField::Title, StringComparison::Contains, "x")
            .build()
            .expect("valid rule");
        let rule = backend.create(&config).expect("create");

        let address = resource_address("test");
        let mut state = State::default();
        state.insert(
            address.clone(),
            ResourceState {
                type_name: RESOURCE_TYPE.to_string(),
                id: rule.arn.clone(),
                attributes: flatten_rule(&rule),
            },
        );
        (backend, state, address)
    }

    #[test]
    fn exists_finds_applied_rule() {
        let (backend, state, address) = setup();
        let rule = check_exists(&backend, &state, &address).expect("exists");
        assert_eq!(rule.config.rule_name, "oracle");
    }

    #[test]
    fn exists_requires_address_in_state() {
        let (backend, state, _) = setup();
        let err = check_exists(&backend, &state, "aws_securityhub_automation_rule.other")
            .expect_err("missing address");
        assert!(matches!(err, HarnessError::NotInState(_)));
    }

    #[test]
    fn destroyed_distinguishes_absent_from_api_errors() {
        let (backend, state, _) = setup();
        let err = check_destroyed(&backend, &state).expect_err("still present");
        assert!(matches!(err, HarnessError::StillExists(_)));

        for arn in backend.arns() {
            backend.delete(&arn).expect("delete");
        }
        backend.inject_failure(
            Operation::Read,
            BackendError::api("InternalException", "boom"),
        );
        let err = check_destroyed(&backend, &state).expect_err("transient failure");
        assert_eq!(err.api_code(), Some("InternalException"));

        check_destroyed(&backend, &state).expect("destroyed");
    }
}
