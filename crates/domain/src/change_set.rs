use std::collections::BTreeSet;

use azrbac_core::{AppError, AppResult};
use serde_json::Value;

use crate::policy_config::PolicyConfig;

/// Identity fields of a policy configuration; never treated as changes.
const IDENTITY_FIELDS: [&str; 2] = ["scope", "role_definition_id"];

/// Explicit set of dotted configuration paths that changed, such as
/// `active_assignment_rules.expire_after.days`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: BTreeSet<String>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the set with `path` recorded.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.mark(path);
        self
    }

    /// Records `path` as changed.
    pub fn mark(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    /// Returns true when a recorded path equals `path` or either one is a
    /// prefix of the other on a `.` boundary.
    #[must_use]
    pub fn touches(&self, path: &str) -> bool {
        self.paths
            .iter()
            .any(|recorded| is_path_prefix(recorded, path) || is_path_prefix(path, recorded))
    }

    /// Returns true when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterates recorded paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Records every leaf `desired` sets to a value different from `prior`.
    ///
    /// Leaves absent from `desired` are not recorded, because absent leaves
    /// keep the remote value. A zero count matches an absent prior leaf.
    pub fn between(prior: &PolicyConfig, desired: &PolicyConfig) -> AppResult<Self> {
        let prior = to_json(prior)?;
        let desired = to_json(desired)?;
        let mut changes = Self::new();
        collect_changes("", Some(&prior), &desired, &mut changes);
        Ok(changes)
    }

    /// Records every leaf the configuration sets, except zero counts.
    pub fn for_config(config: &PolicyConfig) -> AppResult<Self> {
        let desired = to_json(config)?;
        let mut changes = Self::new();
        collect_changes("", None, &desired, &mut changes);
        Ok(changes)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}

fn is_path_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

fn to_json(config: &PolicyConfig) -> AppResult<Value> {
    serde_json::to_value(config).map_err(|error| {
        AppError::Internal(format!("failed to encode policy configuration: {error}"))
    })
}

fn collect_changes(prefix: &str, prior: Option<&Value>, desired: &Value, changes: &mut ChangeSet) {
    match desired {
        Value::Null => {}
        Value::Object(fields) => {
            for (key, value) in fields {
                if prefix.is_empty() && IDENTITY_FIELDS.contains(&key.as_str()) {
                    continue;
                }

                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_changes(
                    path.as_str(),
                    prior.and_then(|prior| prior.get(key)),
                    value,
                    changes,
                );
            }
        }
        leaf => {
            let unchanged = match prior {
                // Zero counts read back as absent.
                None | Some(Value::Null) => leaf.as_u64() == Some(0),
                Some(prior) => prior == leaf,
            };
            if !unchanged {
                changes.mark(prefix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy_config::{ActiveAssignmentRules, ExpireAfter};

    fn config() -> PolicyConfig {
        PolicyConfig {
            scope: "/subscriptions/s".to_owned(),
            role_definition_id: "/subscriptions/s/providers/Microsoft.Authorization/roleDefinitions/r".to_owned(),
            ..PolicyConfig::default()
        }
    }

    #[test]
    fn touches_matches_on_dot_boundaries() {
        let changes = ChangeSet::new().with("active_assignment_rules.expire_after.days");

        assert!(changes.touches("active_assignment_rules.expire_after.days"));
        assert!(changes.touches("active_assignment_rules.expire_after"));
        assert!(changes.touches("active_assignment_rules"));
        assert!(!changes.touches("active_assignment_rules.expire"));
        assert!(!changes.touches("eligible_assignment_rules"));

        let broad = ChangeSet::new().with("notification_rules");
        assert!(broad.touches("notification_rules.eligible_activations.admin_notifications"));
    }

    #[test]
    fn between_records_only_desired_leaves_that_differ() {
        let mut prior = config();
        prior.active_assignment_rules = Some(ActiveAssignmentRules {
            allow_permanent: Some(false),
            expire_after: Some(ExpireAfter {
                days: Some(15),
                hours: None,
            }),
            require_justification: Some(true),
            ..ActiveAssignmentRules::default()
        });

        let mut desired = config();
        desired.active_assignment_rules = Some(ActiveAssignmentRules {
            allow_permanent: Some(false),
            expire_after: Some(ExpireAfter {
                days: Some(30),
                hours: None,
            }),
            ..ActiveAssignmentRules::default()
        });

        let changes = ChangeSet::between(&prior, &desired).unwrap_or_default();
        assert_eq!(
            changes.paths().collect::<Vec<_>>(),
            vec!["active_assignment_rules.expire_after.days"]
        );
    }

    #[test]
    fn for_config_records_every_present_leaf() {
        let mut desired = config();
        desired.active_assignment_rules = Some(ActiveAssignmentRules {
            allow_permanent: Some(true),
            require_multifactor_authentication: Some(false),
            ..ActiveAssignmentRules::default()
        });

        let changes = ChangeSet::for_config(&desired).unwrap_or_default();
        assert_eq!(
            changes.paths().collect::<Vec<_>>(),
            vec![
                "active_assignment_rules.allow_permanent",
                "active_assignment_rules.require_multifactor_authentication",
            ]
        );
    }

    #[test]
    fn zero_hours_match_absent_hours_but_not_set_hours() {
        let expiring = |days, hours| {
            let mut value = config();
            value.active_assignment_rules = Some(ActiveAssignmentRules {
                expire_after: Some(ExpireAfter { days, hours }),
                ..ActiveAssignmentRules::default()
            });
            value
        };

        let read_back = expiring(Some(30), None);
        let desired = expiring(Some(30), Some(0));
        assert!(ChangeSet::between(&read_back, &desired)
            .unwrap_or_default()
            .is_empty());

        let with_hours = expiring(Some(30), Some(4));
        assert_eq!(
            ChangeSet::between(&with_hours, &desired)
                .unwrap_or_default()
                .paths()
                .collect::<Vec<_>>(),
            vec!["active_assignment_rules.expire_after.hours"]
        );
    }

    #[test]
    fn identical_configs_produce_no_changes() {
        let changes = ChangeSet::between(&config(), &config()).unwrap_or_default();
        assert!(changes.is_empty());
    }
}
