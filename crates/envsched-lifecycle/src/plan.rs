//! Plan computation
//!
//! Bring-up follows the fixed role order (database, backend, frontend, then
//! additional services by key); teardown is the exact reverse. Updates are
//! planned by diffing the stored and the new specification container by
//! container.

use envsched_runtime::{LABEL_CONTAINER, LABEL_ENVIRONMENT, LABEL_ROLE};
use envsched_types::{ContainerConfig, EnvironmentId, EnvironmentSpecification, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Label holding the environment's network name, when one is configured.
pub const LABEL_NETWORK: &str = "envsched.network";

/// One container of a plan, with role extras folded into its config
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedContainer {
    pub name: String,
    pub role: Role,
    pub config: ContainerConfig,
}

/// Containers of a specification in bring-up order.
pub fn bring_up_order(spec: &EnvironmentSpecification) -> Vec<PlannedContainer> {
    spec.application_stack
        .members()
        .iter()
        .map(|member| {
            let config = member.effective_container();
            PlannedContainer {
                name: config.name.clone(),
                role: member.role(),
                config,
            }
        })
        .collect()
}

/// Containers of a specification in teardown order.
pub fn teardown_order(spec: &EnvironmentSpecification) -> Vec<PlannedContainer> {
    let mut order = bring_up_order(spec);
    order.reverse();
    order
}

/// Labels put on a runtime container.
///
/// Specification labels come first so the scheduler's own labels win on a
/// key collision.
pub fn container_labels(
    environment_id: &EnvironmentId,
    spec: &EnvironmentSpecification,
    container: &PlannedContainer,
) -> BTreeMap<String, String> {
    let mut labels = spec.labels.clone();
    labels.insert(LABEL_ENVIRONMENT.to_string(), environment_id.to_string());
    labels.insert(LABEL_ROLE.to_string(), container.role.to_string());
    labels.insert(LABEL_CONTAINER.to_string(), container.name.clone());
    if let Some(network) = &spec.network {
        labels.insert(LABEL_NETWORK.to_string(), network.network_name.clone());
    }
    labels
}

/// What an update does to one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerChange {
    /// New in the updated specification
    Added,
    /// Gone from the updated specification
    Removed,
    /// Replaced by a new runtime container
    Recreated,
    /// Labels refreshed on the existing runtime container
    UpdatedInPlace,
    Unchanged,
}

impl fmt::Display for ContainerChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerChange::Added => write!(f, "added"),
            ContainerChange::Removed => write!(f, "removed"),
            ContainerChange::Recreated => write!(f, "recreated"),
            ContainerChange::UpdatedInPlace => write!(f, "updated in place"),
            ContainerChange::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Ordered work of one update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    /// Containers of the new specification in bring-up order
    pub forward: Vec<(PlannedContainer, ContainerChange)>,

    /// Containers to remove, in teardown order of the old specification
    pub removed: Vec<PlannedContainer>,
}

impl UpdatePlan {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self
                .forward
                .iter()
                .all(|(_, change)| *change == ContainerChange::Unchanged)
    }
}

/// Whether the runtime container must be replaced to apply `new`.
fn requires_recreate(old: &PlannedContainer, new: &PlannedContainer) -> bool {
    let (a, b) = (&old.config, &new.config);
    old.role != new.role
        || a.image != b.image
        || a.command != b.command
        || a.args != b.args
        || a.resources != b.resources
        || a.volumes != b.volumes
        || a.ports != b.ports
        || a.environment != b.environment
}

/// Whether only in-place attributes changed.
fn changed_in_place(old: &PlannedContainer, new: &PlannedContainer) -> bool {
    old.config.health_check != new.config.health_check
        || old.config.restart_policy != new.config.restart_policy
}

/// Diff two specifications container by container.
pub fn diff(old: &EnvironmentSpecification, new: &EnvironmentSpecification) -> UpdatePlan {
    let previous: HashMap<String, PlannedContainer> = bring_up_order(old)
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect();
    let labels_changed = old.labels != new.labels || old.network != new.network;

    let forward: Vec<(PlannedContainer, ContainerChange)> = bring_up_order(new)
        .into_iter()
        .map(|container| {
            let change = match previous.get(&container.name) {
                None => ContainerChange::Added,
                Some(prior) if requires_recreate(prior, &container) => ContainerChange::Recreated,
                Some(prior) if labels_changed || changed_in_place(prior, &container) => {
                    ContainerChange::UpdatedInPlace
                }
                Some(_) => ContainerChange::Unchanged,
            };
            (container, change)
        })
        .collect();

    let kept: Vec<&str> = forward.iter().map(|(c, _)| c.name.as_str()).collect();
    let removed = teardown_order(old)
        .into_iter()
        .filter(|c| !kept.contains(&c.name.as_str()))
        .collect();

    UpdatePlan { forward, removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsched_types::*;
    use proptest::prelude::*;

    fn spec() -> EnvironmentSpecification {
        EnvironmentSpecification::new(
            "s1",
            ApplicationStack::new("stack", "1")
                .with_frontend(FrontendConfig::new(ContainerConfig::new("web", "nginx")))
                .with_backend(BackendConfig::new(ContainerConfig::new("api", "node:18")))
                .with_database(DatabaseConfig::new(ContainerConfig::new("db", "postgres:16")))
                .with_service("cache", ContainerConfig::new("redis", "redis:7")),
        )
    }

    fn names(plan: &[PlannedContainer]) -> Vec<&str> {
        plan.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_bring_up_and_teardown_orders() {
        let spec = spec();
        assert_eq!(names(&bring_up_order(&spec)), vec!["db", "api", "web", "redis"]);
        assert_eq!(names(&teardown_order(&spec)), vec!["redis", "web", "api", "db"]);
    }

    #[test]
    fn test_labels_include_scheduler_labels() {
        let spec = spec()
            .with_label("team", "payments")
            .with_label(LABEL_ROLE, "spoofed");
        let id = EnvironmentId::generate();
        let plan = bring_up_order(&spec);

        let labels = container_labels(&id, &spec, &plan[1]);
        assert_eq!(labels["team"], "payments");
        assert_eq!(labels[LABEL_ROLE], "backend");
        assert_eq!(labels[LABEL_CONTAINER], "api");
        assert_eq!(labels[LABEL_ENVIRONMENT], id.to_string());
        assert!(!labels.contains_key(LABEL_NETWORK));
    }

    #[test]
    fn test_label_only_change_is_in_place() {
        let old = spec();
        let new = spec().with_label("tier", "gold");
        let plan = diff(&old, &new);

        assert!(plan.removed.is_empty());
        assert!(plan
            .forward
            .iter()
            .all(|(_, change)| *change == ContainerChange::UpdatedInPlace));
    }

    #[test]
    fn test_image_change_recreates_only_that_container() {
        let old = spec();
        let mut new = spec();
        if let Some(backend) = new.application_stack.backend.as_mut() {
            backend.container.image = "node:20".to_string();
        }
        let plan = diff(&old, &new);

        let changes: Vec<(&str, ContainerChange)> = plan
            .forward
            .iter()
            .map(|(c, change)| (c.name.as_str(), *change))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("db", ContainerChange::Unchanged),
                ("api", ContainerChange::Recreated),
                ("web", ContainerChange::Unchanged),
                ("redis", ContainerChange::Unchanged),
            ]
        );
    }

    #[test]
    fn test_added_and_removed_containers() {
        let old = spec();
        let mut new = spec();
        new.application_stack.additional_services.clear();
        new.application_stack
            .additional_services
            .insert("mail".to_string(), ContainerConfig::new("mailhog", "mailhog"));
        let plan = diff(&old, &new);

        assert_eq!(names(&plan.removed), vec!["redis"]);
        assert_eq!(
            plan.forward.last().map(|(c, ch)| (c.name.as_str(), *ch)),
            Some(("mailhog", ContainerChange::Added))
        );
    }

    #[test]
    fn test_health_check_change_is_in_place() {
        let old = spec();
        let mut new = spec();
        if let Some(db) = new.application_stack.database.as_mut() {
            db.container.health_check = Some(HealthCheck {
                command: vec!["pg_isready".into()],
                interval_seconds: 5,
                timeout_seconds: 2,
                retries: 3,
                start_period_seconds: 0,
            });
        }
        let plan = diff(&old, &new);
        assert_eq!(plan.forward[0].1, ContainerChange::UpdatedInPlace);
        assert_eq!(plan.forward[1].1, ContainerChange::Unchanged);
    }

    #[test]
    fn test_identical_specs_are_noop() {
        assert!(diff(&spec(), &spec()).is_noop());
    }

    proptest! {
        #[test]
        fn prop_teardown_is_reverse_of_bring_up(
            keys in proptest::collection::btree_set("[a-z]{1,6}", 0..6),
            with_db in any::<bool>(),
            with_backend in any::<bool>(),
        ) {
            let mut stack = ApplicationStack::new("stack", "1");
            if with_db {
                stack = stack.with_database(DatabaseConfig::new(ContainerConfig::new("db", "x")));
            }
            if with_backend {
                stack = stack.with_backend(BackendConfig::new(ContainerConfig::new("api", "x")));
            }
            for key in &keys {
                stack = stack
                    .with_service(key.clone(), ContainerConfig::new(format!("svc-{}", key), "x"));
            }
            let spec = EnvironmentSpecification::new("p", stack);

            let up = bring_up_order(&spec);
            let mut down = teardown_order(&spec);
            down.reverse();
            prop_assert_eq!(&up, &down);

            // Roles never go backwards in bring-up order
            for pair in up.windows(2) {
                prop_assert!(pair[0].role <= pair[1].role);
            }
        }
    }
}
