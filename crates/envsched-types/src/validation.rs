//! Specification validation
//!
//! Validation runs before any runtime call and collects every violation
//! instead of stopping at the first one.

use crate::spec::{ContainerConfig, EnvironmentSpecification, HealthCheck};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Maximum length of environment and container names.
pub const MAX_NAME_LEN: usize = 128;

/// A single validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All problems found in a specification
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid specification: {}", format_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                issues: self.issues,
            })
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl EnvironmentSpecification {
    /// Validate the specification.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Collector::default();

        if !is_valid_name(&self.name) {
            issues.push(
                "name",
                "must be 1-128 characters of [A-Za-z0-9._-] starting with an alphanumeric",
            );
        }

        let stack = &self.application_stack;
        if stack.is_empty() {
            issues.push(
                "application_stack",
                "must define at least one role or additional service",
            );
        }

        for key in stack.additional_services.keys() {
            if key.trim().is_empty() {
                issues.push("application_stack.additional_services", "service key is empty");
            }
        }

        if let Some(db) = &stack.database {
            if db.persistent_storage
                && db.storage_path.as_deref().map_or(true, |p| p.trim().is_empty())
            {
                issues.push(
                    "application_stack.database.storage_path",
                    "required when persistent_storage is enabled",
                );
            }
        }

        let mut names: HashMap<&str, String> = HashMap::new();
        let mut host_ports: HashSet<(u16, crate::spec::Protocol)> = HashSet::new();

        for member in stack.members() {
            let container = member.container();
            let path = format!("application_stack.{}", member.role());

            validate_container(container, &path, &mut issues);

            if let Some(previous) = names.insert(container.name.as_str(), path.clone()) {
                issues.push(
                    format!("{}.container.name", path),
                    format!(
                        "container name '{}' is already used by {}",
                        container.name, previous
                    ),
                );
            }

            for port in &container.ports {
                if port.host_port != 0 && !host_ports.insert((port.host_port, port.protocol)) {
                    issues.push(
                        format!("{}.container.ports", path),
                        format!("host port {} is published more than once", port.host_port),
                    );
                }
            }
        }

        issues.finish()
    }
}

fn validate_container(container: &ContainerConfig, path: &str, issues: &mut Collector) {
    if !is_valid_name(&container.name) {
        issues.push(
            format!("{}.container.name", path),
            "must be 1-128 characters of [A-Za-z0-9._-] starting with an alphanumeric",
        );
    }

    if container.image.trim().is_empty() {
        issues.push(format!("{}.container.image", path), "must not be empty");
    }

    for port in &container.ports {
        if port.container_port == 0 {
            issues.push(
                format!("{}.container.ports", path),
                "container_port must be greater than zero",
            );
        }
    }

    for volume in &container.volumes {
        if volume.name.trim().is_empty() || !volume.mount_path.starts_with('/') {
            issues.push(
                format!("{}.container.volumes", path),
                format!(
                    "volume '{}' needs a name and an absolute mount path",
                    volume.name
                ),
            );
        }
    }

    let cpu = container.resources.cpu_cores;
    if !cpu.is_finite() || cpu < 0.0 {
        issues.push(
            format!("{}.container.resources.cpu_cores", path),
            "must be a finite, non-negative number",
        );
    }

    if let Some(check) = &container.health_check {
        validate_health_check(check, &format!("{}.container.health_check", path), issues);
    }
}

fn validate_health_check(check: &HealthCheck, path: &str, issues: &mut Collector) {
    if check.command.is_empty() {
        issues.push(format!("{}.command", path), "must not be empty");
    }
    if check.retries == 0 {
        issues.push(format!("{}.retries", path), "must be at least 1");
    }
    if check.interval_seconds == 0 {
        issues.push(format!("{}.interval_seconds", path), "must be at least 1");
    }
    if check.timeout_seconds == 0 {
        issues.push(format!("{}.timeout_seconds", path), "must be at least 1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::*;
    use proptest::prelude::*;

    fn backend_only(name: &str) -> EnvironmentSpecification {
        EnvironmentSpecification::new(
            name,
            ApplicationStack::new("stack", "1.0.0").with_backend(BackendConfig::new(
                ContainerConfig::new("b", "x").with_resources(ResourceLimits::memory(512)),
            )),
        )
    }

    #[test]
    fn test_minimal_spec_is_valid() {
        assert!(backend_only("s1").validate().is_ok());
    }

    #[test]
    fn test_empty_stack_is_rejected() {
        let spec = EnvironmentSpecification::new("s1", ApplicationStack::new("stack", "1"));
        let err = spec.validate().unwrap_err();
        assert!(err.has_field("application_stack"));
    }

    #[test]
    fn test_duplicate_container_names_are_rejected() {
        let stack = ApplicationStack::new("stack", "1")
            .with_backend(BackendConfig::new(ContainerConfig::new("app", "x")))
            .with_service("worker", ContainerConfig::new("app", "y"));
        let err = EnvironmentSpecification::new("s1", stack)
            .validate()
            .unwrap_err();

        assert_eq!(err.issues.len(), 1);
        assert!(err.issues[0].message.contains("already used"));
    }

    #[test]
    fn test_all_issues_are_collected() {
        let mut container = ContainerConfig::new("", "");
        container.health_check = Some(HealthCheck {
            command: vec![],
            interval_seconds: 0,
            timeout_seconds: 1,
            retries: 0,
            start_period_seconds: 0,
        });
        let spec = EnvironmentSpecification::new(
            "bad name!",
            ApplicationStack::new("stack", "1").with_frontend(FrontendConfig::new(container)),
        );

        let err = spec.validate().unwrap_err();
        assert!(err.has_field("name"));
        assert!(err.has_field("application_stack.frontend.container.name"));
        assert!(err.has_field("application_stack.frontend.container.image"));
        assert!(err.has_field("application_stack.frontend.container.health_check.retries"));
        assert!(err.issues.len() >= 6);
    }

    #[test]
    fn test_duplicate_host_ports_are_rejected() {
        let stack = ApplicationStack::new("stack", "1")
            .with_backend(BackendConfig::new(
                ContainerConfig::new("api", "x").with_port(3000, 8080),
            ))
            .with_frontend(FrontendConfig::new(
                ContainerConfig::new("web", "y").with_port(80, 8080),
            ));
        let err = EnvironmentSpecification::new("s1", stack)
            .validate()
            .unwrap_err();
        assert!(err.issues[0].message.contains("8080"));
    }

    #[test]
    fn test_persistent_database_requires_path() {
        let mut db = DatabaseConfig::new(ContainerConfig::new("db", "postgres"));
        db.persistent_storage = true;
        let spec = EnvironmentSpecification::new(
            "s1",
            ApplicationStack::new("stack", "1").with_database(db),
        );
        let err = spec.validate().unwrap_err();
        assert!(err.has_field("application_stack.database.storage_path"));
    }

    proptest! {
        #[test]
        fn prop_distinct_service_names_validate(count in 1usize..8) {
            let mut stack = ApplicationStack::new("stack", "1");
            for i in 0..count {
                stack = stack.with_service(
                    format!("svc{}", i),
                    ContainerConfig::new(format!("container{}", i), "busybox"),
                );
            }
            let spec = EnvironmentSpecification::new("props", stack);
            prop_assert!(spec.validate().is_ok());
            prop_assert_eq!(spec.application_stack.members().len(), count);
        }

        #[test]
        fn prop_names_with_spaces_are_rejected(name in "[a-z]{1,8} [a-z]{1,8}") {
            let spec = backend_only(&name);
            prop_assert!(spec.validate().unwrap_err().has_field("name"));
        }
    }
}
