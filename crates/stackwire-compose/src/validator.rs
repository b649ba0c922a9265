//! Static checks on stack declarations.
//!
//! [`validate`] rejects structurally broken stacks before graphs are built.
//! [`audit`] never fails: it reports risky declarations as [`Finding`]s and
//! logs each one as a warning.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use stackwire_common::error::{Result, StackwireError};

use crate::model::{StackUnit, Value};

const SECRET_MARKERS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "apikey",
    "api_key",
    "credential",
];

const PERMISSION_LISTS: [&str; 2] = ["resources", "actions"];

/// Validates a single stack for structural correctness.
///
/// # Checks performed
///
/// 1. The stack name is not empty.
/// 2. No duplicate resource ids, and none is empty.
/// 3. No duplicate output names.
/// 4. No export name is published twice by the stack.
/// 5. Every parameter with an `allowedPattern` has an effective value that
///    matches it in full.
///
/// # Errors
///
/// Returns [`StackwireError::Config`] for the first failed check.
pub fn validate(stack: &StackUnit) -> Result<()> {
    tracing::debug!(stack = %stack.name, "validating stack");
    if stack.name.trim().is_empty() {
        return Err(config_err("stack name must not be empty".into()));
    }
    check_resource_ids(stack)?;
    check_outputs(stack)?;
    check_parameters(stack)?;
    Ok(())
}

/// Validates every stack of a batch, plus batch-wide name uniqueness.
///
/// # Errors
///
/// Returns [`StackwireError::Config`] for the first failed check.
pub fn validate_batch(stacks: &[StackUnit]) -> Result<()> {
    let mut seen = HashSet::new();
    for stack in stacks {
        validate(stack)?;
        if !seen.insert(stack.name.as_str()) {
            return Err(config_err(format!("duplicate stack name: \"{}\"", stack.name)));
        }
    }
    Ok(())
}

fn check_resource_ids(stack: &StackUnit) -> Result<()> {
    let mut seen = HashSet::new();
    for resource in &stack.resources {
        if resource.id.trim().is_empty() {
            return Err(config_err(format!(
                "stack \"{}\" declares a resource with an empty id",
                stack.name
            )));
        }
        if !seen.insert(resource.id.as_str()) {
            return Err(config_err(format!(
                "duplicate resource id \"{}\" in stack \"{}\"",
                resource.id, stack.name
            )));
        }
    }
    Ok(())
}

fn check_outputs(stack: &StackUnit) -> Result<()> {
    let mut names = HashSet::new();
    let mut exports = HashSet::new();
    for output in &stack.outputs {
        if !names.insert(output.name.as_str()) {
            return Err(config_err(format!(
                "duplicate output \"{}\" in stack \"{}\"",
                output.name, stack.name
            )));
        }
        if let Some(export_name) = output.export_name.as_deref() {
            if !exports.insert(export_name) {
                return Err(config_err(format!(
                    "export \"{export_name}\" is published twice by stack \"{}\"",
                    stack.name
                )));
            }
        }
    }
    Ok(())
}

fn check_parameters(stack: &StackUnit) -> Result<()> {
    for (name, parameter) in &stack.parameters {
        let Some(pattern) = parameter.allowed_pattern.as_deref() else {
            continue;
        };
        let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            config_err(format!(
                "parameter \"{name}\" in stack \"{}\" has an invalid pattern: {e}",
                stack.name
            ))
        })?;
        let value = parameter.effective().unwrap_or_default();
        if !re.is_match(value) {
            let reason = parameter
                .constraint_description
                .clone()
                .unwrap_or_else(|| format!("must match {pattern}"));
            return Err(config_err(format!(
                "parameter \"{name}\" in stack \"{}\" rejects \"{value}\": {reason}",
                stack.name
            )));
        }
    }
    Ok(())
}

fn config_err(message: String) -> StackwireError {
    StackwireError::Config { message }
}

/// Category of a security finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FindingKind {
    /// A literal value stored under a secret-looking key.
    PlaintextSecret,
    /// A `*` inside an IAM `resources` or `actions` list.
    WildcardPermission,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaintextSecret => write!(f, "plaintext secret"),
            Self::WildcardPermission => write!(f, "wildcard permission"),
        }
    }
}

/// A risky declaration reported by [`audit`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Finding {
    /// Logical id of the resource holding the value.
    pub resource: String,
    /// Dotted property path, with list positions in brackets.
    pub path: String,
    /// What was found.
    pub kind: FindingKind,
}

/// Scans every resource of a stack for plaintext secrets and wildcard
/// permissions. Findings are returned in declaration order.
pub fn audit(stack: &StackUnit) -> Vec<Finding> {
    let mut findings = Vec::new();
    for resource in &stack.resources {
        for (key, value) in &resource.properties {
            scan(&resource.id, key, key, value, &mut findings);
        }
    }
    for finding in &findings {
        tracing::warn!(
            stack = %stack.name,
            resource = %finding.resource,
            path = %finding.path,
            kind = %finding.kind,
            "security finding"
        );
    }
    findings
}

fn scan(resource: &str, key: &str, path: &str, value: &Value, out: &mut Vec<Finding>) {
    match value {
        Value::Literal(serde_json::Value::String(text)) => {
            if is_secret_key(key) && !text.is_empty() {
                out.push(finding(resource, path, FindingKind::PlaintextSecret));
            }
        }
        Value::Literal(_) | Value::Ref(_) => {}
        Value::Join(parts) => {
            let literal_only = parts.iter().all(|p| matches!(p, Value::Literal(_)));
            if is_secret_key(key) && literal_only && !parts.is_empty() {
                out.push(finding(resource, path, FindingKind::PlaintextSecret));
            }
        }
        Value::List(items) => {
            let permission_list = PERMISSION_LISTS.contains(&key.to_ascii_lowercase().as_str());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if permission_list && is_wildcard(item) {
                    out.push(finding(resource, &item_path, FindingKind::WildcardPermission));
                }
                scan(resource, key, &item_path, item, out);
            }
        }
        Value::Map(entries) => {
            for (child, item) in entries {
                scan(resource, child, &format!("{path}.{child}"), item, out);
            }
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

fn is_wildcard(value: &Value) -> bool {
    matches!(value, Value::Literal(serde_json::Value::String(s)) if s == "*")
}

fn finding(resource: &str, path: &str, kind: FindingKind) -> Finding {
    Finding {
        resource: resource.to_string(),
        path: path.to_string(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use stackwire_common::types::ResourceKind;

    use super::*;
    use crate::model::{OutputDeclaration, ResourceDeclaration};

    fn output(name: &str, export: Option<&str>) -> OutputDeclaration {
        OutputDeclaration {
            name: name.into(),
            value: Value::attr("Vpc", "vpcId"),
            export_name: export.map(Into::into),
            description: None,
        }
    }

    #[test]
    fn valid_stack_passes() {
        let mut stack = StackUnit::new("config-stack");
        stack.resources.push(ResourceDeclaration::new("Vpc", ResourceKind::Network));
        stack.outputs.push(output("vpcId", Some("configVpc")));
        assert!(validate(&stack).is_ok());
    }

    #[test]
    fn empty_stack_name_is_rejected() {
        assert!(validate(&StackUnit::new("  ")).is_err());
    }

    #[test]
    fn duplicate_resource_ids_are_rejected() {
        let mut stack = StackUnit::new("config-stack");
        stack.resources.push(ResourceDeclaration::new("Vpc", ResourceKind::Network));
        stack.resources.push(ResourceDeclaration::new("Vpc", ResourceKind::Subnet));
        let err = validate(&stack).unwrap_err();
        assert!(err.to_string().contains("duplicate resource id"), "got: {err}");
    }

    #[test]
    fn duplicate_outputs_and_exports_are_rejected() {
        let mut stack = StackUnit::new("config-stack");
        stack.outputs.push(output("a", None));
        stack.outputs.push(output("a", None));
        assert!(validate(&stack).is_err());

        let mut stack = StackUnit::new("config-stack");
        stack.outputs.push(output("a", Some("shared")));
        stack.outputs.push(output("b", Some("shared")));
        let err = validate(&stack).unwrap_err();
        assert!(err.to_string().contains("published twice"), "got: {err}");
    }

    fn bucket_parameter(value: Option<&str>) -> StackUnit {
        let mut stack = StackUnit::new("config-stack");
        let _ = stack.parameters.insert(
            "BucketNameConfiguracion".into(),
            crate::model::StackParameter {
                default: Some("BucketConfiguracion".into()),
                value: value.map(Into::into),
                allowed_pattern: Some(".*[^0-9]".into()),
                constraint_description: Some("Debe de ser caracteres no numericos".into()),
                ..Default::default()
            },
        );
        stack
    }

    #[test]
    fn parameter_values_are_checked_against_their_pattern() {
        assert!(validate(&bucket_parameter(None)).is_ok());
        assert!(validate(&bucket_parameter(Some("BucketConfiguracionQa"))).is_ok());

        let err = validate(&bucket_parameter(Some("Bucket2024"))).unwrap_err();
        assert!(err.to_string().contains("no numericos"), "got: {err}");
    }

    #[test]
    fn invalid_parameter_pattern_is_rejected() {
        let mut stack = bucket_parameter(None);
        if let Some(parameter) = stack.parameters.get_mut("BucketNameConfiguracion") {
            parameter.allowed_pattern = Some("(".into());
        }
        let err = validate(&stack).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"), "got: {err}");
    }

    #[test]
    fn duplicate_stack_names_in_batch_are_rejected() {
        let stacks = vec![StackUnit::new("a"), StackUnit::new("a")];
        let err = validate_batch(&stacks).unwrap_err();
        assert!(err.to_string().contains("duplicate stack name"), "got: {err}");
    }

    #[test]
    fn plaintext_password_in_environment_is_flagged() {
        let mut stack = StackUnit::new("config-stack");
        stack.resources.push(
            ResourceDeclaration::new("Function", ResourceKind::Function).with_property(
                "environment",
                Value::map([("PASSWORD", Value::from("hunter2")), ("STAGE", Value::from("dev"))]),
            ),
        );
        let findings = audit(&stack);
        assert_eq!(
            findings,
            vec![Finding {
                resource: "Function".into(),
                path: "environment.PASSWORD".into(),
                kind: FindingKind::PlaintextSecret,
            }]
        );
    }

    #[test]
    fn secret_backed_by_reference_is_not_flagged() {
        let mut stack = StackUnit::new("config-stack");
        stack.resources.push(
            ResourceDeclaration::new("Function", ResourceKind::Function).with_property(
                "environment",
                Value::map([("PASSWORD_PARAMETER", Value::attr("DbPassword", "parameterName"))]),
            ),
        );
        assert!(audit(&stack).is_empty());
    }

    #[test]
    fn wildcard_resources_are_flagged_with_their_position() {
        let mut stack = StackUnit::new("config-stack");
        let statement = Value::map([
            ("actions", Value::list(["s3:GetObject"])),
            ("resources", Value::list(["arn:aws:s3:::bucket", "*"])),
        ]);
        stack.resources.push(
            ResourceDeclaration::new("Role", ResourceKind::Role)
                .with_property("inlinePolicy", Value::list([statement])),
        );
        let findings = audit(&stack);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path, "inlinePolicy[0].resources[1]");
        assert_eq!(findings[0].kind, FindingKind::WildcardPermission);
    }
}
