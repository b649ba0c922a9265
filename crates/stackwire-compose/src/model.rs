//! Declaration model for stacks and resources.
//!
//! Property values are tagged variants: a literal, a reference, or a
//! structure containing them. Nothing is interpolated at construction time;
//! [`crate::resolver`] turns values into concrete JSON in a single pass.
//!
//! The YAML surface accepts plain scalars, lists, and maps, plus these forms:
//!
//! ```yaml
//! vpcId: { ref: Vpc.vpcId }               # attribute of a local resource
//! project: { import: projectAzul }        # export of another stack
//! bucket: { param: BucketNameConfiguracion }
//! name: { join: [{ import: projectAzul }, "-VPC"] }
//! roleName: { sub: "${import:projectAzul}-${import:environmentAzul}-role" }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use stackwire_common::types::{RemovalPolicy, ResourceKind};

/// A reference to a value produced elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reference {
    /// An output attribute of another resource in the same stack.
    Attribute {
        /// Logical id of the target resource.
        resource: String,
        /// Attribute produced by the provider.
        attribute: String,
    },
    /// A value exported by another stack.
    Import {
        /// Export name in the parameter registry.
        export_name: String,
    },
    /// A stack parameter.
    Parameter {
        /// Parameter name.
        name: String,
    },
}

impl Reference {
    /// Reference to a local resource attribute.
    #[must_use]
    pub fn attribute(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attribute {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Reference to a cross-stack export.
    #[must_use]
    pub fn import(export_name: impl Into<String>) -> Self {
        Self::Import {
            export_name: export_name.into(),
        }
    }

    /// Reference to a stack parameter.
    #[must_use]
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter { name: name.into() }
    }

    /// Parses the `resource.attribute` shorthand.
    fn parse_attribute(target: &str) -> Option<Self> {
        let (resource, attribute) = target.split_once('.')?;
        if resource.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Self::attribute(resource, attribute))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute {
                resource,
                attribute,
            } => write!(f, "{resource}.{attribute}"),
            Self::Import { export_name } => write!(f, "import:{export_name}"),
            Self::Parameter { name } => write!(f, "param:{name}"),
        }
    }
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawValue")]
pub enum Value {
    /// A scalar literal (string, number, or boolean).
    Literal(serde_json::Value),
    /// A reference resolved at apply time.
    Ref(Reference),
    /// String interpolation of the parts, in order.
    Join(Vec<Value>),
    /// A list of values.
    List(Vec<Value>),
    /// A map of values, ordered by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// A literal scalar.
    #[must_use]
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// An attribute of a local resource.
    #[must_use]
    pub fn attr(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Ref(Reference::attribute(resource, attribute))
    }

    /// A cross-stack import.
    #[must_use]
    pub fn import(export_name: impl Into<String>) -> Self {
        Self::Ref(Reference::import(export_name))
    }

    /// A stack parameter.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::Ref(Reference::parameter(name))
    }

    /// Interpolates the parts into one string.
    #[must_use]
    pub fn join<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Self>,
    {
        Self::Join(parts.into_iter().map(Into::into).collect())
    }

    /// A list of values.
    #[must_use]
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Self>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// A map of values.
    #[must_use]
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Appends every reference contained in this value, depth first.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => out.push(reference),
            Self::Join(items) | Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for item in entries.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// Returns the references contained in this value.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Literal(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Literal(serde_json::Value::String(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<Reference> for Value {
    fn from(value: Reference) -> Self {
        Self::Ref(value)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RefForm {
    #[serde(rename = "ref")]
    target: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportForm {
    import: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamForm {
    param: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JoinForm {
    join: Vec<RawValue>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SubForm {
    sub: String,
}

/// YAML surface syntax, converted into [`Value`].
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Ref(RefForm),
    Import(ImportForm),
    Param(ParamForm),
    Join(JoinForm),
    Sub(SubForm),
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
}

impl TryFrom<RawValue> for Value {
    type Error = String;

    fn try_from(raw: RawValue) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawValue::Ref(form) => Self::Ref(
                Reference::parse_attribute(&form.target)
                    .ok_or_else(|| format!("ref \"{}\" must be <resource>.<attribute>", form.target))?,
            ),
            RawValue::Import(form) => Self::import(form.import),
            RawValue::Param(form) => Self::param(form.param),
            RawValue::Join(form) => Self::Join(
                form.join
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            RawValue::Sub(form) => {
                crate::template::parse_sub(&form.sub).map_err(|e| e.to_string())?
            }
            RawValue::Bool(b) => Self::Literal(serde_json::Value::Bool(b)),
            RawValue::Number(n) => Self::Literal(serde_json::Value::Number(n)),
            RawValue::Text(s) => Self::Literal(serde_json::Value::String(s)),
            RawValue::List(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            RawValue::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// A single resource inside a stack.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDeclaration {
    /// Logical id, unique within the stack.
    pub id: String,
    /// Resource kind, selecting the provider.
    pub kind: ResourceKind,
    /// Declared properties.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Removal policy. Unset policies receive the composer default.
    #[serde(default)]
    pub removal_policy: Option<RemovalPolicy>,
    /// Explicit local dependencies beyond those implied by references.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceDeclaration {
    /// Creates a declaration without properties.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: BTreeMap::new(),
            removal_policy: None,
            depends_on: Vec::new(),
        }
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.properties.insert(name.into(), value.into());
        self
    }

    /// Sets the removal policy.
    #[must_use]
    pub const fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    /// Returns every reference in property-name order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Effective removal policy, defaulting to [`RemovalPolicy::Destroy`].
    #[must_use]
    pub fn removal_policy(&self) -> RemovalPolicy {
        self.removal_policy.unwrap_or_default()
    }
}

/// A named value a stack publishes once applied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDeclaration {
    /// Entry name, unique within the stack.
    pub name: String,
    /// Value, usually a reference to a resource attribute.
    pub value: Value,
    /// Cross-stack export name.
    #[serde(default, rename = "export")]
    pub export_name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A named input of a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackParameter {
    /// Value used when no override is supplied.
    #[serde(default)]
    pub default: Option<String>,
    /// Value supplied for this deployment.
    #[serde(default)]
    pub value: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Regular expression the effective value must match.
    #[serde(default)]
    pub allowed_pattern: Option<String>,
    /// Message reported when the value does not match.
    #[serde(default)]
    pub constraint_description: Option<String>,
}

impl StackParameter {
    /// The override if present, otherwise the default.
    #[must_use]
    pub fn effective(&self) -> Option<&str> {
        self.value.as_deref().or(self.default.as_deref())
    }
}

/// An independently deployable bundle of resources.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackUnit {
    /// Stack name, unique within a batch.
    pub name: String,
    /// Resource declarations, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
    /// Published outputs.
    #[serde(default)]
    pub outputs: Vec<OutputDeclaration>,
    /// Stack inputs.
    #[serde(default)]
    pub parameters: BTreeMap<String, StackParameter>,
    /// Tags merged into every resource's `tags` map.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl StackUnit {
    /// Creates an empty stack.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            outputs: Vec::new(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Looks up a resource by logical id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Overrides a parameter value, declaring the parameter if needed.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.entry(name.into()).or_default().value = Some(value.into());
    }

    /// Export names this stack publishes.
    #[must_use]
    pub fn export_names(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter_map(|o| o.export_name.as_deref())
            .collect()
    }

    /// Export names this stack consumes, from resources and outputs.
    #[must_use]
    pub fn import_names(&self) -> BTreeSet<&str> {
        let mut refs = Vec::new();
        for resource in &self.resources {
            for value in resource.properties.values() {
                value.collect_references(&mut refs);
            }
        }
        for output in &self.outputs {
            output.value.collect_references(&mut refs);
        }
        refs.into_iter()
            .filter_map(|r| match r {
                Reference::Import { export_name } => Some(export_name.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("value should parse")
    }

    #[test]
    fn scalars_become_literals() {
        assert_eq!(parse("\"10.10.0.0/10\""), Value::from("10.10.0.0/10"));
        assert_eq!(parse("true"), Value::from(true));
        assert_eq!(parse("128"), Value::from(128_u64));
    }

    #[test]
    fn ref_form_splits_resource_and_attribute() {
        assert_eq!(parse("{ ref: Vpc.vpcId }"), Value::attr("Vpc", "vpcId"));
    }

    #[test]
    fn ref_without_attribute_is_rejected() {
        let result: Result<Value, _> = serde_yaml::from_str("{ ref: Vpc }");
        assert!(result.is_err());
    }

    #[test]
    fn import_and_param_forms() {
        assert_eq!(parse("{ import: projectAzul }"), Value::import("projectAzul"));
        assert_eq!(
            parse("{ param: BucketNameConfiguracion }"),
            Value::param("BucketNameConfiguracion")
        );
    }

    #[test]
    fn map_with_extra_keys_is_a_plain_map() {
        let value = parse("{ ref: Vpc.vpcId, other: 1 }");
        assert!(matches!(value, Value::Map(ref m) if m.len() == 2));
    }

    #[test]
    fn nested_structures_keep_references() {
        let value = parse(
            r"
tags:
  - key: Name
    value: { join: [{ import: projectAzul }, '-VPC'] }
",
        );
        let refs = value.references();
        assert_eq!(refs, vec![&Reference::import("projectAzul")]);
    }

    #[test]
    fn stack_import_names_cover_outputs() {
        let mut stack = StackUnit::new("config-stack");
        stack.resources.push(
            ResourceDeclaration::new("Vpc", ResourceKind::Network)
                .with_property("name", Value::join([Value::import("projectAzul"), "-VPC".into()])),
        );
        stack.outputs.push(OutputDeclaration {
            name: "env".into(),
            value: Value::import("environmentAzul"),
            export_name: None,
            description: None,
        });
        let names: Vec<&str> = stack.import_names().into_iter().collect();
        assert_eq!(names, vec!["environmentAzul", "projectAzul"]);
    }

    #[test]
    fn parameter_override_wins_over_default() {
        let mut stack = StackUnit::new("config-stack");
        let _ = stack.parameters.insert(
            "BucketNameConfiguracion".into(),
            StackParameter {
                default: Some("BucketConfiguracion".into()),
                ..StackParameter::default()
            },
        );
        assert_eq!(
            stack.parameters["BucketNameConfiguracion"].effective(),
            Some("BucketConfiguracion")
        );
        stack.set_parameter("BucketNameConfiguracion", "bucket-prod");
        assert_eq!(
            stack.parameters["BucketNameConfiguracion"].effective(),
            Some("bucket-prod")
        );
    }
}
