//! Fluent API for declaring stacks and resources.

use std::collections::BTreeMap;

use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::{RemovalPolicy, ResourceKind};
use stackwire_compose::composer::TAGS_PROPERTY;
use stackwire_compose::model::{OutputDeclaration, ResourceDeclaration, StackParameter, StackUnit, Value};
use stackwire_compose::{template, validator};

/// Builder for a single resource declaration.
///
/// Template errors from [`sub`](Self::sub) are kept and surface from
/// [`build`](Self::build), so a declaration reads as one chain.
#[derive(Debug)]
pub struct ResourceBuilder {
    declaration: ResourceDeclaration,
    error: Option<StackwireError>,
}

impl ResourceBuilder {
    /// Creates a builder for resource `id` of `kind`.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            declaration: ResourceDeclaration::new(id, kind),
            error: None,
        }
    }

    /// Sets a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.declaration.properties.insert(name.into(), value.into());
        self
    }

    /// Sets a property from a `sub` template such as
    /// `"${import:projectAzul}-VPC"`.
    #[must_use]
    pub fn sub(mut self, name: impl Into<String>, template: &str) -> Self {
        match template::parse_sub(template) {
            Ok(value) => {
                let _ = self.declaration.properties.insert(name.into(), value);
            }
            Err(e) => {
                let _ = self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Adds an entry to the resource's `tags` map.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let tags = self
            .declaration
            .properties
            .entry(TAGS_PROPERTY.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if let Value::Map(entries) = tags {
            let _ = entries.insert(key.into(), value.into());
        }
        self
    }

    /// Adds a tag whose value is a `sub` template.
    #[must_use]
    pub fn tag_sub(self, key: impl Into<String>, template: &str) -> Self {
        match template::parse_sub(template) {
            Ok(value) => self.tag(key, value),
            Err(e) => {
                let mut this = self;
                let _ = this.error.get_or_insert(e);
                this
            }
        }
    }

    /// Sets the removal policy.
    #[must_use]
    pub const fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.declaration.removal_policy = Some(policy);
        self
    }

    /// Declares an explicit dependency on another resource of the stack.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.declaration.depends_on.push(id.into());
        self
    }

    /// Returns the declaration.
    ///
    /// # Errors
    ///
    /// Returns the first template error recorded while building.
    pub fn build(self) -> Result<ResourceDeclaration> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.declaration),
        }
    }
}

/// Builder for a stack.
#[derive(Debug)]
pub struct StackBuilder {
    stack: StackUnit,
    error: Option<StackwireError>,
}

impl StackBuilder {
    /// Creates a builder for the stack `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stack: StackUnit::new(name),
            error: None,
        }
    }

    /// Adds a stack tag, merged into every resource at plan time.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.stack.tags.insert(key.into(), value.into());
        self
    }

    /// Declares a parameter with a default value.
    #[must_use]
    pub fn parameter(
        mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let _ = self.stack.parameters.insert(
            name.into(),
            StackParameter {
                default: Some(default.into()),
                value: None,
                description: Some(description.into()),
                allowed_pattern: None,
                constraint_description: None,
            },
        );
        self
    }

    /// Restricts the declared parameter `name` to values fully matching
    /// `pattern`. `constraint` is reported when a value does not match.
    #[must_use]
    pub fn constrain_parameter(
        mut self,
        name: &str,
        pattern: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        match self.stack.parameters.get_mut(name) {
            Some(parameter) => {
                parameter.allowed_pattern = Some(pattern.into());
                parameter.constraint_description = Some(constraint.into());
            }
            None => {
                let _ = self.error.get_or_insert(StackwireError::Config {
                    message: format!("constraint on undeclared parameter \"{name}\""),
                });
            }
        }
        self
    }

    /// Adds a resource.
    #[must_use]
    pub fn resource(mut self, resource: ResourceBuilder) -> Self {
        match resource.build() {
            Ok(declaration) => self.stack.resources.push(declaration),
            Err(e) => {
                let _ = self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Adds a stack-local output.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.stack.outputs.push(OutputDeclaration {
            name: name.into(),
            value: value.into(),
            export_name: None,
            description: None,
        });
        self
    }

    /// Adds an output published under a cross-stack export name.
    #[must_use]
    pub fn export(
        mut self,
        name: impl Into<String>,
        export_name: impl Into<String>,
        value: impl Into<Value>,
        description: impl Into<String>,
    ) -> Self {
        self.stack.outputs.push(OutputDeclaration {
            name: name.into(),
            value: value.into(),
            export_name: Some(export_name.into()),
            description: Some(description.into()),
        });
        self
    }

    /// Validates and returns the stack.
    ///
    /// # Errors
    ///
    /// Returns the first template error recorded while building, or a
    /// validation error for duplicate ids, outputs, or exports.
    pub fn build(self) -> Result<StackUnit> {
        if let Some(e) = self.error {
            return Err(e);
        }
        validator::validate(&self.stack)?;
        Ok(self.stack)
    }
}

#[cfg(test)]
mod tests {
    use stackwire_compose::model::Reference;

    use super::*;

    #[test]
    fn resource_builder_collects_properties_and_tags() {
        let vpc = ResourceBuilder::new("VPC", ResourceKind::Network)
            .property("cidrBlock", "10.10.0.0/10")
            .property("enableDnsSupport", true)
            .tag("Proyecto", Value::import("projectAzul"))
            .tag_sub("Name", "${import:projectAzul}-VPC")
            .removal_policy(RemovalPolicy::Retain)
            .build()
            .expect("build");

        assert_eq!(vpc.removal_policy, Some(RemovalPolicy::Retain));
        assert!(matches!(
            vpc.properties.get(TAGS_PROPERTY),
            Some(Value::Map(tags)) if tags.len() == 2
        ));
        assert_eq!(
            vpc.references(),
            vec![&Reference::import("projectAzul"), &Reference::import("projectAzul")]
        );
    }

    #[test]
    fn malformed_template_fails_the_stack() {
        let err = StackBuilder::new("config-stack")
            .resource(ResourceBuilder::new("VPC", ResourceKind::Network).sub("name", "${import:projectAzul"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StackwireError::Config { .. }), "got: {err}");
    }

    #[test]
    fn duplicate_resource_ids_fail_validation() {
        let err = StackBuilder::new("config-stack")
            .resource(ResourceBuilder::new("VPC", ResourceKind::Network))
            .resource(ResourceBuilder::new("VPC", ResourceKind::Network))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("VPC"), "got: {err}");
    }

    #[test]
    fn constraining_an_undeclared_parameter_fails() {
        let err = StackBuilder::new("config-stack")
            .constrain_parameter("BucketNameConfiguracion", ".*[^0-9]", "no digits")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared parameter"), "got: {err}");
    }

    #[test]
    fn parameter_default_must_satisfy_its_constraint() {
        let err = StackBuilder::new("config-stack")
            .parameter("BucketNameConfiguracion", "Bucket1", "Bucket name")
            .constrain_parameter("BucketNameConfiguracion", ".*[^0-9]", "no digits")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no digits"), "got: {err}");
    }

    #[test]
    fn stack_builder_records_parameters_and_exports() {
        let stack = StackBuilder::new("parameterstore-stack")
            .tag("Proyecto", "vectorAzul")
            .parameter("BucketNameConfiguracion", "BucketConfiguracion", "Bucket name")
            .resource(ResourceBuilder::new("ProjectParam", ResourceKind::Parameter))
            .export("vectorProjectRef", "projectAzul", Value::attr("ProjectParam", "value"), "Project")
            .output("projectParamName", Value::attr("ProjectParam", "parameterName"))
            .build()
            .expect("build");

        assert_eq!(stack.export_names(), vec!["projectAzul"]);
        assert_eq!(stack.outputs.len(), 2);
        assert_eq!(
            stack.parameters["BucketNameConfiguracion"].effective(),
            Some("BucketConfiguracion")
        );
        assert_eq!(stack.tags["Proyecto"], "vectorAzul");
    }
}
