//! Reference resolution.
//!
//! Declared [`Value`]s are turned into concrete JSON in a single pass. The
//! resolver does not know where attributes and exports live: a
//! [`ResolutionContext`] supplies them, so planning can resolve against
//! recorded state while applying resolves against freshly created resources.

use std::collections::BTreeMap;

use stackwire_common::error::{Result, StackwireError};
use stackwire_common::types::ResourceAddress;

use crate::model::{OutputDeclaration, Reference, ResourceDeclaration, StackUnit, Value};

/// Source of values for references.
pub trait ResolutionContext {
    /// Returns an output attribute of a resource of the current stack.
    fn attribute(&self, resource: &str, attribute: &str) -> Option<serde_json::Value>;

    /// Resolves a cross-stack import on behalf of `importer`.
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::UnresolvedReference`] if the export is unknown.
    fn import(&self, importer: &ResourceAddress, export_name: &str) -> Result<String>;
}

/// Resolves the values of one stack.
#[derive(Debug)]
pub struct Resolver<'a, C: ?Sized> {
    stack: &'a StackUnit,
    context: &'a C,
}

impl<'a, C: ResolutionContext + ?Sized> Resolver<'a, C> {
    /// Creates a resolver for `stack` reading from `context`.
    pub const fn new(stack: &'a StackUnit, context: &'a C) -> Self {
        Self { stack, context }
    }

    /// Resolves every property of a declaration.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve_properties(
        &self,
        declaration: &ResourceDeclaration,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        declaration
            .properties
            .iter()
            .map(|(name, value)| {
                self.resolve_value(&declaration.id, value)
                    .map(|resolved| (name.clone(), resolved))
            })
            .collect()
    }

    /// Resolves an output to the string published in the registry.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve_output(&self, output: &OutputDeclaration) -> Result<String> {
        let holder = format!("outputs.{}", output.name);
        let resolved = self.resolve_value(&holder, &output.value)?;
        Ok(match resolved {
            serde_json::Value::String(text) => text,
            serde_json::Value::Null => String::new(),
            other @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_)) => other.to_string(),
            other => serde_json::to_string(&other)?,
        })
    }

    /// Resolves one value held by `holder` (a resource id or output path).
    ///
    /// # Errors
    ///
    /// Returns [`StackwireError::UnresolvedReference`] for a missing attribute,
    /// parameter, or export, and [`StackwireError::Config`] when a `join` part
    /// is not a scalar.
    pub fn resolve_value(&self, holder: &str, value: &Value) -> Result<serde_json::Value> {
        match value {
            Value::Literal(literal) => Ok(literal.clone()),
            Value::Ref(reference) => self.resolve_reference(holder, reference),
            Value::Join(parts) => {
                let mut joined = String::new();
                for part in parts {
                    let resolved = self.resolve_value(holder, part)?;
                    joined.push_str(&self.stringify(holder, &resolved)?);
                }
                Ok(serde_json::Value::String(joined))
            }
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(holder, item))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Map(entries) => entries
                .iter()
                .map(|(key, item)| self.resolve_value(holder, item).map(|v| (key.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
        }
    }

    fn resolve_reference(&self, holder: &str, reference: &Reference) -> Result<serde_json::Value> {
        match reference {
            Reference::Attribute {
                resource,
                attribute,
            } => self
                .context
                .attribute(resource, attribute)
                .ok_or_else(|| self.unresolved(holder, reference)),
            Reference::Import { export_name } => {
                let importer = ResourceAddress::new(self.stack.name.clone(), holder);
                self.context
                    .import(&importer, export_name)
                    .map(serde_json::Value::String)
            }
            Reference::Parameter { name } => self
                .stack
                .parameters
                .get(name)
                .and_then(|p| p.effective())
                .map(|v| serde_json::Value::String(v.to_string()))
                .ok_or_else(|| self.unresolved(holder, reference)),
        }
    }

    fn stringify(&self, holder: &str, value: &serde_json::Value) -> Result<String> {
        match value {
            serde_json::Value::String(text) => Ok(text.clone()),
            serde_json::Value::Null => Ok(String::new()),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => Ok(value.to_string()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Err(StackwireError::Config {
                    message: format!(
                        "{}/{holder}: join part must be a scalar, got {value}",
                        self.stack.name
                    ),
                })
            }
        }
    }

    fn unresolved(&self, holder: &str, reference: &Reference) -> StackwireError {
        StackwireError::UnresolvedReference {
            stack: self.stack.name.clone(),
            resource: holder.to_string(),
            reference: reference.to_string(),
        }
    }
}
