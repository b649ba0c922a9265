//! Cloud resource provider abstraction.
//!
//! The engine never talks to a cloud API directly. Each [`ResourceKind`] is
//! served by a [`ResourceProvider`]; a [`ProviderSet`] dispatches requests
//! by kind.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use stackwire_common::types::ResourceKind;
use thiserror::Error;

/// Opaque failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    /// Creates an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Output attributes produced by a provider, keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A fully resolved resource, as handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Owning stack.
    pub stack: String,
    /// Logical id within the stack.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resolved properties.
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// A cloud API able to manage resources of one or more kinds.
///
/// Implementors translate resolved properties into provider calls and
/// report the attributes other resources may reference.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates a resource, returning its physical id and attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    async fn create(&self, request: &ResourceRequest) -> Result<(String, Attributes), ProviderError>;

    /// Updates an existing resource in place, returning its new attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    async fn update(&self, physical_id: &str, request: &ResourceRequest) -> Result<Attributes, ProviderError>;

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot delete it.
    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> Result<(), ProviderError>;
}

/// Kind-to-provider dispatch table.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ResourceKind, Arc<dyn ResourceProvider>>,
    fallback: Option<Arc<dyn ResourceProvider>>,
}

impl ProviderSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves every kind with one provider.
    #[must_use]
    pub fn uniform(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            providers: HashMap::new(),
            fallback: Some(provider),
        }
    }

    /// Registers a provider for one kind, overriding the fallback.
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, provider: Arc<dyn ResourceProvider>) -> Self {
        let _ = self.providers.insert(kind, provider);
        self
    }

    /// Sets the provider used for kinds without a dedicated one.
    #[must_use]
    pub fn with_fallback(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Returns the provider serving `kind`.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceProvider>> {
        self.providers.get(&kind).or(self.fallback.as_ref())
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.providers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ProviderSet")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl ResourceProvider for Fixed {
        async fn create(&self, _request: &ResourceRequest) -> Result<(String, Attributes), ProviderError> {
            Ok((self.0.to_string(), Attributes::new()))
        }

        async fn update(&self, _physical_id: &str, _request: &ResourceRequest) -> Result<Attributes, ProviderError> {
            Ok(Attributes::new())
        }

        async fn delete(&self, _physical_id: &str, _kind: ResourceKind) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn request(kind: ResourceKind) -> ResourceRequest {
        ResourceRequest {
            stack: "config-stack".into(),
            logical_id: "X".into(),
            kind,
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn dedicated_provider_wins_over_fallback() {
        let set = ProviderSet::uniform(Arc::new(Fixed("generic")))
            .with(ResourceKind::Bucket, Arc::new(Fixed("s3")));

        let bucket = set.get(ResourceKind::Bucket).expect("bucket provider");
        let (id, _) = bucket.create(&request(ResourceKind::Bucket)).await.expect("create");
        assert_eq!(id, "s3");

        let vpc = set.get(ResourceKind::Network).expect("fallback");
        let (id, _) = vpc.create(&request(ResourceKind::Network)).await.expect("create");
        assert_eq!(id, "generic");
    }

    #[test]
    fn empty_set_serves_nothing() {
        let set = ProviderSet::new();
        assert!(set.get(ResourceKind::Api).is_none());
        assert!(format!("{set:?}").contains("fallback: false"));
    }
}
