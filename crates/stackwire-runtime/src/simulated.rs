//! Deterministic in-memory cloud.
//!
//! Physical ids are derived from the stack and logical id with SHA-256, so
//! two runs over the same declarations produce the same ids and attributes.
//! Failures and delays can be scripted per logical id to exercise the
//! provisioner's error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stackwire_common::types::ResourceKind;

use crate::digest::sha256_hex;
use crate::provider::{Attributes, ProviderError, ResourceProvider, ResourceRequest};

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "000000000000";

/// A provider operation, for scripting and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A call received by the simulated cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation performed.
    pub operation: Operation,
    /// Physical id for update and delete, logical id for create.
    pub target: String,
}

/// A resource held by the simulated cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Last properties received.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Attributes reported for it.
    pub attributes: Attributes,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, SimulatedResource>,
    failures: HashMap<(Operation, String), String>,
    delays: HashMap<String, Duration>,
    calls: Vec<Call>,
}

/// In-memory provider serving every [`ResourceKind`].
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    inner: Mutex<Inner>,
}

impl SimulatedCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `operation` on `target` fail with `message` until
    /// [`clear_failures`](Self::clear_failures) is called. Creates are
    /// matched by logical id, updates and deletes by physical id.
    pub fn fail(&self, operation: Operation, target: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.failures.insert((operation, target.into()), message.into());
        }
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.clear();
        }
    }

    /// Delays every call concerning `logical_id` by `delay`.
    pub fn delay(&self, logical_id: impl Into<String>, delay: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.delays.insert(logical_id.into(), delay);
        }
    }

    /// Returns whether a resource with this physical id exists.
    #[must_use]
    pub fn exists(&self, physical_id: &str) -> bool {
        self.inner
            .lock()
            .is_ok_and(|inner| inner.resources.contains_key(physical_id))
    }

    /// Returns a copy of a live resource.
    #[must_use]
    pub fn resource(&self, physical_id: &str) -> Option<SimulatedResource> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.resources.get(physical_id).cloned())
    }

    /// Number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.resources.len())
    }

    /// Whether no resource is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .lock()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls of one kind of operation.
    #[must_use]
    pub fn count(&self, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ProviderError> {
        self.inner
            .lock()
            .map_err(|_| ProviderError::new("simulated cloud lock poisoned"))
    }

    /// Records the call, then applies the scripted delay and failure.
    async fn enter(&self, operation: Operation, target: &str, logical_id: &str) -> Result<(), ProviderError> {
        let (delay, failure) = {
            let mut inner = self.lock()?;
            inner.calls.push(Call {
                operation,
                target: target.to_string(),
            });
            (
                inner.delays.get(logical_id).copied(),
                inner.failures.get(&(operation, target.to_string())).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), |message| Err(ProviderError(message)))
    }
}

#[async_trait]
impl ResourceProvider for SimulatedCloud {
    async fn create(&self, request: &ResourceRequest) -> Result<(String, Attributes), ProviderError> {
        self.enter(Operation::Create, &request.logical_id, &request.logical_id)
            .await?;
        let physical_id = physical_id(request);
        let attributes = attributes(request.kind, &physical_id, &request.properties);

        let mut inner = self.lock()?;
        if inner.resources.contains_key(&physical_id) {
            return Err(ProviderError::new(format!(
                "{} \"{physical_id}\" already exists",
                request.kind
            )));
        }
        let _ = inner.resources.insert(
            physical_id.clone(),
            SimulatedResource {
                kind: request.kind,
                properties: request.properties.clone(),
                attributes: attributes.clone(),
            },
        );
        tracing::debug!(kind = %request.kind, physical_id = %physical_id, "simulated resource created");
        Ok((physical_id, attributes))
    }

    async fn update(&self, physical_id: &str, request: &ResourceRequest) -> Result<Attributes, ProviderError> {
        self.enter(Operation::Update, physical_id, &request.logical_id)
            .await?;
        let attributes = attributes(request.kind, physical_id, &request.properties);

        let mut inner = self.lock()?;
        let Some(resource) = inner.resources.get_mut(physical_id) else {
            return Err(ProviderError::new(format!(
                "{} \"{physical_id}\" does not exist",
                request.kind
            )));
        };
        resource.properties.clone_from(&request.properties);
        resource.attributes.clone_from(&attributes);
        tracing::debug!(kind = %request.kind, physical_id, "simulated resource updated");
        Ok(attributes)
    }

    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> Result<(), ProviderError> {
        self.enter(Operation::Delete, physical_id, physical_id).await?;
        let mut inner = self.lock()?;
        if inner.resources.remove(physical_id).is_none() {
            tracing::debug!(%kind, physical_id, "simulated resource already gone");
        }
        Ok(())
    }
}

fn physical_id(request: &ResourceRequest) -> String {
    let hash = sha256_hex([
        request.stack.as_str(),
        request.logical_id.as_str(),
        request.kind.as_str(),
    ]);
    let named = |property: &str| {
        request
            .properties
            .get(property)
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
    };
    let generated = || format!("{}-{}-{}", request.stack, request.logical_id, &hash[..8]);
    match request.kind {
        ResourceKind::Network => format!("vpc-{}", &hash[..17]),
        ResourceKind::Subnet => format!("subnet-{}", &hash[..17]),
        ResourceKind::Bucket => named("bucketName")
            .unwrap_or_else(generated)
            .to_ascii_lowercase(),
        ResourceKind::Role => named("roleName").unwrap_or_else(generated),
        ResourceKind::Function => named("functionName").unwrap_or_else(generated),
        ResourceKind::Api => hash[..10].to_string(),
        ResourceKind::Authorizer => hash[..6].to_string(),
        ResourceKind::Parameter => named("parameterName")
            .unwrap_or_else(|| format!("/{}/{}", request.stack, request.logical_id)),
    }
}

fn attributes(
    kind: ResourceKind,
    physical_id: &str,
    properties: &BTreeMap<String, serde_json::Value>,
) -> Attributes {
    let pairs = match kind {
        ResourceKind::Network => vec![("vpcId", json!(physical_id))],
        ResourceKind::Subnet => vec![("subnetId", json!(physical_id))],
        ResourceKind::Bucket => vec![
            ("bucketName", json!(physical_id)),
            ("bucketArn", json!(format!("arn:aws:s3:::{physical_id}"))),
        ],
        ResourceKind::Role => vec![
            ("roleName", json!(physical_id)),
            ("roleArn", json!(format!("arn:aws:iam::{ACCOUNT}:role/{physical_id}"))),
        ],
        ResourceKind::Function => vec![
            ("functionName", json!(physical_id)),
            (
                "functionArn",
                json!(format!("arn:aws:lambda:{REGION}:{ACCOUNT}:function:{physical_id}")),
            ),
        ],
        ResourceKind::Api => {
            let stage = properties
                .get("stageName")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("prod");
            let root = sha256_hex([physical_id, "/"]);
            vec![
                ("restApiId", json!(physical_id)),
                ("rootResourceId", json!(&root[..10])),
                (
                    "url",
                    json!(format!("https://{physical_id}.execute-api.{REGION}.amazonaws.com/{stage}/")),
                ),
            ]
        }
        ResourceKind::Authorizer => vec![("authorizerId", json!(physical_id))],
        ResourceKind::Parameter => vec![
            ("parameterName", json!(physical_id)),
            (
                "value",
                properties
                    .get("stringValue")
                    .cloned()
                    .unwrap_or_else(|| json!("")),
            ),
        ],
    };
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(logical_id: &str, kind: ResourceKind, properties: serde_json::Value) -> ResourceRequest {
        let properties = serde_json::from_value(properties).expect("object");
        ResourceRequest {
            stack: "config-stack".into(),
            logical_id: logical_id.into(),
            kind,
            properties,
        }
    }

    #[tokio::test]
    async fn every_kind_reports_its_attributes() {
        let cloud = SimulatedCloud::new();
        let expected: [(ResourceKind, &[&str]); 8] = [
            (ResourceKind::Network, &["vpcId"]),
            (ResourceKind::Subnet, &["subnetId"]),
            (ResourceKind::Bucket, &["bucketArn", "bucketName"]),
            (ResourceKind::Role, &["roleArn", "roleName"]),
            (ResourceKind::Function, &["functionArn", "functionName"]),
            (ResourceKind::Api, &["restApiId", "rootResourceId", "url"]),
            (ResourceKind::Authorizer, &["authorizerId"]),
            (ResourceKind::Parameter, &["parameterName", "value"]),
        ];
        for (kind, names) in expected {
            let (_, attributes) = cloud
                .create(&request(kind.as_str(), kind, json!({})))
                .await
                .expect("create");
            let keys: Vec<&str> = attributes.keys().map(String::as_str).collect();
            assert_eq!(keys, names, "{kind}");
        }
        assert_eq!(cloud.len(), 8);
    }

    #[tokio::test]
    async fn ids_are_deterministic_across_clouds() {
        let req = request("Vpc", ResourceKind::Network, json!({"cidr": "10.10.0.0/10"}));
        let (a, _) = SimulatedCloud::new().create(&req).await.expect("create");
        let (b, _) = SimulatedCloud::new().create(&req).await.expect("create");
        assert_eq!(a, b);
        assert!(a.starts_with("vpc-"));
    }

    #[tokio::test]
    async fn named_resources_use_their_name() {
        let cloud = SimulatedCloud::new();
        let (id, attributes) = cloud
            .create(&request(
                "ProjectName",
                ResourceKind::Parameter,
                json!({"parameterName": "/vectorAzul/ProjectName", "stringValue": "vectorAzul"}),
            ))
            .await
            .expect("create");
        assert_eq!(id, "/vectorAzul/ProjectName");
        assert_eq!(attributes["value"], json!("vectorAzul"));

        let err = cloud
            .create(&request(
                "Other",
                ResourceKind::Parameter,
                json!({"parameterName": "/vectorAzul/ProjectName"}),
            ))
            .await
            .unwrap_err();
        assert!(err.0.contains("already exists"));
    }

    #[tokio::test]
    async fn update_and_delete_track_live_resources() {
        let cloud = SimulatedCloud::new();
        let (id, _) = cloud
            .create(&request("Bucket", ResourceKind::Bucket, json!({"bucketName": "BucketConfiguracion"})))
            .await
            .expect("create");
        assert_eq!(id, "bucketconfiguracion");

        let updated = request("Bucket", ResourceKind::Bucket, json!({"versioned": true}));
        let _ = cloud.update(&id, &updated).await.expect("update");
        assert_eq!(cloud.resource(&id).expect("live").properties["versioned"], json!(true));

        cloud.delete(&id, ResourceKind::Bucket).await.expect("delete");
        assert!(!cloud.exists(&id));
        assert!(cloud.update(&id, &updated).await.is_err());
        assert_eq!(cloud.count(Operation::Update), 2);
    }

    #[tokio::test]
    async fn scripted_failures_apply_until_cleared() {
        let cloud = SimulatedCloud::new();
        cloud.fail(Operation::Create, "Function", "quota exceeded");
        let req = request("Function", ResourceKind::Function, json!({}));
        assert_eq!(cloud.create(&req).await.unwrap_err(), ProviderError::new("quota exceeded"));
        assert!(cloud.is_empty());

        cloud.clear_failures();
        assert!(cloud.create(&req).await.is_ok());
    }

    #[tokio::test]
    async fn delays_are_applied() {
        let cloud = SimulatedCloud::new();
        cloud.delay("Api", Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        let _ = cloud
            .create(&request("Api", ResourceKind::Api, json!({})))
            .await
            .expect("create");
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
