//! Domain primitive types used across the Stackwire workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified address of a resource: its stack plus its logical id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceAddress {
    /// Owning stack name.
    pub stack: String,
    /// Logical id, unique within the stack.
    pub resource: String,
}

impl ResourceAddress {
    /// Creates an address from a stack name and a logical id.
    #[must_use]
    pub fn new(stack: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack, self.resource)
    }
}

/// Kind of cloud resource a declaration provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A virtual private network.
    Network,
    /// A subnet inside a network.
    Subnet,
    /// An object storage bucket.
    Bucket,
    /// An IAM execution role.
    Role,
    /// A compute function.
    Function,
    /// A public REST API gateway.
    Api,
    /// A token authorizer attached to an API.
    Authorizer,
    /// A named configuration parameter.
    Parameter,
}

impl ResourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Network,
        Self::Subnet,
        Self::Bucket,
        Self::Role,
        Self::Function,
        Self::Api,
        Self::Authorizer,
        Self::Parameter,
    ];

    /// Returns the lowercase name used in declarations and state files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Bucket => "bucket",
            Self::Role => "role",
            Self::Function => "function",
            Self::Api => "api",
            Self::Authorizer => "authorizer",
            Self::Parameter => "parameter",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a resource is deleted or kept when its stack is torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Keep the cloud resource and stop managing it.
    Retain,
    /// Delete the cloud resource.
    #[default]
    Destroy,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Lifecycle state of a resource node during apply and destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not yet reached by the run.
    Pending,
    /// References are being resolved.
    Resolving,
    /// The provider is creating the resource.
    Creating,
    /// The resource exists and matches its declaration.
    Created,
    /// The provider is updating the resource.
    Updating,
    /// The provider is deleting the resource.
    Destroying,
    /// The resource was deleted.
    Destroyed,
    /// The resource was kept per its removal policy.
    Retained,
    /// An operation on the resource failed.
    Failed,
}

impl NodeState {
    /// Returns whether the state machine permits moving from `self` to `next`.
    ///
    /// `Created -> Resolving` covers re-resolution of an already provisioned
    /// node on a later apply.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Created, Self::Resolving)
                | (Self::Resolving, Self::Creating | Self::Updating | Self::Created | Self::Failed)
                | (Self::Creating | Self::Updating, Self::Created | Self::Failed)
                | (Self::Created, Self::Destroying | Self::Retained)
                | (Self::Destroying, Self::Destroyed | Self::Failed)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Retained => "retained",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
