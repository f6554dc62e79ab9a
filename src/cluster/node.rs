//! Node resource - a machine in the local cluster
//!
//! Only the parts the broadcaster reads are modelled:
//! - Labels, used to exclude virtual nodes injected by peers
//! - The pod address block assigned to the node
//! - Allocatable resources and the container images cached on the node

use serde::{Deserialize, Serialize};

use super::quantity::{Quantity, QuantityFormat};
use super::resources::{ObjectMeta, ResourceQuantities, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};

/// A Node of the local cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Kind is always "Node"
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Metadata about the node
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: NodeSpec,

    #[serde(default)]
    pub status: NodeStatus,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Node".to_string()
}

/// Node specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Pod address block assigned to this node (e.g., "10.244.1.0/24")
    #[serde(rename = "podCIDR", default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
}

/// Observed status of a Node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Total resources of the node
    #[serde(default)]
    pub capacity: ResourceQuantities,

    /// Resources available for scheduling
    #[serde(default)]
    pub allocatable: ResourceQuantities,

    /// Container images present on the node
    #[serde(default)]
    pub images: Vec<ContainerImage>,
}

/// A container image cached on a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// All references naming this image (tags and digests)
    #[serde(default)]
    pub names: Vec<String>,

    #[serde(rename = "sizeBytes", default)]
    pub size_bytes: u64,
}

impl Node {
    /// Create a new Node with no resources
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::cluster_scoped(name),
            spec: NodeSpec::default(),
            status: NodeStatus::default(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Set the pod address block
    pub fn with_pod_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.spec.pod_cidr = Some(cidr.into());
        self
    }

    /// Set an allocatable resource
    pub fn with_allocatable(mut self, resource: impl Into<String>, amount: Quantity) -> Self {
        self.status.allocatable.insert(resource.into(), amount);
        self
    }

    /// Set CPU, memory (in GiB) and pod slots at once
    pub fn with_resources(self, cpu: i64, memory_gib: i64, pods: i64) -> Self {
        self.with_allocatable(RESOURCE_CPU, Quantity::from_units(cpu, QuantityFormat::DecimalSI))
            .with_allocatable(
                RESOURCE_MEMORY,
                Quantity::from_units(memory_gib * 1024 * 1024 * 1024, QuantityFormat::BinarySI),
            )
            .with_allocatable(RESOURCE_PODS, Quantity::from_units(pods, QuantityFormat::DecimalSI))
    }

    /// Add a cached image
    pub fn with_image(mut self, name: impl Into<String>, size_bytes: u64) -> Self {
        self.status.images.push(ContainerImage {
            names: vec![name.into()],
            size_bytes,
        });
        self
    }

    /// Allocatable amount of a resource, zero when unreported
    pub fn allocatable(&self, resource: &str) -> Quantity {
        self.status
            .allocatable
            .get(resource)
            .copied()
            .unwrap_or(Quantity::ZERO)
    }
}
