//! Shared resource types for the object stores the broadcaster talks to

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

/// Resource name for CPU
pub const RESOURCE_CPU: &str = "cpu";

/// Resource name for memory
pub const RESOURCE_MEMORY: &str = "memory";

/// Resource name for pod slots
pub const RESOURCE_PODS: &str = "pods";

/// Map of resource name to amount, ordered for deterministic output
pub type ResourceQuantities = BTreeMap<String, Quantity>;

/// Metadata common to every stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace
    pub name: String,

    /// Namespace (empty for cluster-scoped objects such as nodes)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Labels for selection
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,

    /// Server-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Server-assigned revision used for optimistic concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Set by the server on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Metadata for a cluster-scoped object
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    /// API version
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,

    /// Kind (e.g., "ConfigMapList", "NodeList")
    #[serde(default)]
    pub kind: String,

    /// List of items
    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    /// Create a new resource list
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: kind.into(),
            items,
        }
    }
}

/// A configuration record (name plus string key/value data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            data: BTreeMap::new(),
        }
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Operator of a single selector requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOp {
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
}

/// One `key=value`, `key!=value`, `key` or `!key` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: SelectorOp,
    pub value: String,
}

impl Requirement {
    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self.op {
            SelectorOp::Equals => labels.get(&self.key) == Some(&self.value),
            // A missing label also satisfies `!=`
            SelectorOp::NotEquals => labels.get(&self.key) != Some(&self.value),
            SelectorOp::Exists => labels.contains_key(&self.key),
            SelectorOp::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Label selector for filtering resources
///
/// Parses the comma-separated text form used in list queries, e.g.
/// `type!=virtual-node,env=prod`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement {
                key: key.into(),
                op: SelectorOp::Equals,
                value: value.into(),
            }],
        }
    }

    /// Create a selector that excludes a specific label value
    pub fn excluding(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement {
                key: key.into(),
                op: SelectorOp::NotEquals,
                value: value.into(),
            }],
        }
    }

    /// An empty selector matches everything
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Check if labels match this selector
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut requirements = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
                (k, SelectorOp::NotEquals, v)
            } else if let Some((k, v)) = term.split_once("==") {
                (k, SelectorOp::Equals, v)
            } else if let Some((k, v)) = term.split_once('=') {
                (k, SelectorOp::Equals, v)
            } else if let Some(k) = term.strip_prefix('!') {
                (k, SelectorOp::DoesNotExist, "")
            } else {
                (term, SelectorOp::Exists, "")
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(format!("invalid selector term '{}'", term));
            }
            requirements.push(Requirement {
                key: key.to_string(),
                op,
                value: value.trim().to_string(),
            });
        }
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r.op {
                SelectorOp::Equals => format!("{}={}", r.key, r.value),
                SelectorOp::NotEquals => format!("{}!={}", r.key, r.value),
                SelectorOp::Exists => r.key.clone(),
                SelectorOp::DoesNotExist => format!("!{}", r.key),
            })
            .collect();
        write!(f, "{}", terms.join(","))
    }
}

/// Watch event for resource changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    /// Type of event: ADDED, MODIFIED, DELETED
    #[serde(rename = "type")]
    pub event_type: WatchEventType,

    /// The affected resource
    pub object: T,
}

/// Types of watch events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    /// Resource was created
    #[serde(rename = "ADDED")]
    Added,
    /// Resource was modified
    #[serde(rename = "MODIFIED")]
    Modified,
    /// Resource was deleted
    #[serde(rename = "DELETED")]
    Deleted,
}
