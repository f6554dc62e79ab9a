//! Broadcaster configuration
//!
//! The fixed policy values (retry budget, delays, interval, TTL, fallback
//! pod block) are constants; naming conventions and the cluster identity
//! can come from the command line or an optional YAML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{Advertisement, LabelSelector};

/// Connection attempts per peer before giving up on it
pub const CONNECT_RETRY_BUDGET: u32 = 3;

/// Delay between two connection attempts
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Delay between two publish cycles
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Advisory lifetime stamped on each advertisement, in minutes
pub const ADVERTISEMENT_TTL_MINUTES: i64 = 30;

/// Pod block advertised when the sampled node block is unusable
pub const DEFAULT_POD_CIDR: &str = "172.17.0.0/16";

/// Delay before re-opening a lifecycle watch that ended or failed
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Namespace holding peer descriptors
pub const DEFAULT_DESCRIPTOR_NAMESPACE: &str = "default";

/// Name prefix identifying peer descriptors
pub const DEFAULT_DESCRIPTOR_PREFIX: &str = "foreign-kubeconfig-";

/// Data field holding the peer credentials in a descriptor
pub const DEFAULT_CREDENTIAL_FIELD: &str = "remote";

/// Excludes nodes that peers injected into this cluster
pub const DEFAULT_NODE_SELECTOR: &str = "type!=virtual-node";

/// Namespace advertisements are written to on the peer
pub const DEFAULT_ADVERTISEMENT_NAMESPACE: &str = "default";

/// Advertisement name is this prefix followed by the cluster id
pub const DEFAULT_ADVERTISEMENT_PREFIX: &str = "advertisement-";

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration of the broadcaster
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Identifier of this cluster
    pub cluster_id: String,

    /// Public address of the gateway node
    pub gateway_ip: String,

    /// Private address of the gateway node
    pub gateway_private_ip: String,

    pub descriptor_namespace: String,
    pub descriptor_prefix: String,
    pub credential_field: String,

    /// Selector applied when listing local nodes
    pub node_selector: LabelSelector,

    pub advertisement_namespace: String,
    pub advertisement_prefix: String,

    pub retry_budget: u32,
    pub retry_delay: Duration,
    pub publish_interval: Duration,
    pub advertisement_ttl: chrono::Duration,
    pub default_pod_cidr: String,
    pub watch_retry_delay: Duration,
}

impl Default for BroadcasterConfig {
    /// Default policy with no cluster identity yet; fails `validate`
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl BroadcasterConfig {
    /// Create a config with the default conventions and policy
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            gateway_ip: String::new(),
            gateway_private_ip: String::new(),
            descriptor_namespace: DEFAULT_DESCRIPTOR_NAMESPACE.to_string(),
            descriptor_prefix: DEFAULT_DESCRIPTOR_PREFIX.to_string(),
            credential_field: DEFAULT_CREDENTIAL_FIELD.to_string(),
            node_selector: LabelSelector::excluding("type", "virtual-node"),
            advertisement_namespace: DEFAULT_ADVERTISEMENT_NAMESPACE.to_string(),
            advertisement_prefix: DEFAULT_ADVERTISEMENT_PREFIX.to_string(),
            retry_budget: CONNECT_RETRY_BUDGET,
            retry_delay: CONNECT_RETRY_DELAY,
            publish_interval: PUBLISH_INTERVAL,
            advertisement_ttl: chrono::Duration::minutes(ADVERTISEMENT_TTL_MINUTES),
            default_pod_cidr: DEFAULT_POD_CIDR.to_string(),
            watch_retry_delay: WATCH_RETRY_DELAY,
        }
    }

    /// Set the gateway addresses
    pub fn with_gateway(mut self, public: impl Into<String>, private: impl Into<String>) -> Self {
        self.gateway_ip = public.into();
        self.gateway_private_ip = private.into();
        self
    }

    /// Set the descriptor namespace
    pub fn with_descriptor_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.descriptor_namespace = namespace.into();
        self
    }

    /// Set the publish interval
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Set the connection retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Name of the advertisement this cluster publishes
    pub fn advertisement_name(&self) -> String {
        Advertisement::object_name(&self.advertisement_prefix, &self.cluster_id)
    }

    /// Apply overrides read from a config file
    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(id) = file.cluster_id {
            self.cluster_id = id;
        }
        if let Some(ip) = file.gateway_ip {
            self.gateway_ip = ip;
        }
        if let Some(ip) = file.gateway_private_ip {
            self.gateway_private_ip = ip;
        }
        if let Some(selector) = file.node_selector {
            self.node_selector = selector.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(d) = file.descriptors {
            if let Some(ns) = d.namespace {
                self.descriptor_namespace = ns;
            }
            if let Some(prefix) = d.prefix {
                self.descriptor_prefix = prefix;
            }
            if let Some(field) = d.credential_field {
                self.credential_field = field;
            }
        }
        if let Some(a) = file.advertisement {
            if let Some(ns) = a.namespace {
                self.advertisement_namespace = ns;
            }
            if let Some(prefix) = a.name_prefix {
                self.advertisement_prefix = prefix;
            }
        }
        Ok(())
    }

    /// Check the config is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_id.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster id must not be empty".to_string()));
        }
        if self.descriptor_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "descriptor prefix must not be empty".to_string(),
            ));
        }
        if self.retry_budget == 0 {
            return Err(ConfigError::Invalid("retry budget must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Optional overrides read from YAML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub cluster_id: Option<String>,
    pub gateway_ip: Option<String>,
    pub gateway_private_ip: Option<String>,
    pub node_selector: Option<String>,
    pub descriptors: Option<DescriptorFileConfig>,
    pub advertisement: Option<AdvertisementFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DescriptorFileConfig {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub credential_field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdvertisementFileConfig {
    pub namespace: Option<String>,
    pub name_prefix: Option<String>,
}

/// Parse config overrides from YAML
pub fn parse_config_file(content: &str) -> Result<FileConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load config overrides from disk
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_file(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_policy() {
        let config = BroadcasterConfig::new("cluster-1");
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.publish_interval, Duration::from_secs(600));
        assert_eq!(config.advertisement_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.default_pod_cidr, "172.17.0.0/16");
        assert_eq!(config.node_selector.to_string(), DEFAULT_NODE_SELECTOR);
        assert_eq!(config.advertisement_name(), "advertisement-cluster-1");
    }

    #[test]
    fn test_apply_file() {
        let yaml = r#"
gateway-ip: 203.0.113.10
node-selector: "type!=virtual-node,pool=edge"
descriptors:
  namespace: peering
  credential-field: kubeconfig
advertisement:
  name-prefix: offer-
"#;
        let mut config = BroadcasterConfig::new("c1");
        config.apply_file(parse_config_file(yaml).unwrap()).unwrap();

        assert_eq!(config.gateway_ip, "203.0.113.10");
        assert_eq!(config.descriptor_namespace, "peering");
        assert_eq!(config.descriptor_prefix, DEFAULT_DESCRIPTOR_PREFIX);
        assert_eq!(config.credential_field, "kubeconfig");
        assert_eq!(config.node_selector.requirements.len(), 2);
        assert_eq!(config.advertisement_name(), "offer-c1");
    }

    #[test]
    fn test_apply_file_bad_selector() {
        let mut config = BroadcasterConfig::new("c1");
        let file = FileConfig {
            node_selector: Some("=oops".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.apply_file(file), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_needs_cluster_id() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.retry_budget, CONNECT_RETRY_BUDGET);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate() {
        assert!(BroadcasterConfig::new("c1").validate().is_ok());
        assert!(BroadcasterConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"cluster-id: from-file\n").unwrap();

        let loaded = load_config_file(file.path()).unwrap();
        assert_eq!(loaded.cluster_id.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config_file(Path::new("/nonexistent/broadcaster.yaml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
