use serde::Deserialize;
use thiserror::Error;

/// Default request timeout towards a peer, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while reading peer credentials
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Failed to parse credentials: {0}")]
    ParseError(String),

    #[error("Invalid server URL '{0}'")]
    InvalidServer(String),
}

/// Connection parameters for one peer cluster
///
/// Stored as YAML in the credential field of a peer descriptor:
///
/// ```yaml
/// server: https://peer.example.net:6443
/// token: s3cr3t
/// namespace: default
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeerCredentials {
    /// Base URL of the peer's API (e.g., "https://10.0.0.1:6443")
    pub server: String,

    /// Optional bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Namespace to publish into, overriding the broadcaster default
    #[serde(default)]
    pub namespace: Option<String>,

    /// Accept self-signed peer certificates
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Request timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse credentials from YAML and check the server URL
pub fn parse_credentials(content: &str) -> Result<PeerCredentials, CredentialsError> {
    let creds: PeerCredentials =
        serde_yaml::from_str(content).map_err(|e| CredentialsError::ParseError(e.to_string()))?;
    creds.validate()?;
    Ok(creds)
}

impl PeerCredentials {
    /// Server URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.server.trim_end_matches('/')
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    fn validate(&self) -> Result<(), CredentialsError> {
        let server = self.server.trim();
        let has_scheme = server.starts_with("http://") || server.starts_with("https://");
        let host = server
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        if !has_scheme || host.is_empty() {
            return Err(CredentialsError::InvalidServer(self.server.clone()));
        }
        Ok(())
    }
}
