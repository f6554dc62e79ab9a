//! Object store reached over the cluster REST API
//!
//! Paths follow the usual layout:
//! - `/api/v1/namespaces/{ns}/configmaps`
//! - `/api/v1/nodes?labelSelector=...`
//! - `/apis/protocol.peering.io/v1/namespaces/{ns}/advertisements/{name}`
//!
//! Watches are long-lived GETs answered with one JSON event per line.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ObjectStore, StoreError, WatchStream};
use crate::cluster::{
    Advertisement, ConfigRecord, LabelSelector, Node, ResourceList, WatchEvent,
    ADVERTISEMENT_API_VERSION, ADVERTISEMENT_KIND,
};
use crate::credentials::PeerCredentials;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest watch event line accepted from a peer
const MAX_WATCH_LINE: usize = 1 << 20;

/// REST client for one cluster
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpObjectStore {
    /// Create a client for `base_url`
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        Self::build(base_url.into(), token, timeout, false)
    }

    /// Create a client from a peer descriptor's credentials
    pub fn from_credentials(creds: &PeerCredentials) -> Result<Self, StoreError> {
        Self::build(
            creds.base_url().to_string(),
            creds.token.clone(),
            Duration::from_secs(creds.timeout_secs()),
            creds.insecure_skip_tls_verify,
        )
    }

    fn build(
        base_url: String,
        token: Option<String>,
        timeout: Duration,
        insecure: bool,
    ) -> Result<Self, StoreError> {
        // No client-wide timeout: it would cut watch streams short
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .user_agent(concat!("capacity-broadcaster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    /// Rebuild the client so it accepts self-signed certificates
    pub fn with_insecure(self, insecure: bool) -> Result<Self, StoreError> {
        if !insecure {
            return Ok(self);
        }
        Self::build(self.base_url, self.token, self.timeout, true)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn advertisements_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/{}/namespaces/{}/advertisements",
            self.base_url, ADVERTISEMENT_API_VERSION, namespace
        )
    }

    fn advertisement_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.advertisements_url(namespace), name)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        self.authorize(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))
    }
}

async fn api_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    StoreError::Api { status, message }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| StoreError::Parse(e.to_string()))
}

/// Decode one line of a watch stream
///
/// Servers report watch failures in-band as an `ERROR` event whose object
/// is a status with `code` and `message`.
fn parse_watch_line(line: &[u8]) -> Result<WatchEvent<Advertisement>, StoreError> {
    let value: serde_json::Value =
        serde_json::from_slice(line).map_err(|e| StoreError::Parse(e.to_string()))?;

    if value.get("type").and_then(|t| t.as_str()) == Some("ERROR") {
        let object = value.get("object");
        let status = object
            .and_then(|o| o.get("code"))
            .and_then(|c| c.as_u64())
            .unwrap_or(500) as u16;
        let message = object
            .and_then(|o| o.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("watch error")
            .to_string();
        return Err(StoreError::Api { status, message });
    }

    serde_json::from_value(value).map_err(|e| StoreError::Parse(e.to_string()))
}

type ByteStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

/// Split a chunked body into newline-delimited watch events
fn watch_events(body: ByteStream) -> WatchStream {
    futures::stream::unfold(
        (body, Vec::<u8>::new(), false),
        |(mut body, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some((parse_watch_line(&line), (body, buf, done)));
                }

                if buf.len() > MAX_WATCH_LINE {
                    let err = StoreError::Parse(format!(
                        "watch event exceeds {} bytes without a line break",
                        MAX_WATCH_LINE
                    ));
                    return Some((Err(err), (body, Vec::new(), true)));
                }

                if done {
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    let rest = std::mem::take(&mut buf);
                    return Some((parse_watch_line(&rest), (body, buf, done)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), (body, buf, true))),
                    None => done = true,
                }
            }
        },
    )
    .boxed()
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list_config_records(&self, namespace: &str) -> Result<Vec<ConfigRecord>, StoreError> {
        let url = format!("{}/api/v1/namespaces/{}/configmaps", self.base_url, namespace);
        let response = self.send(self.client.get(&url)).await?;
        let list: ResourceList<ConfigRecord> = parse_json(response).await?;
        Ok(list.items)
    }

    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, StoreError> {
        let url = format!("{}/api/v1/nodes", self.base_url);
        let mut req = self.client.get(&url);
        if !selector.is_empty() {
            req = req.query(&[("labelSelector", selector.to_string())]);
        }
        let response = self.send(req).await?;
        let list: ResourceList<Node> = parse_json(response).await?;
        Ok(list.items)
    }

    async fn get_advertisement(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Advertisement>, StoreError> {
        let url = self.advertisement_url(namespace, name);
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_json(response).await.map(Some)
    }

    async fn create_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError> {
        let url = self.advertisements_url(&adv.metadata.namespace);
        let response = self.send(self.client.post(&url).json(adv)).await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::already_exists(
                ADVERTISEMENT_KIND,
                &adv.metadata.name,
            ));
        }
        parse_json(response).await
    }

    async fn update_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError> {
        let url = self.advertisement_url(&adv.metadata.namespace, &adv.metadata.name);
        let response = self.send(self.client.put(&url).json(adv)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(
                ADVERTISEMENT_KIND,
                &adv.metadata.name,
            )),
            StatusCode::CONFLICT => Err(StoreError::conflict(
                ADVERTISEMENT_KIND,
                &adv.metadata.name,
            )),
            _ => parse_json(response).await,
        }
    }

    async fn watch_advertisement(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
    ) -> Result<WatchStream, StoreError> {
        let url = self.advertisements_url(namespace);
        let mut query = vec![
            ("watch", "true".to_string()),
            ("fieldSelector", format!("metadata.name={}", name)),
        ];
        if let Some(rv) = resource_version {
            query.push(("resourceVersion", rv));
        }

        debug!("Opening watch on {}/{} at {}", namespace, name, self.base_url);
        let response = self
            .authorize(self.client.get(&url).query(&query))
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| StoreError::Http(e.to_string()))
            })
            .boxed();

        Ok(watch_events(body))
    }
}
