//! Cloudflare Workers KV over its REST API.

use crate::error::{CacheError, Result};
use crate::kv::EdgeKvStore;
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Workers KV rejects expirations shorter than a minute.
const MIN_EXPIRATION_TTL_SECS: u64 = 60;

#[derive(Clone, Serialize, Deserialize)]
pub struct CloudflareKvConfig {
    pub api_base: String,
    pub account_id: String,
    pub namespace_id: String,
    pub api_token: String,
    pub request_timeout_ms: u64,
}

impl std::fmt::Debug for CloudflareKvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareKvConfig")
            .field("api_base", &self.api_base)
            .field("account_id", &self.account_id)
            .field("namespace_id", &self.namespace_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl CloudflareKvConfig {
    pub fn new(
        account_id: impl Into<String>,
        namespace_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            account_id: account_id.into(),
            namespace_id: namespace_id.into(),
            api_token: api_token.into(),
            request_timeout_ms: 2000,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[derive(Debug, Serialize)]
struct BulkWrite<'a> {
    key: &'a str,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: Vec<KeyName>,
    #[serde(default)]
    result_info: Option<ListInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListInfo {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloudflareKvStore {
    client: Client,
    namespace_url: Url,
}

impl CloudflareKvStore {
    pub fn new(config: CloudflareKvConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let bearer = header::HeaderValue::try_from(format!("Bearer {}", config.api_token))
            .map_err(|e| CacheError::Configuration(format!("invalid API token: {e}")))?;
        headers.insert(header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()?;

        let mut namespace_url = Url::parse(&config.api_base)
            .map_err(|e| CacheError::Configuration(format!("invalid api_base: {e}")))?;
        namespace_url
            .path_segments_mut()
            .map_err(|_| CacheError::Configuration("api_base cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend([
                "accounts",
                config.account_id.as_str(),
                "storage",
                "kv",
                "namespaces",
                config.namespace_id.as_str(),
            ]);

        Ok(Self {
            client,
            namespace_url,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.namespace_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.url(segments))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CacheError::RemoteStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl EdgeKvStore for CloudflareKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self.request(Method::GET, &["values", key]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.text().await?))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_seconds: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let write = BulkWrite {
            key,
            value,
            expiration_ttl: ttl_seconds.map(|ttl| ttl.max(MIN_EXPIRATION_TTL_SECS)),
            metadata,
        };
        let response = self
            .request(Method::PUT, &["bulk"])
            .json(&[write])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.request(Method::DELETE, &["values", key]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::GET, &["keys"])
                .query(&[("prefix", prefix)]);
            if let Some(cursor) = cursor.as_deref() {
                request = request.query(&[("cursor", cursor)]);
            }

            let response = Self::check(request.send().await?).await?;
            let page: ListResponse = response.json().await?;
            keys.extend(page.result.into_iter().map(|k| k.name));

            cursor = page
                .result_info
                .and_then(|info| info.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
            debug!(prefix, fetched = keys.len(), "following KV list cursor");
        }

        Ok(keys)
    }

    fn provider(&self) -> &'static str {
        "cloudflare"
    }
}
