use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};
use xmpp_backend_core::{ApiVersion, Result, XmppBackendError, DEFAULT_VERSION_CACHE_TTL};

pub const DEFAULT_URI: &str = "http://127.0.0.1:5280/api/";

/// Connection settings for the REST backend.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URI of the API; a trailing `/` is added if missing.
    pub uri: String,
    /// Extra headers sent with every request. `X-Admin: true` is always added.
    pub headers: HashMap<String, String>,
    /// HTTP basic auth credentials.
    pub http_auth: Option<(String, String)>,
    /// Per-request timeout. Timeouts surface as connection errors.
    pub timeout: Option<Duration>,
    pub version_cache_ttl: Duration,
    /// Skip version probing and assume this release.
    pub api_version: Option<ApiVersion>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            headers: HashMap::new(),
            http_auth: None,
            timeout: None,
            version_cache_ttl: DEFAULT_VERSION_CACHE_TTL,
            api_version: None,
        }
    }
}

/// A response that passed the status allow-list.
#[derive(Debug)]
pub(crate) struct RestResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            XmppBackendError::backend(format!(
                "Unexpected response body ({}): {}",
                e,
                String::from_utf8_lossy(&self.body)
            ))
        })
    }

    /// ejabberd answers yes/no commands with `0` (yes) or `1` (no).
    pub fn res_code(&self) -> Result<i64> {
        self.json::<i64>()
    }
}

/// Thin HTTP layer: one POST per command, status checked against an allow-list.
#[derive(Debug)]
pub(crate) struct RestClient {
    http_client: HttpClient,
    base_uri: String,
    headers: HeaderMap,
    http_auth: Option<(String, String)>,
}

impl RestClient {
    pub fn new(config: &RestConfig) -> Result<Self> {
        let mut base_uri = config.uri.clone();
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                XmppBackendError::InvalidBackend(format!("Invalid header name {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                XmppBackendError::InvalidBackend(format!("Invalid header value: {}", e))
            })?;
            headers.insert(name, value);
        }
        headers
            .entry(HeaderName::from_static("x-admin"))
            .or_insert(HeaderValue::from_static("true"));

        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| {
            XmppBackendError::InvalidBackend(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            http_client,
            base_uri,
            headers,
            http_auth: config.http_auth.clone(),
        })
    }

    /// POST `payload` to `command`; any status outside `allowed_status` is an error.
    #[instrument(skip(self, payload), level = "debug")]
    pub async fn post<P: Serialize + ?Sized>(
        &self,
        command: &str,
        payload: &P,
        allowed_status: &[StatusCode],
    ) -> Result<RestResponse> {
        let url = format!("{}{}", self.base_uri, command);

        let mut request = self
            .http_client
            .post(&url)
            .headers(self.headers.clone())
            .json(payload);
        if let Some((user, password)) = &self.http_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| XmppBackendError::connection(format!("{} failed: {}", command, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| XmppBackendError::connection(format!("{} failed: {}", command, e)))?
            .to_vec();

        debug!(
            "HTTP {} from {} ({} bytes)",
            status.as_u16(),
            command,
            body.len()
        );

        if !allowed_status.contains(&status) {
            return Err(XmppBackendError::backend(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(RestResponse { status, body })
    }

    pub async fn post_ok<P: Serialize + ?Sized>(
        &self,
        command: &str,
        payload: &P,
    ) -> Result<RestResponse> {
        self.post(command, payload, &[StatusCode::OK]).await
    }
}
