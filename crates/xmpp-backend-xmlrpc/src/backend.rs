use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client as HttpClient;
use tracing::{debug, error, instrument};
use xmpp_backend_core::ejabberd::{self, LastActivity, RawSession};
use xmpp_backend_core::{
    datetime_to_timestamp, ApiVersion, Jid, Result, Stat, UserSession, VersionCache, XmppBackend,
    XmppBackendError, DEFAULT_VERSION_CACHE_TTL,
};

use crate::codec::{decode_response, encode_call, CodecError, Value};

pub const DEFAULT_URI: &str = "http://127.0.0.1:4560";

/// Account used to authenticate calls when the listener requires it.
#[derive(Debug, Clone)]
pub struct XmlRpcCredentials {
    pub user: String,
    pub server: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct XmlRpcConfig {
    pub uri: String,
    pub credentials: Option<XmlRpcCredentials>,
    pub timeout: Option<Duration>,
    pub version_cache_ttl: Duration,
    /// Skip version probing and assume this release.
    pub api_version: Option<ApiVersion>,
}

impl Default for XmlRpcConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            credentials: None,
            timeout: None,
            version_cache_ttl: DEFAULT_VERSION_CACHE_TTL,
            api_version: None,
        }
    }
}

/// Backend for the ejabberd XML-RPC listener.
///
/// Every call passes its arguments as one struct, preceded by a credentials struct if
/// credentials are configured.
#[derive(Debug)]
pub struct EjabberdXmlRpcBackend {
    http_client: HttpClient,
    uri: String,
    credentials: Option<Value>,
    version: VersionCache,
}

impl EjabberdXmlRpcBackend {
    pub fn new(config: XmlRpcConfig) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| {
            XmppBackendError::InvalidBackend(format!("Failed to build HTTP client: {}", e))
        })?;

        let credentials = config.credentials.map(|credentials| {
            Value::structure([
                ("user", Value::from(credentials.user)),
                ("server", Value::from(credentials.server)),
                ("password", Value::from(credentials.password)),
                ("admin", Value::from(true)),
            ])
        });

        Ok(Self {
            http_client,
            uri: config.uri,
            credentials,
            version: VersionCache::new(config.version_cache_ttl)
                .with_minimum(ejabberd::MINIMUM_VERSION)
                .with_pinned(config.api_version),
        })
    }

    /// Run one call. Transport failures are errors; the decoded result (or fault) is
    /// returned as is.
    #[instrument(skip(self, params), level = "debug")]
    async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, CodecError>> {
        let mut call = Vec::with_capacity(2);
        if let Some(credentials) = &self.credentials {
            call.push(credentials.clone());
        }
        call.push(params);

        let response = self
            .http_client
            .post(&self.uri)
            .header(CONTENT_TYPE, "text/xml")
            .body(encode_call(method, &call))
            .send()
            .await
            .map_err(|e| XmppBackendError::connection(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| XmppBackendError::connection(format!("{} failed: {}", method, e)))?;
        debug!("HTTP {} from {} ({} bytes)", status.as_u16(), method, body.len());

        if !status.is_success() {
            return Err(XmppBackendError::backend(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(decode_response(&body))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        self.call(method, params).await?.map_err(|e| {
            error!("{} failed: {}", method, e);
            XmppBackendError::backend(e.to_string())
        })
    }

    fn account(username: &str, domain: &str) -> Value {
        Value::structure([("user", Value::from(username)), ("host", Value::from(domain))])
    }

    fn res_code(result: &Value, method: &str) -> Result<i64> {
        result
            .get("res")
            .and_then(Value::as_i64)
            .ok_or_else(|| XmppBackendError::backend(format!("{} returned no result code", method)))
    }

    fn error_text(result: &Value) -> String {
        result
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string()
    }

    fn expect_success(result: &Value, method: &str) -> Result<()> {
        match Self::res_code(result, method)? {
            0 => Ok(()),
            _ => Err(XmppBackendError::backend(Self::error_text(result))),
        }
    }

    fn yes_no(result: &Value, method: &str) -> Result<bool> {
        match Self::res_code(result, method)? {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(XmppBackendError::backend(Self::error_text(result))),
        }
    }

    fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
        value
            .get(key)
            .ok_or_else(|| XmppBackendError::backend(format!("Missing field {} in response", key)))
    }

    fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
        Self::field(value, key)?
            .as_str()
            .ok_or_else(|| XmppBackendError::backend(format!("Field {} is not a string", key)))
    }

    /// Session entries are wrapped in a single-member struct (`session`, `sessions`).
    fn unwrap_entry(entry: &Value) -> &Value {
        match entry {
            Value::Struct(members) if members.len() == 1 => &members[0].1,
            _ => entry,
        }
    }

    fn raw_session(fields: &Value) -> Result<RawSession<'_>> {
        let optional = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or_default();
        Ok(RawSession {
            connection: Self::str_field(fields, "connection")?,
            ip: Self::str_field(fields, "ip")?,
            priority: fields
                .get("priority")
                .and_then(Value::as_i64)
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or_default(),
            uptime: fields.get("uptime").and_then(Value::as_i64).unwrap_or_default(),
            status: optional("status"),
            resource: Self::str_field(fields, "resource")?,
            status_text: optional("statustext"),
        })
    }

    fn list<'a>(result: &'a Value, key: &str) -> Result<&'a [Value]> {
        Self::field(result, key)?
            .as_array()
            .ok_or_else(|| XmppBackendError::backend(format!("Field {} is not a list", key)))
    }
}

#[async_trait]
impl XmppBackend for EjabberdXmlRpcBackend {
    fn version_cache(&self) -> &VersionCache {
        &self.version
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_api_version(&self) -> Result<ApiVersion> {
        let result = self.rpc("status", Value::Struct(Vec::new())).await?;
        let status = match &result {
            Value::String(status) => status.as_str(),
            _ => result
                .get("res")
                .and_then(Value::as_str)
                .or_else(|| result.get("text").and_then(Value::as_str))
                .unwrap_or_default(),
        };
        ejabberd::parse_status_string(status)
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_exists(&self, username: &str, domain: &str) -> Result<bool> {
        let result = self.rpc("check_account", Self::account(username, domain)).await?;
        Self::yes_no(&result, "check_account")
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_users(&self, domain: &str) -> Result<HashSet<String>> {
        let result = self
            .rpc("registered_users", Value::structure([("host", Value::from(domain))]))
            .await?;
        Self::list(&result, "users")?
            .iter()
            .map(|user| Self::str_field(user, "username").map(str::to_string))
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_domains(&self) -> Result<Vec<String>> {
        let result = self
            .rpc("registered_vhosts", Value::Struct(Vec::new()))
            .await?;
        Self::list(&result, "vhosts")?
            .iter()
            .map(|vhost| Self::str_field(vhost, "vhost").map(str::to_string))
            .collect()
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn create_user(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("password", Value::from(password)),
        ]);
        let result = match self.call("register", params).await? {
            Ok(result) => result,
            Err(CodecError::Fault { message, .. }) if message.contains("already registered") => {
                return Err(XmppBackendError::UserExists);
            }
            Err(e) => return Err(XmppBackendError::backend(e.to_string())),
        };

        match Self::res_code(&result, "register")? {
            0 => {}
            1 => return Err(XmppBackendError::UserExists),
            _ => return Err(XmppBackendError::backend(Self::error_text(&result))),
        }

        // Not recording the registration time only matters in edge cases.
        if let Err(e) = self
            .set_last_activity(username, domain, "Registered", None)
            .await
        {
            error!("Error setting last activity: {}", e);
        }

        if let Some(email) = email {
            self.set_email(username, domain, email).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_user(&self, username: &str, domain: &str) -> Result<()> {
        let result = self.rpc("unregister", Self::account(username, domain)).await?;
        Self::expect_success(&result, "unregister")
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn check_password(&self, username: &str, domain: &str, password: &str) -> Result<bool> {
        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("password", Value::from(password)),
        ]);
        let result = self.rpc("check_password", params).await?;
        Self::yes_no(&result, "check_password")
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()> {
        // These releases silently create missing accounts on change_password.
        if self.api_version().await? <= ejabberd::CHANGE_PASSWORD_CREATES_USER
            && !self.user_exists(username, domain).await?
        {
            return Err(XmppBackendError::user_not_found(username, domain));
        }

        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("newpass", Value::from(password)),
        ]);
        match self.call("change_password", params).await? {
            Ok(result) => Self::expect_success(&result, "change_password"),
            Err(e) => {
                // Newer releases fault on missing accounts.
                if !self.user_exists(username, domain).await? {
                    return Err(XmppBackendError::user_not_found(username, domain));
                }
                Err(XmppBackendError::backend(e.to_string()))
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_user(&self, username: &str, domain: &str) -> Result<()> {
        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("reason", Value::from("Blocked.")),
        ]);
        let result = self.rpc("ban_account", params).await?;
        Self::expect_success(&result, "ban_account")
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_last_activity(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let version = self.api_version().await?;
        let result = self.rpc("get_last", Self::account(username, domain)).await?;
        let value = Self::field(&result, "last_activity")?;

        let last = if version < ejabberd::STRUCTURED_LAST_ACTIVITY {
            let value = value.as_str().ok_or_else(|| {
                XmppBackendError::backend("Field last_activity is not a string")
            })?;
            LastActivity::parse_legacy(value)?
        } else {
            LastActivity::parse_structured(
                Self::str_field(value, "timestamp")?,
                Self::str_field(value, "status")?,
            )?
        };

        if last == LastActivity::Never && !self.user_exists(username, domain).await? {
            return Err(XmppBackendError::user_not_found(username, domain));
        }
        Ok(last.timestamp())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_last_activity(
        &self,
        username: &str,
        domain: &str,
        status: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let timestamp = datetime_to_timestamp(timestamp.unwrap_or_else(Utc::now));
        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("timestamp", Value::from(timestamp)),
            ("status", Value::from(status)),
        ]);
        let result = self.rpc("set_last", params).await?;
        Self::expect_success(&result, "set_last")
    }

    /// Sent as a `normal` message, since headline messages are not stored offline.
    #[instrument(skip(self, message), level = "debug")]
    async fn message_user(
        &self,
        username: &str,
        domain: &str,
        subject: &str,
        message: &str,
    ) -> Result<()> {
        let params = Value::structure([
            ("type", Value::from("normal")),
            ("from", Value::from(domain)),
            ("to", Value::from(Jid::new(username, domain).to_string())),
            ("subject", Value::from(subject)),
            ("body", Value::from(message)),
        ]);
        let result = self.rpc("send_message", params).await?;
        Self::expect_success(&result, "send_message")
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_sessions(&self, username: &str, domain: &str) -> Result<HashSet<UserSession>> {
        let result = self
            .rpc("user_sessions_info", Self::account(username, domain))
            .await?;

        Self::list(&result, "sessions_info")?
            .iter()
            .map(|entry| {
                Self::raw_session(Self::unwrap_entry(entry))?.into_session(username, domain)
            })
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_user_sessions(&self) -> Result<HashSet<UserSession>> {
        let result = self
            .rpc("connected_users_info", Value::Struct(Vec::new()))
            .await?;

        let sessions = Self::list(&result, "connected_users_info")?
            .iter()
            .map(|entry| {
                let fields = Self::unwrap_entry(entry);
                let jid: Jid = Self::str_field(fields, "jid")?.parse()?;
                Self::raw_session(fields)?.into_session(&jid.node, &jid.domain)
            })
            .collect::<Result<HashSet<_>>>()?;

        debug!("Found {} connected sessions", sessions.len());
        Ok(sessions)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_user_session(
        &self,
        username: &str,
        domain: &str,
        resource: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let params = Value::structure([
            ("user", Value::from(username)),
            ("host", Value::from(domain)),
            ("resource", Value::from(resource)),
            ("reason", Value::from(reason.unwrap_or_default())),
        ]);
        let result = self.rpc("kick_session", params).await?;
        Self::expect_success(&result, "kick_session")
    }

    #[instrument(skip(self), level = "debug")]
    async fn stats(&self, stat: Stat, domain: Option<&str>) -> Result<u64> {
        let name = Value::from(ejabberd::stat_name(stat));
        let result = match domain {
            Some(host) => {
                self.rpc(
                    "stats_host",
                    Value::structure([("name", name), ("host", Value::from(host))]),
                )
                .await?
            }
            None => self.rpc("stats", Value::structure([("name", name)])).await?,
        };

        Self::field(&result, "stat")?
            .as_i64()
            .and_then(|stat| u64::try_from(stat).ok())
            .ok_or_else(|| XmppBackendError::backend("Field stat is not a count"))
    }
}
