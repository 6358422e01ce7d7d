use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use tracing::{debug, error, instrument};
use xmpp_backend_core::ejabberd::{self, LastActivity};
use xmpp_backend_core::{
    datetime_to_timestamp, ApiVersion, Jid, Result, Stat, UserSession, VersionCache, XmppBackend,
    XmppBackendError,
};

use crate::client::{RestClient, RestConfig, RestResponse};
use crate::types::{
    Account, BanAccount, ChangePassword, ConnectedUserInfo, Empty, Host, KickSession, LastInfo,
    Register, SendMessage, SessionInfo, SetLast, StatResult, Stats, StatsHost,
};

/// Backend for the ejabberd REST API (`mod_http_api`).
///
/// Requests carry `X-Admin: true`; configure the API so the calling host is allowed to
/// run admin commands.
#[derive(Debug)]
pub struct EjabberdRestBackend {
    client: RestClient,
    version: VersionCache,
}

impl EjabberdRestBackend {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = RestClient::new(&config)?;
        let version = VersionCache::new(config.version_cache_ttl)
            .with_minimum(ejabberd::MINIMUM_VERSION)
            .with_pinned(config.api_version);
        Ok(Self { client, version })
    }

    /// Interpret a yes/no command result.
    fn yes_no(response: &RestResponse, command: &str) -> Result<bool> {
        match response.res_code()? {
            0 => Ok(true),
            1 => Ok(false),
            other => Err(XmppBackendError::backend(format!(
                "{} returned unexpected code {}",
                command, other
            ))),
        }
    }

    fn parse_last(version: ApiVersion, response: &RestResponse) -> Result<LastActivity> {
        if version < ejabberd::STRUCTURED_LAST_ACTIVITY {
            LastActivity::parse_legacy(&response.json::<String>()?)
        } else {
            let info: LastInfo = response.json()?;
            LastActivity::parse_structured(&info.timestamp, &info.status)
        }
    }
}

#[async_trait]
impl XmppBackend for EjabberdRestBackend {
    fn version_cache(&self) -> &VersionCache {
        &self.version
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_api_version(&self) -> Result<ApiVersion> {
        let response = self.client.post_ok("status", &Empty {}).await?;
        ejabberd::parse_status_string(&response.json::<String>()?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_exists(&self, username: &str, domain: &str) -> Result<bool> {
        let response = self
            .client
            .post_ok("check_account", &Account { user: username, host: domain })
            .await?;
        Self::yes_no(&response, "check_account")
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_users(&self, domain: &str) -> Result<HashSet<String>> {
        let response = self
            .client
            .post_ok("registered_users", &Host { host: domain })
            .await?;
        Ok(response.json::<Vec<String>>()?.into_iter().collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_domains(&self) -> Result<Vec<String>> {
        let response = self.client.post_ok("registered_vhosts", &Empty {}).await?;
        response.json()
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn create_user(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let response = self
            .client
            .post(
                "register",
                &Register {
                    user: username,
                    host: domain,
                    password,
                },
                &[StatusCode::OK, StatusCode::CONFLICT],
            )
            .await?;

        if response.status == StatusCode::CONFLICT {
            return Err(XmppBackendError::UserExists);
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
        self.client
            .post_ok("unregister", &Account { user: username, host: domain })
            .await?;
        Ok(())
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn check_password(&self, username: &str, domain: &str, password: &str) -> Result<bool> {
        let response = self
            .client
            .post_ok(
                "check_password",
                &Register {
                    user: username,
                    host: domain,
                    password,
                },
            )
            .await?;
        Self::yes_no(&response, "check_password")
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()> {
        // These releases silently create missing accounts on change_password.
        if self.api_version().await? <= ejabberd::CHANGE_PASSWORD_CREATES_USER
            && !self.user_exists(username, domain).await?
        {
            return Err(XmppBackendError::user_not_found(username, domain));
        }

        let response = self
            .client
            .post(
                "change_password",
                &ChangePassword {
                    user: username,
                    host: domain,
                    newpass: password,
                },
                &[StatusCode::OK, StatusCode::NOT_FOUND],
            )
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            return Err(XmppBackendError::user_not_found(username, domain));
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_user(&self, username: &str, domain: &str) -> Result<()> {
        self.client
            .post_ok(
                "ban_account",
                &BanAccount {
                    user: username,
                    host: domain,
                    reason: "Blocked.",
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_last_activity(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let version = self.api_version().await?;
        let response = self
            .client
            .post_ok("get_last", &Account { user: username, host: domain })
            .await?;

        let last = Self::parse_last(version, &response)?;
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
        self.client
            .post_ok(
                "set_last",
                &SetLast {
                    user: username,
                    host: domain,
                    timestamp,
                    status,
                },
            )
            .await?;
        Ok(())
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
        let to = Jid::new(username, domain).to_string();
        self.client
            .post_ok(
                "send_message",
                &SendMessage {
                    message_type: "normal",
                    from: domain,
                    to: &to,
                    subject,
                    body: message,
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_sessions(&self, username: &str, domain: &str) -> Result<HashSet<UserSession>> {
        let response = self
            .client
            .post_ok("user_sessions_info", &Account { user: username, host: domain })
            .await?;

        response
            .json::<Vec<SessionInfo>>()?
            .iter()
            .map(|info| info.raw().into_session(username, domain))
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_user_sessions(&self) -> Result<HashSet<UserSession>> {
        let response = self
            .client
            .post_ok("connected_users_info", &Empty {})
            .await?;

        let sessions = response
            .json::<Vec<ConnectedUserInfo>>()?
            .iter()
            .map(|info| {
                let jid: Jid = info.jid.parse()?;
                info.session.raw().into_session(&jid.node, &jid.domain)
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
        self.client
            .post_ok(
                "kick_session",
                &KickSession {
                    user: username,
                    host: domain,
                    resource,
                    reason: reason.unwrap_or_default(),
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stats(&self, stat: Stat, domain: Option<&str>) -> Result<u64> {
        let name = ejabberd::stat_name(stat);
        let response = match domain {
            Some(host) => {
                self.client
                    .post_ok("stats_host", &StatsHost { name, host })
                    .await?
            }
            None => self.client.post_ok("stats", &Stats { name }).await?,
        };
        Ok(response.json::<StatResult>()?.stat)
    }
}
