use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::process::Command;
use tracing::{debug, error, instrument};
use xmpp_backend_core::ejabberd::{self, LastActivity};
use xmpp_backend_core::{
    datetime_to_timestamp, ApiVersion, Jid, Result, Stat, UserSession, VersionCache, XmppBackend,
    XmppBackendError, DEFAULT_VERSION_CACHE_TTL,
};

use crate::output::{parse_session_line, split_connected_line, CtlOutput};

pub const DEFAULT_EJABBERDCTL_PATH: &str = "/usr/sbin/ejabberdctl";

#[derive(Debug, Clone)]
pub struct CtlConfig {
    pub path: PathBuf,
    /// Upper bound for one invocation. The process is killed when it is exceeded.
    pub timeout: Option<Duration>,
    pub version_cache_ttl: Duration,
    /// Skip version probing and assume this release.
    pub api_version: Option<ApiVersion>,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_EJABBERDCTL_PATH),
            timeout: None,
            version_cache_ttl: DEFAULT_VERSION_CACHE_TTL,
            api_version: None,
        }
    }
}

#[derive(Debug)]
pub struct EjabberdctlBackend {
    path: PathBuf,
    timeout: Option<Duration>,
    version: VersionCache,
}

impl EjabberdctlBackend {
    pub fn new(config: CtlConfig) -> Self {
        Self {
            path: config.path,
            timeout: config.timeout,
            version: VersionCache::new(config.version_cache_ttl)
                .with_minimum(ejabberd::MINIMUM_VERSION)
                .with_pinned(config.api_version),
        }
    }

    /// Run `ejabberdctl <command> <args...>`.
    #[instrument(skip(self, args), level = "debug")]
    async fn ctl(&self, command: &str, args: &[&str]) -> Result<CtlOutput> {
        let mut cmd = Command::new(&self.path);
        cmd.arg(command)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| {
                    XmppBackendError::connection(format!(
                        "{} timed out after {:?}",
                        command, timeout
                    ))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            error!("Failed to execute {}: {}", self.path.display(), e);
            XmppBackendError::connection(format!(
                "Could not run {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let output = CtlOutput::from_output(command, output)?;
        debug!("{} exited with {}", command, output.code);
        Ok(output)
    }
}

#[async_trait]
impl XmppBackend for EjabberdctlBackend {
    fn version_cache(&self) -> &VersionCache {
        &self.version
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_api_version(&self) -> Result<ApiVersion> {
        let output = self.ctl("status", &[]).await?;
        output.expect_success("status")?;
        ejabberd::parse_status_string(&output.stdout)
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_exists(&self, username: &str, domain: &str) -> Result<bool> {
        self.ctl("check_account", &[username, domain])
            .await?
            .yes_no("check_account")
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_users(&self, domain: &str) -> Result<HashSet<String>> {
        let output = self.ctl("registered_users", &[domain]).await?;
        output.expect_success("registered_users")?;
        Ok(output.lines().map(str::to_string).collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_domains(&self) -> Result<Vec<String>> {
        let output = self.ctl("registered_vhosts", &[]).await?;
        output.expect_success("registered_vhosts")?;
        Ok(output.lines().map(str::to_string).collect())
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn create_user(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let output = self.ctl("register", &[username, domain, password]).await?;
        match output.code {
            0 => {}
            1 => return Err(XmppBackendError::UserExists),
            _ => return Err(output.error("register")),
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

    /// `unregister` also exits with 0 if the account does not exist.
    #[instrument(skip(self), level = "debug")]
    async fn remove_user(&self, username: &str, domain: &str) -> Result<()> {
        self.ctl("unregister", &[username, domain])
            .await?
            .expect_success("unregister")
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn check_password(&self, username: &str, domain: &str, password: &str) -> Result<bool> {
        self.ctl("check_password", &[username, domain, password])
            .await?
            .yes_no("check_password")
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()> {
        // change_password exits with 0 for missing accounts.
        if !self.user_exists(username, domain).await? {
            return Err(XmppBackendError::user_not_found(username, domain));
        }
        self.ctl("change_password", &[username, domain, password])
            .await?
            .expect_success("change_password")
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_user(&self, username: &str, domain: &str) -> Result<()> {
        self.ctl("ban_account", &[username, domain, "Blocked."])
            .await?
            .expect_success("ban_account")
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_last_activity(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let version = self.api_version().await?;
        let output = self.ctl("get_last", &[username, domain]).await?;
        output.expect_success("get_last")?;

        let value = output.stdout.trim();
        let last = if version < ejabberd::STRUCTURED_LAST_ACTIVITY {
            LastActivity::parse_legacy(value)?
        } else {
            let (timestamp, status) = value.split_once('\t').ok_or_else(|| {
                XmppBackendError::backend(format!("Could not parse last activity: {}", value))
            })?;
            LastActivity::parse_structured(timestamp, status)?
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
        let timestamp = datetime_to_timestamp(timestamp.unwrap_or_else(Utc::now)).to_string();
        self.ctl("set_last", &[username, domain, &timestamp, status])
            .await?
            .expect_success("set_last")
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
        self.ctl("send_message", &["normal", domain, &to, subject, message])
            .await?
            .expect_success("send_message")
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_sessions(&self, username: &str, domain: &str) -> Result<HashSet<UserSession>> {
        let output = self.ctl("user_sessions_info", &[username, domain]).await?;
        output.expect_success("user_sessions_info")?;

        output
            .lines()
            .map(|line| parse_session_line(line)?.into_session(username, domain))
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn all_user_sessions(&self) -> Result<HashSet<UserSession>> {
        let output = self.ctl("connected_users_info", &[]).await?;
        output.expect_success("connected_users_info")?;

        let sessions = output
            .lines()
            .map(|line| {
                let (jid, session) = split_connected_line(line)?;
                let jid: Jid = jid.parse()?;
                parse_session_line(session)?.into_session(&jid.node, &jid.domain)
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
        self.ctl(
            "kick_session",
            &[username, domain, resource, reason.unwrap_or_default()],
        )
        .await?
        .expect_success("kick_session")
    }

    #[instrument(skip(self), level = "debug")]
    async fn stats(&self, stat: Stat, domain: Option<&str>) -> Result<u64> {
        let name = ejabberd::stat_name(stat);
        let output = match domain {
            Some(host) => self.ctl("stats_host", &[name, host]).await?,
            None => self.ctl("stats", &[name]).await?,
        };
        output.expect_success("stats")?;

        let value = output.stdout.trim();
        value
            .parse()
            .map_err(|_| XmppBackendError::backend(format!("Invalid stat value: {}", value)))
    }
}
