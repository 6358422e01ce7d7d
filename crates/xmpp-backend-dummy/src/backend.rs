use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::multiple::RefMulti;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use xmpp_backend_core::{
    ApiVersion, ConnectionType, Jid, Result, Stat, UserSession, VersionCache, XmppBackend,
    XmppBackendError,
};

pub const DUMMY_API_VERSION: ApiVersion = ApiVersion::new(1, 0);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DummyConfig {
    /// Domains reported by `all_domains`.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// A message delivered with `message_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub sent: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    email: Option<String>,
    last_activity: (DateTime<Utc>, String),
    /// Set by `block_user`; the password can no longer be used.
    blocked: bool,
    sessions: HashSet<UserSession>,
    messages: Vec<Message>,
}

/// Backend keeping every account in a concurrent map keyed by bare JID.
#[derive(Debug)]
pub struct DummyBackend {
    accounts: DashMap<Jid, Account>,
    domains: Vec<String>,
    version: VersionCache,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl DummyBackend {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            domains: config.domains,
            version: VersionCache::pinned(DUMMY_API_VERSION),
        }
    }

    fn key(username: &str, domain: &str) -> Jid {
        Jid::new(username, domain)
    }

    /// Open a session for `resource`, as if a client had logged in.
    ///
    /// Fails with `UserNotFound` (naming the full JID) if the account does not exist.
    #[instrument(skip(self), level = "debug")]
    pub fn start_user_session(
        &self,
        username: &str,
        domain: &str,
        resource: &str,
    ) -> Result<UserSession> {
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::session_not_found(username, domain, resource))?;

        let session = UserSession {
            username: username.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
            priority: 0,
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            uptime: Utc::now(),
            status: "available".to_string(),
            status_text: String::new(),
            connection_type: ConnectionType::Xmpp,
            encrypted: Some(true),
            compressed: Some(false),
        };
        account.sessions.replace(session.clone());
        debug!("Started session {}", session);
        Ok(session)
    }

    /// Messages delivered to an account, oldest first.
    pub fn messages(&self, username: &str, domain: &str) -> Result<Vec<Message>> {
        self.accounts
            .get(&Self::key(username, domain))
            .map(|account| account.messages.clone())
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))
    }

    /// Accounts in `domain`, or every account.
    fn in_domain<'a>(
        &'a self,
        domain: Option<&'a str>,
    ) -> impl Iterator<Item = RefMulti<'a, Jid, Account>> + 'a {
        self.accounts
            .iter()
            .filter(move |entry| domain.is_none_or(|domain| entry.key().domain == domain))
    }
}

#[async_trait]
impl XmppBackend for DummyBackend {
    fn version_cache(&self) -> &VersionCache {
        &self.version
    }

    async fn get_api_version(&self) -> Result<ApiVersion> {
        Ok(DUMMY_API_VERSION)
    }

    async fn user_exists(&self, username: &str, domain: &str) -> Result<bool> {
        Ok(self.accounts.contains_key(&Self::key(username, domain)))
    }

    async fn all_users(&self, domain: &str) -> Result<HashSet<String>> {
        Ok(self
            .in_domain(Some(domain))
            .map(|entry| entry.key().node.clone())
            .collect())
    }

    async fn all_domains(&self) -> Result<Vec<String>> {
        Ok(self.domains.clone())
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn create_user(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        match self.accounts.entry(Self::key(username, domain)) {
            Entry::Occupied(_) => Err(XmppBackendError::UserExists),
            Entry::Vacant(entry) => {
                entry.insert(Account {
                    password: password.to_string(),
                    email: email.map(str::to_string),
                    last_activity: (Utc::now(), "Registered".to_string()),
                    blocked: false,
                    sessions: HashSet::new(),
                    messages: Vec::new(),
                });
                debug!("Created user {}@{}", username, domain);
                Ok(())
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_user(&self, username: &str, domain: &str) -> Result<()> {
        if self.accounts.remove(&Self::key(username, domain)).is_some() {
            debug!("Removed user {}@{}", username, domain);
        }
        Ok(())
    }

    async fn check_password(&self, username: &str, domain: &str, password: &str) -> Result<bool> {
        Ok(self
            .accounts
            .get(&Self::key(username, domain))
            .is_some_and(|account| !account.blocked && account.password == password))
    }

    #[instrument(skip(self, password), level = "debug")]
    async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))?;
        account.password = password.to_string();
        account.blocked = false;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_user(&self, username: &str, domain: &str) -> Result<()> {
        let password = self.get_random_password();
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))?;
        account.password = password;
        account.blocked = true;
        Ok(())
    }

    async fn has_usable_password(&self, username: &str, domain: &str) -> Result<bool> {
        self.accounts
            .get(&Self::key(username, domain))
            .map(|account| !account.blocked)
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))
    }

    async fn set_email(&self, username: &str, domain: &str, email: &str) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))?;
        account.email = Some(email.to_string());
        Ok(())
    }

    async fn check_email(&self, username: &str, domain: &str, email: &str) -> Result<bool> {
        Ok(self
            .accounts
            .get(&Self::key(username, domain))
            .is_some_and(|account| account.email.as_deref() == Some(email)))
    }

    async fn get_last_activity(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Option<NaiveDateTime>> {
        self.accounts
            .get(&Self::key(username, domain))
            .map(|account| Some(account.last_activity.0.naive_utc()))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))
    }

    async fn set_last_activity(
        &self,
        username: &str,
        domain: &str,
        status: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))?;
        account.last_activity = (timestamp.unwrap_or_else(Utc::now), status.to_string());
        Ok(())
    }

    #[instrument(skip(self, message), level = "debug")]
    async fn message_user(
        &self,
        username: &str,
        domain: &str,
        subject: &str,
        message: &str,
    ) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&Self::key(username, domain))
            .ok_or_else(|| XmppBackendError::user_not_found(username, domain))?;
        account.messages.push(Message {
            subject: subject.to_string(),
            body: message.to_string(),
            sent: Utc::now(),
        });
        Ok(())
    }

    async fn user_sessions(&self, username: &str, domain: &str) -> Result<HashSet<UserSession>> {
        Ok(self
            .accounts
            .get(&Self::key(username, domain))
            .map(|account| account.sessions.clone())
            .unwrap_or_default())
    }

    async fn all_user_sessions(&self) -> Result<HashSet<UserSession>> {
        Ok(self
            .accounts
            .iter()
            .flat_map(|entry| entry.sessions.iter().cloned().collect::<Vec<_>>())
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_user_session(
        &self,
        username: &str,
        domain: &str,
        resource: &str,
        _reason: Option<&str>,
    ) -> Result<()> {
        if let Some(mut account) = self.accounts.get_mut(&Self::key(username, domain)) {
            account.sessions.retain(|session| session.resource != resource);
        }
        Ok(())
    }

    async fn stats(&self, stat: Stat, domain: Option<&str>) -> Result<u64> {
        let count = match stat {
            Stat::RegisteredUsers => self.in_domain(domain).count(),
            Stat::OnlineUsers => self
                .in_domain(domain)
                .map(|entry| entry.sessions.len())
                .sum(),
        };
        Ok(count as u64)
    }
}
