use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XmppBackendError};
use crate::password::{random_password, DEFAULT_PASSWORD_CHARS, DEFAULT_PASSWORD_LENGTH};
use crate::session::UserSession;
use crate::version::{ApiVersion, VersionCache};

/// Server statistics every backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    RegisteredUsers,
    OnlineUsers,
}

impl FromStr for Stat {
    type Err = XmppBackendError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "registered_users" => Ok(Self::RegisteredUsers),
            "online_users" => Ok(Self::OnlineUsers),
            _ => Err(XmppBackendError::backend(format!("Unknown stat {}", s))),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisteredUsers => f.write_str("registered_users"),
            Self::OnlineUsers => f.write_str("online_users"),
        }
    }
}

/// The operation set every XMPP administration backend implements.
///
/// Every operation is a single request/response cycle against the remote server,
/// awaited on the caller's task. Backends hold no per-call state and are shared
/// behind `Arc<dyn XmppBackend>`; the version cache is the only mutable state.
#[async_trait]
pub trait XmppBackend: Send + Sync {
    /// Version cache composed into the backend.
    fn version_cache(&self) -> &VersionCache;

    /// Probe the remote server for its release.
    async fn get_api_version(&self) -> Result<ApiVersion>;

    /// The remote release, probed at most once per cache TTL.
    ///
    /// Fails with `NotSupported` if the server is older than the backend's minimum.
    async fn api_version(&self) -> Result<ApiVersion> {
        self.version_cache()
            .resolve(|| self.get_api_version())
            .await
    }

    /// A random password of [`DEFAULT_PASSWORD_LENGTH`] ASCII letters and digits.
    ///
    /// Other lengths or alphabets come from [`random_password`], which takes both
    /// as arguments; backends override this method to change their default.
    fn get_random_password(&self) -> String {
        random_password(DEFAULT_PASSWORD_LENGTH, DEFAULT_PASSWORD_CHARS)
    }

    async fn user_exists(&self, username: &str, domain: &str) -> Result<bool>;

    /// Bare usernames (no domain) registered in `domain`.
    async fn all_users(&self, domain: &str) -> Result<HashSet<String>>;

    /// Domains served by the server.
    async fn all_domains(&self) -> Result<Vec<String>>;

    /// Create an account. Fails with `UserExists` if it is already registered.
    async fn create_user(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()>;

    /// Remove an account. Removing a missing account succeeds.
    async fn remove_user(&self, username: &str, domain: &str) -> Result<()>;

    /// `false` for wrong passwords and for missing accounts alike.
    async fn check_password(&self, username: &str, domain: &str, password: &str) -> Result<bool>;

    /// Fails with `UserNotFound` if the account does not exist.
    async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()>;

    /// Block an account. By default, the password is replaced with a random one.
    async fn block_user(&self, username: &str, domain: &str) -> Result<()> {
        let password = self.get_random_password();
        self.set_password(username, domain, &password).await
    }

    /// Last activity as naive UTC, `None` if the account was never active.
    ///
    /// Fails with `UserNotFound` if the account does not exist.
    async fn get_last_activity(&self, username: &str, domain: &str)
        -> Result<Option<NaiveDateTime>>;

    /// Record activity with a status text. `timestamp` defaults to now.
    async fn set_last_activity(
        &self,
        username: &str,
        domain: &str,
        status: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Send a message to an account, whether or not it is online.
    async fn message_user(
        &self,
        username: &str,
        domain: &str,
        subject: &str,
        message: &str,
    ) -> Result<()>;

    /// Live sessions of one account, empty if it is offline.
    async fn user_sessions(&self, username: &str, domain: &str) -> Result<HashSet<UserSession>>;

    /// Live sessions of every account on the server.
    async fn all_user_sessions(&self) -> Result<HashSet<UserSession>>;

    /// Terminate the connection of exactly one resource.
    async fn stop_user_session(
        &self,
        username: &str,
        domain: &str,
        resource: &str,
        reason: Option<&str>,
    ) -> Result<()>;

    /// A server statistic, optionally restricted to one domain.
    async fn stats(&self, stat: Stat, domain: Option<&str>) -> Result<u64>;

    /// Not yet implemented by most backends.
    async fn set_email(&self, _username: &str, _domain: &str, _email: &str) -> Result<()> {
        Ok(())
    }

    /// Not yet implemented by most backends.
    async fn check_email(&self, _username: &str, _domain: &str, _email: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether the account can log in with a password at all.
    async fn has_usable_password(&self, _username: &str, _domain: &str) -> Result<bool> {
        Ok(true)
    }

    /// Reserve an account that cannot be logged into until confirmed.
    async fn create_reservation(
        &self,
        username: &str,
        domain: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let password = self.get_random_password();
        self.create_user(username, domain, &password, email).await
    }

    /// Confirm a reservation by setting the real password (and email, if given).
    async fn confirm_reservation(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        self.set_password(username, domain, password).await?;
        if let Some(email) = email {
            self.set_email(username, domain, email).await?;
        }
        Ok(())
    }

    async fn expire_reservation(&self, username: &str, domain: &str) -> Result<()> {
        self.remove_user(username, domain).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Minimal backend that only records passwords, for testing the defaults.
    #[derive(Default)]
    struct RecordingBackend {
        version: VersionCache,
        passwords: Mutex<HashMap<String, String>>,
        emails: Mutex<HashMap<String, String>>,
    }

    impl RecordingBackend {
        fn password(&self, username: &str) -> Option<String> {
            self.passwords.lock().unwrap().get(username).cloned()
        }
    }

    #[async_trait]
    impl XmppBackend for RecordingBackend {
        fn version_cache(&self) -> &VersionCache {
            &self.version
        }

        async fn get_api_version(&self) -> Result<ApiVersion> {
            Ok(ApiVersion::new(1, 0))
        }

        async fn user_exists(&self, username: &str, _domain: &str) -> Result<bool> {
            Ok(self.password(username).is_some())
        }

        async fn all_users(&self, _domain: &str) -> Result<HashSet<String>> {
            Ok(self.passwords.lock().unwrap().keys().cloned().collect())
        }

        async fn all_domains(&self) -> Result<Vec<String>> {
            Ok(vec!["example.com".to_string()])
        }

        async fn create_user(
            &self,
            username: &str,
            _domain: &str,
            password: &str,
            _email: Option<&str>,
        ) -> Result<()> {
            let mut passwords = self.passwords.lock().unwrap();
            if passwords.contains_key(username) {
                return Err(XmppBackendError::UserExists);
            }
            passwords.insert(username.to_string(), password.to_string());
            Ok(())
        }

        async fn remove_user(&self, username: &str, _domain: &str) -> Result<()> {
            self.passwords.lock().unwrap().remove(username);
            Ok(())
        }

        async fn check_password(
            &self,
            username: &str,
            _domain: &str,
            password: &str,
        ) -> Result<bool> {
            Ok(self.password(username).as_deref() == Some(password))
        }

        async fn set_password(&self, username: &str, domain: &str, password: &str) -> Result<()> {
            let mut passwords = self.passwords.lock().unwrap();
            match passwords.get_mut(username) {
                Some(current) => {
                    *current = password.to_string();
                    Ok(())
                }
                None => Err(XmppBackendError::user_not_found(username, domain)),
            }
        }

        async fn get_last_activity(
            &self,
            _username: &str,
            _domain: &str,
        ) -> Result<Option<NaiveDateTime>> {
            Ok(None)
        }

        async fn set_last_activity(
            &self,
            _username: &str,
            _domain: &str,
            _status: &str,
            _timestamp: Option<DateTime<Utc>>,
        ) -> Result<()> {
            Ok(())
        }

        async fn message_user(
            &self,
            _username: &str,
            _domain: &str,
            _subject: &str,
            _message: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn user_sessions(
            &self,
            _username: &str,
            _domain: &str,
        ) -> Result<HashSet<UserSession>> {
            Ok(HashSet::new())
        }

        async fn all_user_sessions(&self) -> Result<HashSet<UserSession>> {
            Ok(HashSet::new())
        }

        async fn stop_user_session(
            &self,
            _username: &str,
            _domain: &str,
            _resource: &str,
            _reason: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }

        async fn stats(&self, _stat: Stat, _domain: Option<&str>) -> Result<u64> {
            Ok(self.passwords.lock().unwrap().len() as u64)
        }

        async fn set_email(&self, username: &str, _domain: &str, email: &str) -> Result<()> {
            self.emails
                .lock()
                .unwrap()
                .insert(username.to_string(), email.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let backend = RecordingBackend::default();

        backend
            .create_reservation("user", "example.com", Some("user@example.net"))
            .await
            .unwrap();
        let reserved = backend.password("user").unwrap();
        assert_eq!(reserved.len(), 32);

        backend
            .confirm_reservation("user", "example.com", "secret", Some("user@example.net"))
            .await
            .unwrap();
        assert!(backend.check_password("user", "example.com", "secret").await.unwrap());
        assert_eq!(
            backend.emails.lock().unwrap().get("user").map(String::as_str),
            Some("user@example.net")
        );

        backend.expire_reservation("user", "example.com").await.unwrap();
        assert!(!backend.user_exists("user", "example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_user_sets_random_password() {
        let backend = RecordingBackend::default();
        backend
            .create_user("user", "example.com", "secret", None)
            .await
            .unwrap();

        backend.block_user("user", "example.com").await.unwrap();
        assert!(!backend.check_password("user", "example.com", "secret").await.unwrap());
        assert_ne!(backend.password("user").as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_confirm_missing_reservation() {
        let backend = RecordingBackend::default();
        let err = backend
            .confirm_reservation("ghost", "example.com", "secret", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ghost@example.com");
    }

    #[tokio::test]
    async fn test_api_version_default() {
        let backend = RecordingBackend::default();
        assert_eq!(backend.api_version().await.unwrap(), ApiVersion::new(1, 0));
    }

    #[test]
    fn test_random_password_default() {
        let backend = RecordingBackend::default();
        let password = backend.get_random_password();
        assert_eq!(password.len(), DEFAULT_PASSWORD_LENGTH);
        assert!(password.chars().all(|c| DEFAULT_PASSWORD_CHARS.contains(c)));
    }

    #[test]
    fn test_stat_names() {
        assert_eq!("registered_users".parse::<Stat>().unwrap(), Stat::RegisteredUsers);
        assert_eq!("online_users".parse::<Stat>().unwrap(), Stat::OnlineUsers);
        assert!("offline_users".parse::<Stat>().is_err());
        assert_eq!(Stat::OnlineUsers.to_string(), "online_users");
    }
}
