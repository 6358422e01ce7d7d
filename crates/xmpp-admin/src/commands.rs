use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use xmpp_backend_core::{IntoUtc, Jid, Result, Stat, UserSession, XmppBackend};

/// An account on the server.
#[derive(Args, Debug, Clone)]
pub struct Account {
    /// Local part of the JID
    pub username: String,
    pub domain: String,
}

impl Account {
    fn jid(&self) -> String {
        Jid::new(&self.username, &self.domain).to_string()
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the server version
    Version,
    /// List domains served by the server
    Domains,
    /// List registered users of a domain
    Users { domain: String },
    /// Check whether an account exists
    Exists {
        #[command(flatten)]
        account: Account,
    },
    /// Register an account (with a random password unless one is given)
    Create {
        #[command(flatten)]
        account: Account,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Remove an account
    Remove {
        #[command(flatten)]
        account: Account,
    },
    CheckPassword {
        #[command(flatten)]
        account: Account,
        password: String,
    },
    SetPassword {
        #[command(flatten)]
        account: Account,
        password: String,
    },
    /// Block an account so it can no longer log in
    Block {
        #[command(flatten)]
        account: Account,
    },
    LastActivity {
        #[command(flatten)]
        account: Account,
    },
    SetLastActivity {
        #[command(flatten)]
        account: Account,
        status: String,
        /// RFC 3339, or naive UTC (`2017-06-14 14:11:57`); defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Send a message to an account
    Message {
        #[command(flatten)]
        account: Account,
        subject: String,
        body: String,
    },
    /// List sessions of an account
    Sessions {
        #[command(flatten)]
        account: Account,
    },
    /// List every session on the server
    AllSessions,
    /// Terminate one session
    Kick {
        #[command(flatten)]
        account: Account,
        resource: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show a statistic: registered_users or online_users
    Stats {
        stat: Stat,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Reserve an account until it is confirmed
    Reserve {
        #[command(flatten)]
        account: Account,
        #[arg(long)]
        email: Option<String>,
    },
    /// Confirm a reservation with the real password
    Confirm {
        #[command(flatten)]
        account: Account,
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Drop an unconfirmed reservation
    Expire {
        #[command(flatten)]
        account: Account,
    },
}

/// Parse RFC 3339 timestamps, or naive timestamps taken as UTC.
pub fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(value) {
        return Ok(aware.into_utc());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(IntoUtc::into_utc)
        .ok_or_else(|| format!("invalid timestamp: {}", value))
}

fn sorted_sessions(sessions: impl IntoIterator<Item = UserSession>) -> Vec<UserSession> {
    let mut sessions: Vec<_> = sessions.into_iter().collect();
    sessions.sort_by_key(|session| session.to_string());
    sessions
}

fn ok() -> Value {
    json!({ "status": "ok" })
}

/// Run one command and render its result as JSON.
pub async fn run(backend: &dyn XmppBackend, command: Command) -> Result<Value> {
    let output = match command {
        Command::Version => json!({ "version": backend.api_version().await?.to_string() }),
        Command::Domains => json!(backend.all_domains().await?),
        Command::Users { domain } => {
            let mut users: Vec<_> = backend.all_users(&domain).await?.into_iter().collect();
            users.sort();
            json!(users)
        }
        Command::Exists { account } => {
            json!(backend.user_exists(&account.username, &account.domain).await?)
        }
        Command::Create {
            account,
            password,
            email,
        } => {
            let generated = password.is_none();
            let password = password.unwrap_or_else(|| backend.get_random_password());
            backend
                .create_user(&account.username, &account.domain, &password, email.as_deref())
                .await?;
            info!("Created {}", account.jid());
            if generated {
                json!({ "jid": account.jid(), "password": password })
            } else {
                json!({ "jid": account.jid() })
            }
        }
        Command::Remove { account } => {
            backend.remove_user(&account.username, &account.domain).await?;
            ok()
        }
        Command::CheckPassword { account, password } => json!(
            backend
                .check_password(&account.username, &account.domain, &password)
                .await?
        ),
        Command::SetPassword { account, password } => {
            backend
                .set_password(&account.username, &account.domain, &password)
                .await?;
            ok()
        }
        Command::Block { account } => {
            backend.block_user(&account.username, &account.domain).await?;
            ok()
        }
        Command::LastActivity { account } => json!(
            backend
                .get_last_activity(&account.username, &account.domain)
                .await?
        ),
        Command::SetLastActivity {
            account,
            status,
            timestamp,
        } => {
            backend
                .set_last_activity(&account.username, &account.domain, &status, timestamp)
                .await?;
            ok()
        }
        Command::Message {
            account,
            subject,
            body,
        } => {
            backend
                .message_user(&account.username, &account.domain, &subject, &body)
                .await?;
            ok()
        }
        Command::Sessions { account } => json!(sorted_sessions(
            backend
                .user_sessions(&account.username, &account.domain)
                .await?
        )),
        Command::AllSessions => json!(sorted_sessions(backend.all_user_sessions().await?)),
        Command::Kick {
            account,
            resource,
            reason,
        } => {
            backend
                .stop_user_session(
                    &account.username,
                    &account.domain,
                    &resource,
                    reason.as_deref(),
                )
                .await?;
            ok()
        }
        Command::Stats { stat, domain } => json!(backend.stats(stat, domain.as_deref()).await?),
        Command::Reserve { account, email } => {
            backend
                .create_reservation(&account.username, &account.domain, email.as_deref())
                .await?;
            ok()
        }
        Command::Confirm {
            account,
            password,
            email,
        } => {
            backend
                .confirm_reservation(
                    &account.username,
                    &account.domain,
                    &password,
                    email.as_deref(),
                )
                .await?;
            ok()
        }
        Command::Expire { account } => {
            backend
                .expire_reservation(&account.username, &account.domain)
                .await?;
            ok()
        }
    };
    Ok(output)
}
