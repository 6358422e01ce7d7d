//! Parsing rules shared by the ejabberd transports.
//!
//! Every ejabberd admin interface (REST, XML-RPC, `ejabberdctl`) reports the same data
//! in a different envelope. The envelope is the transport's business; the values
//! inside are normalized here.

use std::net::IpAddr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tracing::warn;

use crate::error::{Result, XmppBackendError};
use crate::session::{ConnectionType, UserSession};
use crate::version::ApiVersion;
use crate::Stat;

/// Oldest ejabberd release any ejabberd transport talks to.
pub const MINIMUM_VERSION: ApiVersion = ApiVersion::new(14, 7);

/// From this release on, `get_last` reports a `{timestamp, status}` pair.
pub const STRUCTURED_LAST_ACTIVITY: ApiVersion = ApiVersion::new(17, 4);

/// Up to this release `change_password` creates the account if it is missing.
pub const CHANGE_PASSWORD_CREATES_USER: ApiVersion = ApiVersion::new(16, 1);

const IPV4_MAPPED_PREFIX: &str = "::FFFF:";

/// Extract the release from the output of the `status` command.
///
/// ```text
/// The node ejabberd@localhost is started with status: started
/// ejabberd 17.01 is running in that node
/// ```
pub fn parse_status_string(status: &str) -> Result<ApiVersion> {
    status
        .lines()
        .find_map(|line| {
            let line = line.trim();
            let rest = line.strip_suffix("is running in that node")?;
            rest.split_whitespace().last()
        })
        .ok_or_else(|| XmppBackendError::backend("Could not determine API version."))
        .and_then(ApiVersion::parse)
}

/// Map a connection token to `(type, encrypted, compressed)`.
///
/// Unrecognized tokens are logged and reported as an unknown, encrypted and
/// compressed connection.
pub fn parse_connection_string(connection: &str) -> (ConnectionType, Option<bool>, Option<bool>) {
    match connection {
        "c2s" => (ConnectionType::Xmpp, Some(false), Some(false)),
        "c2s_tls" => (ConnectionType::Xmpp, Some(true), Some(false)),
        "c2s_compressed" => (ConnectionType::Xmpp, Some(false), Some(true)),
        "c2s_compressed_tls" => (ConnectionType::Xmpp, Some(true), Some(true)),
        "http_bind" => (ConnectionType::HttpBinding, None, None),
        "http_poll" => (ConnectionType::HttpPolling, None, None),
        "websocket" => (ConnectionType::Websocket, None, None),
        _ => {
            warn!("Could not parse connection string: {}", connection);
            (ConnectionType::Unknown, Some(true), Some(true))
        }
    }
}

/// Parse an IP address, unwrapping IPv4-mapped IPv6 notation (`::FFFF:10.0.0.1`).
pub fn parse_ip_address(ip_address: &str) -> Result<IpAddr> {
    let ip_address = ip_address.trim();
    let candidate = match ip_address.get(..IPV4_MAPPED_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(IPV4_MAPPED_PREFIX) => {
            &ip_address[IPV4_MAPPED_PREFIX.len()..]
        }
        _ => ip_address,
    };
    candidate
        .parse()
        .map_err(|_| XmppBackendError::backend(format!("Invalid IP address: {}", ip_address)))
}

/// The moment a connection was established, given its uptime in seconds.
///
/// Uptimes that reach outside the representable date range are rejected.
pub fn uptime_to_datetime(seconds: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds)
        .and_then(|uptime| Utc::now().checked_sub_signed(uptime))
        .ok_or_else(|| XmppBackendError::backend(format!("Invalid uptime: {}", seconds)))
}

/// Parse the timestamp formats ejabberd uses for last activity
/// (`2017-06-14T14:11:57Z`, `2017-06-14 14:11:57`), ignoring sub-second suffixes.
pub fn parse_last_activity(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    let head = value.get(..19).unwrap_or(value);
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| XmppBackendError::backend(format!("Invalid timestamp: {}", value)))
}

/// Last activity as reported by `get_last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastActivity {
    Online,
    /// No activity recorded. The account may or may not exist.
    Never,
    At(NaiveDateTime),
}

impl LastActivity {
    /// Releases before 17.04 report a single value: `Online`, `Never` or a timestamp.
    pub fn parse_legacy(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "never" => Ok(Self::Never),
            _ => parse_last_activity(value).map(Self::At),
        }
    }

    /// From 17.04 on, a timestamp comes with a status; `NOT FOUND` means no activity.
    pub fn parse_structured(timestamp: &str, status: &str) -> Result<Self> {
        if status.trim().eq_ignore_ascii_case("NOT FOUND") {
            return Ok(Self::Never);
        }
        parse_last_activity(timestamp).map(Self::At)
    }

    /// The activity timestamp, with `Online` meaning now.
    pub fn timestamp(self) -> Option<NaiveDateTime> {
        match self {
            Self::Online => Some(Utc::now().naive_utc()),
            Self::Never => None,
            Self::At(timestamp) => Some(timestamp),
        }
    }
}

/// The statistic name ejabberd uses for `stat`.
pub fn stat_name(stat: Stat) -> &'static str {
    match stat {
        Stat::RegisteredUsers => "registeredusers",
        Stat::OnlineUsers => "onlineusers",
    }
}

/// Raw session values as every ejabberd interface reports them.
#[derive(Debug, Clone, Default)]
pub struct RawSession<'a> {
    pub connection: &'a str,
    pub ip: &'a str,
    pub priority: i32,
    pub uptime: i64,
    pub status: &'a str,
    pub resource: &'a str,
    pub status_text: &'a str,
}

impl RawSession<'_> {
    /// Normalize into a [`UserSession`] of `username@domain`.
    pub fn into_session(self, username: &str, domain: &str) -> Result<UserSession> {
        let (connection_type, encrypted, compressed) = parse_connection_string(self.connection);
        Ok(UserSession {
            username: username.to_string(),
            domain: domain.to_string(),
            resource: self.resource.to_string(),
            priority: self.priority,
            ip_address: parse_ip_address(self.ip)?,
            uptime: uptime_to_datetime(self.uptime)?,
            status: self.status.to_string(),
            status_text: self.status_text.to_string(),
            connection_type,
            encrypted,
            compressed,
        })
    }
}
