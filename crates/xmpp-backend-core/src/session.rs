use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a client is connected to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Xmpp,
    HttpBinding,
    HttpPolling,
    Websocket,
    Unknown,
}

/// One live client connection of an account.
///
/// Two sessions are equal (and hash identically) iff their JID and resource match;
/// every other field is descriptive only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub username: String,
    pub domain: String,
    pub resource: String,
    pub priority: i32,
    pub ip_address: IpAddr,
    /// When the connection was established.
    pub uptime: DateTime<Utc>,
    /// Machine status token, e.g. `available` or `online`.
    pub status: String,
    pub status_text: String,
    pub connection_type: ConnectionType,
    /// `None` when the transport cannot tell.
    pub encrypted: Option<bool>,
    /// `None` when the transport cannot tell.
    pub compressed: Option<bool>,
}

impl UserSession {
    /// The bare JID of the account, `username@domain`.
    pub fn jid(&self) -> String {
        format!("{}@{}", self.username, self.domain)
    }
}

impl PartialEq for UserSession {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.domain == other.domain
            && self.resource == other.resource
    }
}

impl Eq for UserSession {}

impl Hash for UserSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.jid().hash(state);
        self.resource.hash(state);
    }
}

impl fmt::Display for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.username, self.domain, self.resource)
    }
}
