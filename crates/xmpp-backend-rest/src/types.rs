//! Request and response bodies of the ejabberd REST API.

use serde::{Deserialize, Serialize};
use xmpp_backend_core::ejabberd::RawSession;

#[derive(Serialize)]
pub(crate) struct Empty {}

#[derive(Serialize)]
pub(crate) struct Host<'a> {
    pub host: &'a str,
}

#[derive(Serialize)]
pub(crate) struct Account<'a> {
    pub user: &'a str,
    pub host: &'a str,
}

#[derive(Serialize)]
pub(crate) struct Register<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct ChangePassword<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub newpass: &'a str,
}

#[derive(Serialize)]
pub(crate) struct BanAccount<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub reason: &'a str,
}

#[derive(Serialize)]
pub(crate) struct SetLast<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub timestamp: i64,
    pub status: &'a str,
}

#[derive(Serialize)]
pub(crate) struct SendMessage<'a> {
    #[serde(rename = "type")]
    pub message_type: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

#[derive(Serialize)]
pub(crate) struct KickSession<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub resource: &'a str,
    pub reason: &'a str,
}

#[derive(Serialize)]
pub(crate) struct Stats<'a> {
    pub name: &'a str,
}

#[derive(Serialize)]
pub(crate) struct StatsHost<'a> {
    pub name: &'a str,
    pub host: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct StatResult {
    pub stat: u64,
}

/// `get_last` from 17.04 on.
#[derive(Deserialize)]
pub(crate) struct LastInfo {
    pub timestamp: String,
    pub status: String,
}

/// One entry of `user_sessions_info`.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionInfo {
    pub connection: String,
    pub ip: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub uptime: i64,
    #[serde(default)]
    pub status: String,
    pub resource: String,
    #[serde(default)]
    pub statustext: String,
}

impl SessionInfo {
    pub fn raw(&self) -> RawSession<'_> {
        RawSession {
            connection: &self.connection,
            ip: &self.ip,
            priority: self.priority,
            uptime: self.uptime,
            status: &self.status,
            resource: &self.resource,
            status_text: &self.statustext,
        }
    }
}

/// One entry of `connected_users_info`: a session plus the full JID it belongs to.
#[derive(Debug, Deserialize)]
pub(crate) struct ConnectedUserInfo {
    pub jid: String,
    #[serde(flatten)]
    pub session: SessionInfo,
}
