//! Core traits and types for XMPP server administration backends.
//!
//! This crate defines the abstractions shared by every transport:
//! - `XmppBackend`: the operation set every backend implements
//! - `XmppBackendError`: the closed error taxonomy crossing the contract boundary
//! - `UserSession`: one live client connection, identified by JID and resource
//! - `VersionCache`: cached, TTL-bound resolution of the remote server version
//! - `ejabberd`: parsing rules shared by the ejabberd transports

mod backend;
pub mod ejabberd;
mod error;
mod jid;
mod password;
mod session;
mod time;
mod version;

pub use backend::{Stat, XmppBackend};
pub use error::{Result, XmppBackendError};
pub use jid::Jid;
pub use password::{random_password, DEFAULT_PASSWORD_CHARS, DEFAULT_PASSWORD_LENGTH};
pub use session::{ConnectionType, UserSession};
pub use time::{datetime_to_timestamp, timestamp_to_datetime, IntoUtc};
pub use version::{ApiVersion, VersionCache, DEFAULT_VERSION_CACHE_TTL};
