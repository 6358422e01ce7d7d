use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser};
use serde::Deserialize;

use crate::commands::Command;
use crate::registry::BackendRegistry;

/// Configuration for xmpp-admin.
#[derive(Parser, Debug, Clone)]
#[command(name = "xmpp-admin")]
#[command(about = "Administer XMPP server accounts through ejabberd or an in-memory backend")]
pub struct Config {
    /// TOML file declaring named backends (`[backends.<alias>]`)
    #[arg(long, env = "XMPP_BACKENDS_FILE")]
    pub config: Option<PathBuf>,

    /// Backend alias to use
    #[arg(long, default_value = BackendRegistry::DEFAULT_ALIAS, env = "XMPP_BACKEND_ALIAS")]
    pub alias: String,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Single backend, used when no configuration file is given.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Backend type: ejabberd_rest, ejabberd_xmlrpc, ejabberdctl or dummy
    #[arg(long, default_value = "ejabberd_rest", env = "XMPP_BACKEND")]
    pub backend: String,

    /// API endpoint of the REST and XML-RPC backends
    #[arg(long, env = "XMPP_BACKEND_URI")]
    pub uri: Option<String>,

    /// Path of the ejabberdctl executable
    #[arg(long, env = "EJABBERDCTL_PATH")]
    pub ejabberdctl_path: Option<PathBuf>,

    /// User for HTTP basic auth (REST) or XML-RPC authentication
    #[arg(long, env = "XMPP_BACKEND_USER")]
    pub user: Option<String>,

    /// Server of the XML-RPC authentication JID
    #[arg(long, env = "XMPP_BACKEND_SERVER")]
    pub server: Option<String>,

    #[arg(long, env = "XMPP_BACKEND_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Request timeout (seconds)
    #[arg(long, env = "XMPP_BACKEND_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Assume this server version instead of probing it
    #[arg(long, env = "XMPP_BACKEND_API_VERSION")]
    pub api_version: Option<String>,

    /// Domains served by the dummy backend
    #[arg(long, value_delimiter = ',', env = "XMPP_BACKEND_DOMAINS")]
    pub domains: Vec<String>,
}

/// Settings of one backend, from the command line or a `[backends.<alias>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    pub backend: String,
    pub uri: Option<String>,
    /// Extra HTTP headers (REST only).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub user: Option<String>,
    pub server: Option<String>,
    pub password: Option<String>,
    pub path: Option<PathBuf>,
    /// Seconds.
    pub timeout: Option<u64>,
    /// Seconds.
    pub version_cache_ttl: Option<u64>,
    pub api_version: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl From<BackendArgs> for BackendSettings {
    fn from(args: BackendArgs) -> Self {
        Self {
            backend: args.backend,
            uri: args.uri,
            headers: HashMap::new(),
            user: args.user,
            server: args.server,
            password: args.password,
            path: args.ejabberdctl_path,
            timeout: args.timeout,
            version_cache_ttl: None,
            api_version: args.api_version,
            domains: args.domains,
        }
    }
}

/// Contents of the backends file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsFile {
    #[serde(default)]
    pub backends: HashMap<String, BackendSettings>,
}

impl BackendsFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

impl Config {
    /// Build every configured backend: the file's backends if one is given,
    /// otherwise the command line backend under the default alias.
    pub fn load_registry(&self) -> anyhow::Result<BackendRegistry> {
        let registry = match &self.config {
            Some(path) => BackendRegistry::from_settings(&BackendsFile::load(path)?.backends)?,
            None => BackendRegistry::from_settings(&HashMap::from([(
                BackendRegistry::DEFAULT_ALIAS.to_string(),
                BackendSettings::from(self.backend.clone()),
            )]))?,
        };
        Ok(registry)
    }
}
