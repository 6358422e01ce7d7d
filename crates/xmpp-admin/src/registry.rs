//! Compile-time backend registry.
//!
//! Backend names from the configuration resolve to a constructor here; there is no
//! loading by path at runtime. Unknown names fail at startup with `InvalidBackend`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use xmpp_backend_core::{ApiVersion, Result, XmppBackend, XmppBackendError, DEFAULT_VERSION_CACHE_TTL};
use xmpp_backend_ctl::{CtlConfig, EjabberdctlBackend, DEFAULT_EJABBERDCTL_PATH};
use xmpp_backend_dummy::{DummyBackend, DummyConfig};
use xmpp_backend_rest::{EjabberdRestBackend, RestConfig};
use xmpp_backend_xmlrpc::{EjabberdXmlRpcBackend, XmlRpcConfig, XmlRpcCredentials};

use crate::config::BackendSettings;

type Constructor = fn(&BackendSettings) -> Result<Arc<dyn XmppBackend>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    EjabberdRest,
    EjabberdXmlRpc,
    Ejabberdctl,
    Dummy,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        Self::EjabberdRest,
        Self::EjabberdXmlRpc,
        Self::Ejabberdctl,
        Self::Dummy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::EjabberdRest => "ejabberd_rest",
            Self::EjabberdXmlRpc => "ejabberd_xmlrpc",
            Self::Ejabberdctl => "ejabberdctl",
            Self::Dummy => "dummy",
        }
    }

    fn constructor(self) -> Constructor {
        match self {
            Self::EjabberdRest => build_rest,
            Self::EjabberdXmlRpc => build_xmlrpc,
            Self::Ejabberdctl => build_ctl,
            Self::Dummy => build_dummy,
        }
    }

    pub fn build(self, settings: &BackendSettings) -> Result<Arc<dyn XmppBackend>> {
        (self.constructor())(settings)
    }
}

impl FromStr for BackendKind {
    type Err = XmppBackendError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|kind| kind.name()).collect();
                XmppBackendError::InvalidBackend(format!(
                    "Unknown backend {:?} (expected one of {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn timeout(settings: &BackendSettings) -> Option<Duration> {
    settings.timeout.map(Duration::from_secs)
}

fn version_cache_ttl(settings: &BackendSettings) -> Duration {
    settings
        .version_cache_ttl
        .map_or(DEFAULT_VERSION_CACHE_TTL, Duration::from_secs)
}

fn api_version(settings: &BackendSettings) -> Result<Option<ApiVersion>> {
    settings
        .api_version
        .as_deref()
        .map(|version| {
            ApiVersion::parse(version).map_err(|_| {
                XmppBackendError::InvalidBackend(format!("Invalid api_version {:?}", version))
            })
        })
        .transpose()
}

fn build_rest(settings: &BackendSettings) -> Result<Arc<dyn XmppBackend>> {
    let mut config = RestConfig {
        headers: settings.headers.clone(),
        timeout: timeout(settings),
        version_cache_ttl: version_cache_ttl(settings),
        api_version: api_version(settings)?,
        ..Default::default()
    };
    if let Some(uri) = &settings.uri {
        config.uri = uri.clone();
    }
    if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
        config.http_auth = Some((user.clone(), password.clone()));
    }
    Ok(Arc::new(EjabberdRestBackend::new(config)?))
}

fn build_xmlrpc(settings: &BackendSettings) -> Result<Arc<dyn XmppBackend>> {
    let credentials = match (&settings.user, &settings.server, &settings.password) {
        (None, None, None) => None,
        (Some(user), Some(server), Some(password)) => Some(XmlRpcCredentials {
            user: user.clone(),
            server: server.clone(),
            password: password.clone(),
        }),
        _ => {
            return Err(XmppBackendError::InvalidBackend(
                "XML-RPC credentials need user, server and password".to_string(),
            ))
        }
    };

    let mut config = XmlRpcConfig {
        credentials,
        timeout: timeout(settings),
        version_cache_ttl: version_cache_ttl(settings),
        api_version: api_version(settings)?,
        ..Default::default()
    };
    if let Some(uri) = &settings.uri {
        config.uri = uri.clone();
    }
    Ok(Arc::new(EjabberdXmlRpcBackend::new(config)?))
}

fn build_ctl(settings: &BackendSettings) -> Result<Arc<dyn XmppBackend>> {
    Ok(Arc::new(EjabberdctlBackend::new(CtlConfig {
        path: settings
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EJABBERDCTL_PATH)),
        timeout: timeout(settings),
        version_cache_ttl: version_cache_ttl(settings),
        api_version: api_version(settings)?,
    })))
}

fn build_dummy(settings: &BackendSettings) -> Result<Arc<dyn XmppBackend>> {
    Ok(Arc::new(DummyBackend::new(DummyConfig {
        domains: settings.domains.clone(),
    })))
}

/// Named backends, constructed once and handed to consumers explicitly.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn XmppBackend>>,
}

impl BackendRegistry {
    pub const DEFAULT_ALIAS: &'static str = "default";

    pub fn from_settings(settings: &HashMap<String, BackendSettings>) -> Result<Self> {
        let mut registry = Self::default();
        for (alias, settings) in settings {
            let kind: BackendKind = settings.backend.parse()?;
            registry.insert(alias, kind.build(settings)?);
            info!("Configured backend {} ({})", alias, kind);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, alias: impl Into<String>, backend: Arc<dyn XmppBackend>) {
        self.backends.insert(alias.into(), backend);
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn XmppBackend>> {
        self.backends.get(alias).cloned().ok_or_else(|| {
            XmppBackendError::InvalidBackend(format!("No backend configured as {:?}", alias))
        })
    }

    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<_> = self.backends.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> BackendSettings {
        BackendSettings {
            backend: backend.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backend_kind_names() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        let err = "xmpp_backends.ejabberd_rest.EjabberdRestBackend"
            .parse::<BackendKind>()
            .unwrap_err();
        assert!(matches!(err, XmppBackendError::InvalidBackend(_)));
    }

    #[tokio::test]
    async fn test_build_every_kind() {
        for kind in BackendKind::ALL {
            assert!(kind.build(&settings(kind.name())).is_ok(), "{}", kind);
        }

        let mut dummy = settings("dummy");
        dummy.domains = vec!["example.com".to_string()];
        let backend = BackendKind::Dummy.build(&dummy).unwrap();
        assert_eq!(backend.all_domains().await.unwrap(), vec!["example.com"]);
    }

    #[tokio::test]
    async fn test_pinned_api_version() {
        let mut ctl = settings("ejabberdctl");
        ctl.api_version = Some("17.04".to_string());
        let backend = BackendKind::Ejabberdctl.build(&ctl).unwrap();
        assert_eq!(backend.api_version().await.unwrap(), ApiVersion::new(17, 4));

        ctl.api_version = Some("seventeen".to_string());
        assert!(matches!(
            BackendKind::Ejabberdctl.build(&ctl),
            Err(XmppBackendError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_incomplete_xmlrpc_credentials() {
        let mut xmlrpc = settings("ejabberd_xmlrpc");
        xmlrpc.user = Some("admin".to_string());
        assert!(matches!(
            BackendKind::EjabberdXmlRpc.build(&xmlrpc),
            Err(XmppBackendError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_registry() {
        let registry = BackendRegistry::from_settings(&HashMap::from([
            ("default".to_string(), settings("dummy")),
            ("rest".to_string(), settings("ejabberd_rest")),
        ]))
        .unwrap();
        assert_eq!(registry.aliases(), vec!["default", "rest"]);
        assert!(registry.get(BackendRegistry::DEFAULT_ALIAS).is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(XmppBackendError::InvalidBackend(_))
        ));

        let result = BackendRegistry::from_settings(&HashMap::from([(
            "default".to_string(),
            settings("django"),
        )]));
        assert!(matches!(result, Err(XmppBackendError::InvalidBackend(_))));
    }
}
