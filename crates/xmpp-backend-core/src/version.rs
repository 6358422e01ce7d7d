//! Remote server version resolution.
//!
//! Version-dependent behavior branches on a resolved [`ApiVersion`] using plain
//! ordering (`version < ApiVersion::new(17, 4)`). All string parsing happens once,
//! when a backend probes the server.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, XmppBackendError};

/// Default lifetime of a resolved version.
pub const DEFAULT_VERSION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// A server release, ordered lexicographically by its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: 0,
        }
    }

    pub const fn with_patch(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted release string such as `17.04`, `2.1.13` or `16.01-1`.
    ///
    /// Anything after the first `-` is a packaging suffix and ignored.
    pub fn parse(version: &str) -> Result<Self> {
        let version = version.trim();
        let release = version.split('-').next().unwrap_or_default();
        let parts = release
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| {
                XmppBackendError::backend(format!("Could not parse version string: {}", version))
            })?;

        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0)),
            [major, minor] => Ok(Self::new(*major, *minor)),
            [major, minor, patch] => Ok(Self::with_patch(*major, *minor, *patch)),
            _ => Err(XmppBackendError::backend(format!(
                "Could not parse version string: {}",
                version
            ))),
        }
    }
}

impl FromStr for ApiVersion {
    type Err = XmppBackendError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{:02}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// Cached resolution of a backend's remote server version.
///
/// Reads and refreshes are not serialized: concurrent callers that find the cache
/// stale may each probe the server, and the last writer wins.
#[derive(Debug)]
pub struct VersionCache {
    ttl: Duration,
    minimum: Option<ApiVersion>,
    pinned: Option<ApiVersion>,
    cached: RwLock<Option<(ApiVersion, Instant)>>,
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_CACHE_TTL)
    }
}

impl VersionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            minimum: None,
            pinned: None,
            cached: RwLock::new(None),
        }
    }

    /// A cache that never probes and always resolves to `version`.
    pub fn pinned(version: ApiVersion) -> Self {
        Self {
            pinned: Some(version),
            ..Self::default()
        }
    }

    /// Reject servers older than `minimum` with `NotSupported`.
    pub fn with_minimum(mut self, minimum: ApiVersion) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Pin the version if one is given, otherwise keep probing.
    pub fn with_pinned(mut self, version: Option<ApiVersion>) -> Self {
        self.pinned = version;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn minimum(&self) -> Option<ApiVersion> {
        self.minimum
    }

    /// The cached version if it has not expired yet.
    pub fn cached(&self) -> Option<ApiVersion> {
        if self.pinned.is_some() {
            return self.pinned;
        }
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        cached
            .filter(|(_, resolved_at)| resolved_at.elapsed() < self.ttl)
            .map(|(version, _)| version)
    }

    /// Drop the cached value so the next resolution probes again.
    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the cached version, or run `probe` and cache its result.
    pub async fn resolve<F, Fut>(&self, probe: F) -> Result<ApiVersion>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiVersion>>,
    {
        if let Some(version) = self.pinned {
            self.check_minimum(version)?;
            return Ok(version);
        }
        if let Some(version) = self.cached() {
            return Ok(version);
        }

        let version = probe().await?;
        self.check_minimum(version)?;

        debug!(%version, "Resolved API version");
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) =
            Some((version, Instant::now()));
        Ok(version)
    }

    fn check_minimum(&self, version: ApiVersion) -> Result<()> {
        match self.minimum {
            Some(minimum) if version < minimum => Err(XmppBackendError::NotSupported(format!(
                "Server version {} is not supported, at least {} is required",
                version, minimum
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(ApiVersion::parse("17.04").unwrap(), ApiVersion::new(17, 4));
        assert_eq!(ApiVersion::parse("16.01-1").unwrap(), ApiVersion::new(16, 1));
        assert_eq!(
            ApiVersion::parse("2.1.13").unwrap(),
            ApiVersion::with_patch(2, 1, 13)
        );
        assert_eq!(ApiVersion::parse("18").unwrap(), ApiVersion::new(18, 0));
        assert!(ApiVersion::parse("abc").is_err());
        assert!(ApiVersion::parse("1.2.3.4").is_err());
        assert!(ApiVersion::parse("").is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(ApiVersion::new(17, 1) < ApiVersion::new(17, 4));
        assert!(ApiVersion::new(16, 12) < ApiVersion::new(17, 0));
        assert!(ApiVersion::with_patch(2, 1, 13) < ApiVersion::new(14, 7));
        assert!(ApiVersion::new(17, 4) <= ApiVersion::parse("17.04").unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(ApiVersion::new(17, 4).to_string(), "17.04");
        assert_eq!(ApiVersion::with_patch(2, 1, 13).to_string(), "2.1.13");
    }

    #[tokio::test]
    async fn test_resolve_caches() {
        let cache = VersionCache::default();
        let probes = &AtomicUsize::new(0);

        for _ in 0..3 {
            let version = cache
                .resolve(|| async move {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(ApiVersion::new(18, 1))
                })
                .await
                .unwrap();
            assert_eq!(version, ApiVersion::new(18, 1));
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);

        cache.invalidate();
        assert!(cache.cached().is_none());
    }

    #[tokio::test]
    async fn test_resolve_expires() {
        let cache = VersionCache::new(Duration::ZERO);
        let probes = &AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .resolve(|| async move {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(ApiVersion::new(18, 1))
                })
                .await
                .unwrap();
        }
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_minimum_version() {
        let cache = VersionCache::default().with_minimum(ApiVersion::new(14, 7));
        let result = cache.resolve(|| async { Ok(ApiVersion::new(2, 1)) }).await;
        assert!(matches!(result, Err(XmppBackendError::NotSupported(_))));
        assert!(cache.cached().is_none());

        let version = cache
            .resolve(|| async { Ok(ApiVersion::new(14, 7)) })
            .await
            .unwrap();
        assert_eq!(version, ApiVersion::new(14, 7));
    }

    #[tokio::test]
    async fn test_pinned_never_probes() {
        let cache = VersionCache::pinned(ApiVersion::new(17, 1));
        let version = cache
            .resolve(|| async { Err(XmppBackendError::connection("unreachable")) })
            .await
            .unwrap();
        assert_eq!(version, ApiVersion::new(17, 1));
    }

    #[tokio::test]
    async fn test_probe_errors_propagate() {
        let cache = VersionCache::default();
        let result = cache
            .resolve(|| async { Err(XmppBackendError::connection("refused")) })
            .await;
        assert!(matches!(result, Err(XmppBackendError::Connection(_))));
    }
}
