use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::XmppBackendError;

/// A Jabber ID: `node@domain[/resource]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub node: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl Jid {
    pub fn new(node: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            domain: domain.into(),
            resource: None,
        }
    }

    pub fn with_resource(
        node: impl Into<String>,
        domain: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            domain: domain.into(),
            resource: Some(resource.into()),
        }
    }

    /// The bare JID (`node@domain`), without any resource.
    pub fn bare(&self) -> String {
        format!("{}@{}", self.node, self.domain)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node, self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = XmppBackendError;

    /// Parse `node@domain[/resource]`. The resource may itself contain `/` or `@`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (s, None),
        };
        let (node, domain) = bare
            .split_once('@')
            .filter(|(node, domain)| !node.is_empty() && !domain.is_empty())
            .ok_or_else(|| XmppBackendError::backend(format!("Invalid JID: {}", s)))?;

        Ok(Self {
            node: node.to_string(),
            domain: domain.to_string(),
            resource: resource.map(str::to_string),
        })
    }
}
