//! Dial targets of the form `scheme://authority/endpoint`.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A parsed dial target. The endpoint names the service to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

impl Target {
    /// Parse `registry:///notification-svc` or `registry://authority/svc`.
    pub fn parse(target: &str) -> CoreResult<Self> {
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| CoreError::InvalidTarget(target.to_string()))?;
        if scheme.is_empty() {
            return Err(CoreError::InvalidTarget(target.to_string()));
        }
        let (authority, endpoint) = rest.split_once('/').unwrap_or(("", rest));
        if endpoint.is_empty() {
            return Err(CoreError::InvalidTarget(target.to_string()));
        }
        Ok(Target {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    /// Build a target for `service` under `scheme` with an empty authority.
    pub fn for_service(scheme: &str, service: &str) -> Self {
        Target {
            scheme: scheme.to_string(),
            authority: String::new(),
            endpoint: service.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}
