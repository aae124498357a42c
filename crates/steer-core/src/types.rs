//! Shared types used across steer crates.
//!
//! `ServiceInstance` is the identity the failover coordinator keys on,
//! `InstanceInfo` is what servers publish into the registry, and
//! `Address` is what the resolver hands to picker builders.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Identity of one running instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub address: String,
}

impl ServiceInstance {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            address: address.into(),
        }
    }

    /// Check that the identity can be used as key material.
    ///
    /// Name and address are required. No segment may contain `/`, since
    /// coordination keys are split on it when parsed back.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidParam(
                "service instance name should not be empty".to_string(),
            ));
        }
        if self.address.is_empty() {
            return Err(CoreError::InvalidParam(format!(
                "service instance {} has an empty address",
                self.name
            )));
        }
        for (field, value) in [
            ("name", &self.name),
            ("group", &self.group),
            ("address", &self.address),
        ] {
            if value.contains('/') {
                return Err(CoreError::InvalidParam(format!(
                    "service instance {field} must not contain '/': {value}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.group, self.address)
    }
}

fn default_weight() -> u32 {
    1
}

/// A service instance as published in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub group: String,
    /// Weight used by the single-weight picker.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_weight")]
    pub read_weight: u32,
    #[serde(default = "default_weight")]
    pub write_weight: u32,
    /// Explicit node id. Falls back to the address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl InstanceInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            group: String::new(),
            weight: default_weight(),
            read_weight: default_weight(),
            write_weight: default_weight(),
            node: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_read_weight(mut self, weight: u32) -> Self {
        self.read_weight = weight;
        self
    }

    pub fn with_write_weight(mut self, weight: u32) -> Self {
        self.write_weight = weight;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Stable id used to carry picker state across re-resolutions.
    pub fn node_id(&self) -> &str {
        self.node.as_deref().unwrap_or(&self.address)
    }

    pub fn identity(&self) -> ServiceInstance {
        ServiceInstance::new(&self.name, &self.group, &self.address)
    }

    /// Attributes the resolver attaches to this instance's address.
    pub fn attributes(&self) -> Attributes {
        Attributes {
            weight: Some(self.weight),
            read_weight: Some(self.read_weight),
            write_weight: Some(self.write_weight),
            group: Some(self.group.clone()),
            node: Some(self.node_id().to_string()),
        }
    }

    pub fn to_address(&self) -> Address {
        Address {
            addr: self.address.clone(),
            server_name: self.name.clone(),
            attributes: self.attributes(),
        }
    }
}

/// Per-address metadata read by picker builders.
///
/// Every field is optional: builders skip or default addresses that lack
/// what they need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub weight: Option<u32>,
    pub read_weight: Option<u32>,
    pub write_weight: Option<u32>,
    pub group: Option<String>,
    pub node: Option<String>,
}

/// A resolved backend address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub addr: String,
    pub server_name: String,
    pub attributes: Attributes,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_name: String::new(),
            attributes: Attributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(ServiceInstance::new("", "g", "10.0.0.1:80").validate().is_err());
        assert!(ServiceInstance::new("svc", "g", "").validate().is_err());
        assert!(ServiceInstance::new("svc", "", "10.0.0.1:80").validate().is_ok());
    }

    #[test]
    fn validate_rejects_slashes() {
        let err = ServiceInstance::new("svc", "a/b", "10.0.0.1:80")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("group"));
    }

    #[test]
    fn node_id_falls_back_to_address() {
        let info = InstanceInfo::new("svc", "10.0.0.1:80");
        assert_eq!(info.node_id(), "10.0.0.1:80");

        let info = info.with_node("node-7");
        assert_eq!(info.node_id(), "node-7");
    }

    #[test]
    fn attributes_carry_weights_and_group() {
        let info = InstanceInfo::new("svc", "10.0.0.1:80")
            .with_group("east")
            .with_read_weight(3)
            .with_write_weight(5);
        let addr = info.to_address();

        assert_eq!(addr.addr, "10.0.0.1:80");
        assert_eq!(addr.server_name, "svc");
        assert_eq!(addr.attributes.read_weight, Some(3));
        assert_eq!(addr.attributes.write_weight, Some(5));
        assert_eq!(addr.attributes.group.as_deref(), Some("east"));
        assert_eq!(addr.attributes.node.as_deref(), Some("10.0.0.1:80"));
    }

    #[test]
    fn missing_weights_default_to_one() {
        let info: InstanceInfo =
            serde_json::from_str(r#"{"name":"svc","address":"10.0.0.1:80"}"#).unwrap();
        assert_eq!(info.weight, 1);
        assert_eq!(info.read_weight, 1);
        assert_eq!(info.write_weight, 1);
        assert_eq!(info.group, "");
        assert!(info.node.is_none());
    }
}
