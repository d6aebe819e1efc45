//! Gateway provisioning mode.
//!
//! The gateway is provisioned for IPv4, IPv6 or both. The mode decides which
//! addresses the diagnostic run validates and which host the broadband ping
//! targets. It is loaded once before a run starts.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::rest::{paths, GatewayApi};

/// Provisioning mode as reported by `/system/gateway/provisioning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProvisioningMode {
    #[serde(rename = "ipv4")]
    Ipv4,
    #[serde(rename = "ipv6")]
    Ipv6,
    #[serde(rename = "ipv4_ipv6")]
    DualStack,
    /// No (known) provisioning; counts as a failed run
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProvisioningMode {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "ipv4" => Self::Ipv4,
            "ipv6" => Self::Ipv6,
            "ipv4_ipv6" => Self::DualStack,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::DualStack => "ipv4_ipv6",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProvisioningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device provisioning as seen by the diagnostic engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvisioningProfile {
    pub mode: ProvisioningMode,
}

impl ProvisioningProfile {
    pub fn new(mode: ProvisioningMode) -> Self {
        Self { mode }
    }

    /// Is there IPv4 provisioning at all?
    pub fn supports_ipv4(&self) -> bool {
        matches!(self.mode, ProvisioningMode::Ipv4 | ProvisioningMode::DualStack)
    }

    /// Is there IPv6 provisioning at all?
    pub fn supports_ipv6(&self) -> bool {
        matches!(self.mode, ProvisioningMode::Ipv6 | ProvisioningMode::DualStack)
    }

    pub fn supports_dualstack(&self) -> bool {
        self.mode == ProvisioningMode::DualStack
    }

    pub fn ipv4_only(&self) -> bool {
        self.mode == ProvisioningMode::Ipv4
    }

    pub fn ipv6_only(&self) -> bool {
        self.mode == ProvisioningMode::Ipv6
    }

    /// Fetch the provisioning mode from the gateway.
    ///
    /// A body without `provisioning.mode` yields `Unknown` rather than an
    /// error; only transport failures are returned.
    pub async fn load(api: &dyn GatewayApi) -> Result<Self> {
        let body = api
            .get(paths::PROVISIONING)
            .await
            .map_err(|e| crate::GatewayError::api(paths::PROVISIONING, e))?;

        let mode = body
            .get("provisioning")
            .and_then(|p| p.get("mode"))
            .and_then(|m| m.as_str());

        match mode {
            Some(mode) => Ok(Self::new(ProvisioningMode::parse(mode))),
            None => {
                warn!("provisioning response carries no mode");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_queries() {
        let dual = ProvisioningProfile::new(ProvisioningMode::DualStack);
        assert!(dual.supports_ipv4() && dual.supports_ipv6() && dual.supports_dualstack());
        assert!(!dual.ipv4_only() && !dual.ipv6_only());

        let v4 = ProvisioningProfile::new(ProvisioningMode::Ipv4);
        assert!(v4.supports_ipv4() && v4.ipv4_only());
        assert!(!v4.supports_ipv6());

        let v6 = ProvisioningProfile::new(ProvisioningMode::Ipv6);
        assert!(v6.supports_ipv6() && v6.ipv6_only());
        assert!(!v6.supports_ipv4());

        let none = ProvisioningProfile::default();
        assert!(!none.supports_ipv4() && !none.supports_ipv6());
    }

    #[test]
    fn test_mode_parse_roundtrip_strings() {
        assert_eq!(ProvisioningMode::parse("ipv4_ipv6"), ProvisioningMode::DualStack);
        assert_eq!(ProvisioningMode::parse("bridge"), ProvisioningMode::Unknown);
        let parsed: ProvisioningMode = serde_json::from_str("\"ipv6\"").unwrap();
        assert_eq!(parsed, ProvisioningMode::Ipv6);
        let parsed: ProvisioningMode = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, ProvisioningMode::Unknown);
    }
}
