//! Engine configuration
//!
//! Tunables an operator may change:
//! - Default unicast and multicast TTL
//! - Fragment reassembly timeout
//! - Broadcast fan-out for unresolved local broadcasts
//! - Upper-layer protocols with a registered consumer

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datagram::protocol;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid default TTL: must be > 0, got {0}")]
    InvalidDefaultTtl(u8),

    #[error("Invalid multicast TTL: must be > 0, got {0}")]
    InvalidMulticastTtl(u8),

    #[error("Invalid fragment timeout: must be > 0 ms")]
    InvalidFragmentTimeout,

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// TTL for originated unicast when the upper layer leaves it at 0
    pub default_ttl: u8,

    /// TTL for originated multicast (link-local groups always get 1)
    pub default_multicast_ttl: u8,

    /// Reassembly entries older than this are discarded (milliseconds)
    pub fragment_timeout_ms: u64,

    /// Fan an unresolved local broadcast out to every interface
    pub force_broadcast: bool,

    /// Protocol numbers with a local consumer
    pub protocols: Vec<u8>,

    /// Seed for the header bit-error check (entropy when unset)
    pub bit_error_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ttl: 32,
            default_multicast_ttl: 1,
            fragment_timeout_ms: 60_000,
            force_broadcast: false,
            protocols: vec![protocol::ICMP, protocol::IGMP, protocol::TCP, protocol::UDP],
            bit_error_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl == 0 {
            return Err(ConfigError::InvalidDefaultTtl(self.default_ttl));
        }
        if self.default_multicast_ttl == 0 {
            return Err(ConfigError::InvalidMulticastTtl(self.default_multicast_ttl));
        }
        if self.fragment_timeout_ms == 0 {
            return Err(ConfigError::InvalidFragmentTimeout);
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Set one field from its textual form, then re-validate
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        let mut updated = self.clone();
        match key {
            "default_ttl" => updated.default_ttl = value.parse().map_err(|_| invalid())?,
            "default_multicast_ttl" => updated.default_multicast_ttl = value.parse().map_err(|_| invalid())?,
            "fragment_timeout_ms" => updated.fragment_timeout_ms = value.parse().map_err(|_| invalid())?,
            "force_broadcast" => updated.force_broadcast = value.parse().map_err(|_| invalid())?,
            "bit_error_seed" => {
                updated.bit_error_seed = match value {
                    "" | "none" => None,
                    v => Some(v.parse().map_err(|_| invalid())?),
                }
            }
            "protocols" => {
                updated.protocols = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse().map_err(|_| invalid()))
                    .collect::<Result<_, _>>()?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
