//! Inbound chain event envelope.

use crate::domain::BlockTime;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// One decoded log, as delivered by the chain-event collaborator in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub contract_address: Address,
    pub event_name: String,
    pub block_timestamp: BlockTime,
    pub log_index: u32,
    pub tx_hash: B256,
    #[serde(default)]
    pub decoded_params: serde_json::Value,
}

/// Stable identity of an event; seeing the same key twice means a redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub tx_hash: B256,
    pub log_index: u32,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("missing event parameter {0}")]
    Missing(String),
    #[error("invalid event parameter {name}: {reason}")]
    Invalid { name: String, reason: String },
}

impl EventEnvelope {
    pub fn key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }

    fn param(&self, name: &str) -> Result<&serde_json::Value, ParamError> {
        self.decoded_params
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| ParamError::Missing(name.to_string()))
    }

    pub fn address_param(&self, name: &str) -> Result<Address, ParamError> {
        let raw = self.param(name)?.as_str().ok_or_else(|| ParamError::Invalid {
            name: name.to_string(),
            reason: "expected a hex string".to_string(),
        })?;
        Address::from_str(raw).map_err(|e| ParamError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Accepts a decimal string, a `0x` hex string, or a JSON integer.
    pub fn u256_param(&self, name: &str) -> Result<U256, ParamError> {
        let invalid = |reason: String| ParamError::Invalid {
            name: name.to_string(),
            reason,
        };
        match self.param(name)? {
            serde_json::Value::String(s) => {
                let s = s.trim();
                match s.strip_prefix("0x") {
                    Some(hex) => U256::from_str_radix(hex, 16),
                    None => U256::from_str_radix(s, 10),
                }
                .map_err(|e| invalid(e.to_string()))
            }
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| invalid("expected a non-negative integer".to_string())),
            other => Err(invalid(format!("unexpected value {}", other))),
        }
    }

    pub fn string_param(&self, name: &str) -> Result<String, ParamError> {
        self.param(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ParamError::Invalid {
                name: name.to_string(),
                reason: "expected a string".to_string(),
            })
    }

    /// Optional label-like parameters default to empty.
    pub fn string_param_or_default(&self, name: &str) -> String {
        self.string_param(name).unwrap_or_default()
    }
}
