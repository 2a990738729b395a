//! JSON-RPC `eth_call` reader.

use super::{Accessor, CallResult, ChainError, ContractReader, FlowLeg, ReadValue, Reverted};
use crate::domain::{Address, U256};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// JSON-RPC error code nodes use for execution reverts.
const EXECUTION_REVERTED: i64 = 3;
/// Limit exceeded / internal error: worth another attempt.
const TRANSIENT_RPC_CODES: [i64; 2] = [-32005, -32603];

/// Contract reader backed by a JSON-RPC node.
#[derive(Debug, Clone)]
pub struct RpcContractReader {
    client: Client,
    url: String,
    max_elapsed: Duration,
}

impl RpcContractReader {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url,
            max_elapsed: Duration::from_secs(30),
        })
    }

    /// Cap on total time spent retrying one call.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn eth_call(&self, contract: Address, data: String) -> Result<RpcReply, ChainError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": contract.to_string(), "data": data}, "latest"]
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ChainError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(ChainError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let body = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::Parse(e.to_string())))?;

            parse_reply(&body).map_err(|err| match err {
                ChainError::Rpc { code, .. } if TRANSIENT_RPC_CODES.contains(&code) => {
                    backoff::Error::transient(err)
                }
                err => backoff::Error::permanent(err),
            })
        })
        .await
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RpcReply {
    Data(Vec<u8>),
    Reverted,
}

fn parse_reply(body: &serde_json::Value) -> Result<RpcReply, ChainError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        if code == EXECUTION_REVERTED || message.to_ascii_lowercase().contains("revert") {
            return Ok(RpcReply::Reverted);
        }
        return Err(ChainError::Rpc { code, message });
    }
    let result = body
        .get("result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| ChainError::Parse("Missing result field".to_string()))?;
    let raw = result.strip_prefix("0x").unwrap_or(result);
    hex::decode(raw)
        .map(RpcReply::Data)
        .map_err(|e| ChainError::Parse(format!("Invalid result hex: {}", e)))
}

/// `0x` + first four bytes of the signature hash.
pub fn selector(accessor: Accessor) -> String {
    let hash = keccak256(accessor.signature().as_bytes());
    format!("0x{}", hex::encode(&hash[..4]))
}

#[async_trait]
impl ContractReader for RpcContractReader {
    async fn call(&self, contract: Address, accessor: Accessor) -> Result<CallResult, ChainError> {
        debug!(%contract, accessor = accessor.signature(), "eth_call");
        match self.eth_call(contract, selector(accessor)).await? {
            RpcReply::Reverted => Ok(Err(Reverted)),
            // Empty or malformed return data is indistinguishable from a revert.
            RpcReply::Data(data) => Ok(decode(accessor, &data).ok_or(Reverted)),
        }
    }
}

fn decode(accessor: Accessor, data: &[u8]) -> Option<ReadValue> {
    match accessor {
        Accessor::Name | Accessor::Symbol => decode_string(data).map(ReadValue::String),
        Accessor::Decimals | Accessor::TotalSupply | Accessor::FaceValue | Accessor::CutoffDate => {
            word(data, 0).map(ReadValue::Uint)
        }
        Accessor::DenominationAsset => word_address(data, 0).map(ReadValue::Address),
        Accessor::AutoExecute => word(data, 0).map(|w| ReadValue::Bool(!w.is_zero())),
        Accessor::Flows => decode_flows(data).map(ReadValue::Flows),
    }
}

fn word(data: &[u8], index: usize) -> Option<U256> {
    let start = index.checked_mul(32)?;
    let bytes = data.get(start..start.checked_add(32)?)?;
    Some(U256::from_be_slice(bytes))
}

fn word_address(data: &[u8], index: usize) -> Option<Address> {
    let start = index.checked_mul(32)?;
    let bytes = data.get(start + 12..start + 32)?;
    Some(Address::from_slice(bytes))
}

fn as_usize(value: U256) -> Option<usize> {
    if value > U256::from(u32::MAX) {
        return None;
    }
    usize::try_from(value.as_limbs()[0]).ok()
}

fn decode_string(data: &[u8]) -> Option<String> {
    // Some older tokens return bytes32 instead of string.
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return String::from_utf8(data[..end].to_vec()).ok();
    }
    let offset = as_usize(word(data, 0)?)?;
    let len = as_usize(U256::from_be_slice(data.get(offset..offset + 32)?))?;
    let start = offset + 32;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// `(address asset, address from, address to, uint256 amount)[]`
fn decode_flows(data: &[u8]) -> Option<Vec<FlowLeg>> {
    let offset = as_usize(word(data, 0)?)?;
    if offset % 32 != 0 {
        return None;
    }
    let base = offset / 32;
    let count = as_usize(word(data, base)?)?;
    let mut legs = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        let first = base + 1 + i * 4;
        legs.push(FlowLeg {
            asset: word_address(data, first)?,
            from: word_address(data, first + 1)?,
            to: word_address(data, first + 2)?,
            amount: word(data, first + 3)?,
        });
    }
    Some(legs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_word(value: U256) -> Vec<u8> {
        value.to_be_bytes::<32>().to_vec()
    }

    fn encode_address(address: Address) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        out.extend_from_slice(address.as_slice());
        out
    }

    #[test]
    fn test_well_known_selectors() {
        assert_eq!(selector(Accessor::Name), "0x06fdde03");
        assert_eq!(selector(Accessor::Symbol), "0x95d89b41");
        assert_eq!(selector(Accessor::Decimals), "0x313ce567");
        assert_eq!(selector(Accessor::TotalSupply), "0x18160ddd");
    }

    #[test]
    fn test_decode_abi_string() {
        let mut data = encode_word(U256::from(32u8));
        data.extend(encode_word(U256::from(4u8)));
        let mut tail = b"Bond".to_vec();
        tail.resize(32, 0);
        data.extend(tail);
        assert_eq!(
            decode(Accessor::Name, &data),
            Some(ReadValue::String("Bond".to_string()))
        );
    }

    #[test]
    fn test_decode_bytes32_string() {
        let mut data = b"MKR".to_vec();
        data.resize(32, 0);
        assert_eq!(
            decode(Accessor::Symbol, &data),
            Some(ReadValue::String("MKR".to_string()))
        );
    }

    #[test]
    fn test_decode_scalars() {
        let data = encode_word(U256::from(18u8));
        assert_eq!(
            decode(Accessor::Decimals, &data),
            Some(ReadValue::Uint(U256::from(18u8)))
        );
        assert_eq!(
            decode(Accessor::AutoExecute, &encode_word(U256::from(1u8))),
            Some(ReadValue::Bool(true))
        );
        let asset = Address::repeat_byte(0x42);
        assert_eq!(
            decode(Accessor::DenominationAsset, &encode_address(asset)),
            Some(ReadValue::Address(asset))
        );
    }

    #[test]
    fn test_decode_empty_return_is_none() {
        assert_eq!(decode(Accessor::Decimals, &[]), None);
        assert_eq!(decode(Accessor::Name, &[]), None);
        assert_eq!(decode(Accessor::Flows, &[]), None);
    }

    #[test]
    fn test_decode_flows() {
        let (a, b, c) = (
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
        );
        let mut data = encode_word(U256::from(32u8));
        data.extend(encode_word(U256::from(2u8)));
        for (from, to, amount) in [(b, c, 10u64), (c, b, 20u64)] {
            data.extend(encode_address(a));
            data.extend(encode_address(from));
            data.extend(encode_address(to));
            data.extend(encode_word(U256::from(amount)));
        }
        let Some(ReadValue::Flows(legs)) = decode(Accessor::Flows, &data) else {
            panic!("expected flows");
        };
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[1].from, c);
        assert_eq!(legs[1].amount, U256::from(20u8));
    }

    #[test]
    fn test_decode_flows_rejects_truncated_array() {
        let mut data = encode_word(U256::from(32u8));
        data.extend(encode_word(U256::from(5u8)));
        assert_eq!(decode(Accessor::Flows, &data), None);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply(&json!({"result": "0x0012"})).unwrap(),
            RpcReply::Data(vec![0x00, 0x12])
        );
        assert_eq!(
            parse_reply(&json!({"error": {"code": 3, "message": "execution reverted"}})).unwrap(),
            RpcReply::Reverted
        );
        assert_eq!(
            parse_reply(&json!({"error": {"code": -32000, "message": "VM Exception: revert"}}))
                .unwrap(),
            RpcReply::Reverted
        );
        assert!(matches!(
            parse_reply(&json!({"error": {"code": -32601, "message": "method not found"}})),
            Err(ChainError::Rpc { code: -32601, .. })
        ));
        assert!(matches!(parse_reply(&json!({})), Err(ChainError::Parse(_))));
    }
}
