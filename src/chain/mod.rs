//! Revert-tolerant contract accessors.
//!
//! Entity creation reads immutable contract state through [`ContractReader`].
//! A call that reverts is a value (`Err(Reverted)`), not an error: the caller
//! substitutes the field's zero value and carries on. Only transport failures
//! surface as [`ChainError`].

use crate::domain::{Address, U256};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod rpc;

pub use mock::MockContractReader;
pub use rpc::RpcContractReader;

/// A read-only contract function the indexer knows how to call and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    Name,
    Symbol,
    Decimals,
    TotalSupply,
    FaceValue,
    DenominationAsset,
    CutoffDate,
    AutoExecute,
    Flows,
}

impl Accessor {
    /// Solidity signature hashed into the call selector.
    pub fn signature(&self) -> &'static str {
        match self {
            Accessor::Name => "name()",
            Accessor::Symbol => "symbol()",
            Accessor::Decimals => "decimals()",
            Accessor::TotalSupply => "totalSupply()",
            Accessor::FaceValue => "faceValue()",
            Accessor::DenominationAsset => "denominationAsset()",
            Accessor::CutoffDate => "cutoffDate()",
            Accessor::AutoExecute => "autoExecute()",
            Accessor::Flows => "flows()",
        }
    }
}

/// One settlement leg as returned by `flows()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowLeg {
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// A decoded accessor return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Uint(U256),
    Bool(bool),
    Address(Address),
    String(String),
    Flows(Vec<FlowLeg>),
}

/// The call reverted (or returned nothing decodable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("call reverted")]
pub struct Reverted;

/// Outcome of a single accessor call that reached the chain.
pub type CallResult = Result<ReadValue, Reverted>;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// Reads contract state for entity materialization.
#[async_trait]
pub trait ContractReader: Send + Sync + fmt::Debug {
    async fn call(&self, contract: Address, accessor: Accessor) -> Result<CallResult, ChainError>;
}
