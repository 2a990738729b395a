//! Mock contract reader for testing without an RPC node.

use super::{Accessor, CallResult, ChainError, ContractReader, FlowLeg, ReadValue, Reverted};
use crate::domain::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock reader answering from a fixed table. Unlisted calls revert.
#[derive(Debug, Default)]
pub struct MockContractReader {
    values: HashMap<(Address, Accessor), ReadValue>,
    unreachable: HashSet<Address>,
    calls: AtomicUsize,
}

impl MockContractReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, contract: Address, accessor: Accessor, value: ReadValue) -> Self {
        self.values.insert((contract, accessor), value);
        self
    }

    /// Register the usual ERC-20 metadata for a token.
    pub fn with_token(
        self,
        contract: Address,
        name: &str,
        symbol: &str,
        decimals: u8,
        total_supply: U256,
    ) -> Self {
        self.with_value(contract, Accessor::Name, ReadValue::String(name.to_string()))
            .with_value(contract, Accessor::Symbol, ReadValue::String(symbol.to_string()))
            .with_value(contract, Accessor::Decimals, ReadValue::Uint(U256::from(decimals)))
            .with_value(contract, Accessor::TotalSupply, ReadValue::Uint(total_supply))
    }

    pub fn with_flows(self, settlement: Address, legs: Vec<FlowLeg>) -> Self {
        self.with_value(settlement, Accessor::Flows, ReadValue::Flows(legs))
    }

    /// Every call against `contract` fails with a transport error.
    pub fn with_unreachable(mut self, contract: Address) -> Self {
        self.unreachable.insert(contract);
        self
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ContractReader for MockContractReader {
    async fn call(&self, contract: Address, accessor: Accessor) -> Result<CallResult, ChainError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.unreachable.contains(&contract) {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        Ok(self
            .values
            .get(&(contract, accessor))
            .cloned()
            .ok_or(Reverted))
    }
}
