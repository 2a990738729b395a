//! Domain types for the asset indexing read model.
//!
//! This module provides:
//! - Exact scaled-integer amounts and a display-only decimal
//! - Entity ids, block timestamps and stats intervals
//! - The entity graph and the inbound event envelope
//! - Cumulative counters and series/distribution shapes

pub mod amount;
pub mod decimal;
pub mod entity;
pub mod event;
pub mod primitives;
pub mod stats;

pub use alloy_primitives::{Address, B256, U256};
pub use amount::{ArithmeticError, TokenAmount};
pub use decimal::Decimal;
pub use entity::{
    contract_node, Account, Approval, ComplianceModule, DeploymentRegistry, Entity, EntityKind, Flow,
    IdentityRegistry, IdentityRegistryStorage, Settlement, SettlementFactory, TemplateKind, Token,
    TokenBalance, TokenRegistry, TrustedIssuersRegistry,
};
pub use event::{EventEnvelope, EventKey, ParamError};
pub use primitives::{BlockTime, EntityId, EntityIdError, Interval, MAX_ENTITY_ID_LEN};
pub use stats::{
    counter, CounterDelta, Counters, DistributionBucket, SeriesPoint, StatsBucket, TimeSeries,
};
