//! Event indexing: ordered chain events → normalized, idempotent entity graph.
//!
//! This module provides:
//! - `ChangeSet`, the per-event unit of work committed atomically
//! - `EntityResolver` for get-or-create with revert-tolerant reads
//! - `RelationshipBuilder` for foreign keys and contract discovery
//! - `SubscriptionRegistry`, the address → template routing table
//! - `EventRouter`, which dedups, dispatches and commits one event

pub mod change_set;
mod handlers;
pub mod relationships;
pub mod resolver;
pub mod router;
pub mod subscriptions;

pub use change_set::{ChangeSet, EntryState};
pub use relationships::{ChildRef, Link, RelationshipBuilder};
pub use resolver::{EntityResolver, Resolved};
pub use router::EventRouter;
pub use subscriptions::SubscriptionRegistry;

use crate::chain::ChainError;
use crate::db::StoreError;
use crate::domain::{ArithmeticError, EntityId, EntityKind};
use serde::Serialize;
use thiserror::Error;

/// Failures that stop a stream. Everything else is skipped and logged.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error("entity {id} is a {found}, expected {expected}")]
    KindMismatch {
        id: EntityId,
        expected: EntityKind,
        found: EntityKind,
    },
    #[error("cannot materialize {kind} {id}")]
    Unresolvable { id: EntityId, kind: EntityKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum SkipReason {
    /// The emitting contract is not watched.
    Unsubscribed,
    /// The template has no handler for this event name.
    Unmapped,
    /// A known event with missing or unparseable parameters.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
    Skipped(SkipReason),
}
