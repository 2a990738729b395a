//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and schema application
//! - The `Repository` over the entity, dedup, subscription and stats tables
//! - The `EntityStore` seam the indexer writes through
//! - Repository-backed pagers for `fetch_all`

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, MigrationError};
pub use repo::pagers::{BucketPager, EntityPager};
pub use repo::Repository;

use crate::domain::{
    Address, ArithmeticError, BlockTime, Entity, EntityId, EventKey, Interval, TemplateKind,
};
use crate::indexer::ChangeSet;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("no {interval} bucket exists for timestamp {at}")]
    Unbucketable { at: BlockTime, interval: Interval },
}

/// Result of committing one event's change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The event was already applied; nothing was written.
    Duplicate,
}

/// Persistence seam of the indexer.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StoreError>;

    async fn is_processed(&self, key: &EventKey) -> Result<bool, StoreError>;

    async fn subscriptions(&self) -> Result<Vec<(Address, TemplateKind)>, StoreError>;

    /// Apply `changes` atomically with its dedup mark.
    async fn commit(&self, changes: &ChangeSet) -> Result<CommitOutcome, StoreError>;
}
