//! Read-side statistics: time series and holder distributions.

pub mod distribution;
pub mod series;

pub use distribution::{bucketize, Distribution, DistributionService, BUCKETS};
pub use series::{densify, merge_series, running_max, SeriesAggregator, SeriesQuery};

use crate::db::StoreError;
use crate::domain::{ArithmeticError, BlockTime, EntityId, EntityKind};
use crate::pagination::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("no distribution is defined for {0} entities")]
    Unsupported(EntityKind),
    #[error("invalid range: from {from} is after to {to}")]
    InvalidRange { from: BlockTime, to: BlockTime },
    #[error("dense series would need {0} points")]
    TooManyPoints(u64),
    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(BlockTime),
}
