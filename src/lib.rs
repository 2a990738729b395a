pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod indexer;
pub mod orchestration;
pub mod pagination;
pub mod stats;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, BlockTime, Decimal, Entity, EntityId, EntityKind, TokenAmount, U256};
pub use error::AppError;
pub use indexer::{ApplyOutcome, EventRouter};
pub use orchestration::Ingestor;
