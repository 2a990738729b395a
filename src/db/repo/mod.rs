//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `entities.rs` - Entity graph, dedup log and subscriptions
//! - `stats.rs` - Counter application and series reads
//! - `pagers.rs` - `Paginator` adapters over the read queries

mod entities;
pub mod pagers;
mod stats;

use super::{CommitOutcome, EntityStore, StoreError};
use crate::domain::{Address, Counters, Entity, EntityId, EventKey, TemplateKind};
use crate::indexer::ChangeSet;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Connectivity check for the readiness route.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn decode_entity(data: &str) -> Result<Entity, StoreError> {
    Ok(serde_json::from_str(data)?)
}

fn decode_counters(data: &str) -> Result<Counters, StoreError> {
    Ok(serde_json::from_str(data)?)
}

fn decode_id(bytes: &[u8]) -> Result<EntityId, StoreError> {
    EntityId::from_bytes(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl EntityStore for Repository {
    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StoreError> {
        Repository::get_entity(self, id).await
    }

    async fn is_processed(&self, key: &EventKey) -> Result<bool, StoreError> {
        Repository::is_processed(self, key).await
    }

    async fn subscriptions(&self) -> Result<Vec<(Address, TemplateKind)>, StoreError> {
        Repository::subscriptions(self).await
    }

    async fn commit(&self, changes: &ChangeSet) -> Result<CommitOutcome, StoreError> {
        let key = changes.key();
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            INSERT INTO processed_events (tx_hash, log_index, block_timestamp, processed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(key.tx_hash.as_slice())
        .bind(i64::from(key.log_index))
        .bind(changes.timestamp().as_secs())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(event = %key, "event already applied");
            return Ok(CommitOutcome::Duplicate);
        }

        for entity in changes.new_entities() {
            sqlx::query(
                r#"
                INSERT INTO entities (id, kind, parent, data, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(entity.id().as_bytes())
            .bind(entity.kind().as_str())
            .bind(entity.parent().map(|p| p.as_bytes()))
            .bind(serde_json::to_string(entity)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for entity in changes.dirty_entities() {
            sqlx::query(
                r#"
                INSERT INTO entities (id, kind, parent, data, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    parent = excluded.parent,
                    data = excluded.data,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(entity.id().as_bytes())
            .bind(entity.kind().as_str())
            .bind(entity.parent().map(|p| p.as_bytes()))
            .bind(serde_json::to_string(entity)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (address, template) in changes.subscriptions() {
            sqlx::query(
                r#"
                INSERT INTO subscriptions (address, template, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(address) DO NOTHING
                "#,
            )
            .bind(address.as_slice())
            .bind(template.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        stats::apply_counters(&mut tx, changes, now).await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{
        contract_node, counter, BlockTime, EntityKind, Interval, TokenAmount, TokenBalance, B256,
        U256,
    };
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn change_set(tx: u8, log_index: u32, at: i64) -> ChangeSet {
        ChangeSet::new(
            EventKey {
                tx_hash: B256::repeat_byte(tx),
                log_index,
            },
            BlockTime::new(at),
        )
    }

    fn balance(token: Address, holder: Address, value: u64) -> Entity {
        Entity::TokenBalance(TokenBalance {
            id: EntityId::pair(token, holder),
            token: EntityId::from_address(token),
            account: EntityId::from_address(holder),
            value: TokenAmount::new(U256::from(value), 0).unwrap(),
            updated_at: BlockTime::new(0),
        })
    }

    #[tokio::test]
    async fn test_commit_and_get_entity() {
        let (repo, _temp) = setup_test_db().await;
        let holder = Address::repeat_byte(0x22);

        let mut cs = change_set(1, 0, 100);
        cs.insert_new(contract_node(EntityKind::Account, holder, BlockTime::new(100)).unwrap());
        assert_eq!(repo.commit(&cs).await.unwrap(), CommitOutcome::Committed);

        let id = EntityId::from_address(holder);
        let loaded = repo.get_entity(&id).await.unwrap().unwrap();
        assert_eq!(loaded.kind(), EntityKind::Account);
        assert!(repo.is_processed(&cs.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_commit_writes_nothing() {
        let (repo, _temp) = setup_test_db().await;
        let entity_id = EntityId::from_address(Address::repeat_byte(0x11));

        let mut first = change_set(1, 0, 100);
        first.bump(&entity_id, counter::EVENTS_COUNT, U256::from(1u8));
        repo.commit(&first).await.unwrap();

        let mut again = change_set(1, 0, 100);
        again.bump(&entity_id, counter::EVENTS_COUNT, U256::from(1u8));
        again.insert_new(
            contract_node(EntityKind::Account, Address::repeat_byte(0x33), BlockTime::new(1))
                .unwrap(),
        );
        assert_eq!(repo.commit(&again).await.unwrap(), CommitOutcome::Duplicate);

        let current = repo.stats_current(&entity_id).await.unwrap().unwrap();
        assert_eq!(current.get(counter::EVENTS_COUNT), U256::from(1u8));
        let absent = EntityId::from_address(Address::repeat_byte(0x33));
        assert!(repo.get_entity(&absent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_entity_never_overwrites_existing() {
        let (repo, _temp) = setup_test_db().await;
        let token = Address::repeat_byte(0x11);
        let holder = Address::repeat_byte(0x22);

        let mut first = change_set(1, 0, 100);
        first.insert_new(balance(token, holder, 500));
        repo.commit(&first).await.unwrap();

        let mut second = change_set(2, 0, 200);
        second.insert_new(balance(token, holder, 0));
        repo.commit(&second).await.unwrap();

        let Some(Entity::TokenBalance(b)) =
            repo.get_entity(&EntityId::pair(token, holder)).await.unwrap()
        else {
            panic!("expected balance");
        };
        assert_eq!(b.value.exact(), U256::from(500u32));
    }

    #[tokio::test]
    async fn test_dirty_entity_is_updated() {
        let (repo, _temp) = setup_test_db().await;
        let token = Address::repeat_byte(0x11);
        let holder = Address::repeat_byte(0x22);

        let mut first = change_set(1, 0, 100);
        first.insert_new(balance(token, holder, 500));
        repo.commit(&first).await.unwrap();

        let id = EntityId::pair(token, holder);
        let mut second = change_set(2, 0, 200);
        second.insert_loaded(repo.get_entity(&id).await.unwrap().unwrap());
        if let Some(Entity::TokenBalance(b)) = second.get_mut(&id) {
            b.value = b.value.checked_sub(U256::from(100u32)).unwrap();
        }
        repo.commit(&second).await.unwrap();

        let Some(Entity::TokenBalance(b)) = repo.get_entity(&id).await.unwrap() else {
            panic!("expected balance");
        };
        assert_eq!(b.value.exact(), U256::from(400u32));
    }

    #[tokio::test]
    async fn test_counters_fill_current_and_both_intervals() {
        let (repo, _temp) = setup_test_db().await;
        let id = EntityId::from_address(Address::repeat_byte(0x11));

        for (i, at) in [3_600i64, 3_700, 7_300].into_iter().enumerate() {
            let mut cs = change_set(i as u8 + 1, 0, at);
            cs.bump(&id, counter::EVENTS_COUNT, U256::from(1u8));
            repo.commit(&cs).await.unwrap();
        }

        let current = repo.stats_current(&id).await.unwrap().unwrap();
        assert_eq!(current.get(counter::EVENTS_COUNT), U256::from(3u8));

        let hours = repo
            .stats_buckets_in_range(&id, Interval::Hour, BlockTime::new(0), BlockTime::new(10_000), 0, 100)
            .await
            .unwrap();
        let starts: Vec<i64> = hours.iter().map(|b| b.bucket_start.as_secs()).collect();
        assert_eq!(starts, vec![3_600, 7_200]);
        assert_eq!(hours[0].counters.get(counter::EVENTS_COUNT), U256::from(2u8));
        assert_eq!(hours[1].counters.get(counter::EVENTS_COUNT), U256::from(3u8));

        let days = repo
            .stats_buckets_in_range(&id, Interval::Day, BlockTime::new(0), BlockTime::new(10_000), 0, 100)
            .await
            .unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].counters.get(counter::EVENTS_COUNT), U256::from(3u8));
    }

    #[tokio::test]
    async fn test_baseline_is_last_bucket_at_or_before() {
        let (repo, _temp) = setup_test_db().await;
        let id = EntityId::from_address(Address::repeat_byte(0x11));
        for (i, at) in [3_600i64, 10_800].into_iter().enumerate() {
            let mut cs = change_set(i as u8 + 1, 0, at);
            cs.bump(&id, counter::EVENTS_COUNT, U256::from(5u8));
            repo.commit(&cs).await.unwrap();
        }

        let baseline = repo
            .stats_baseline(&id, Interval::Hour, BlockTime::new(9_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(baseline.bucket_start, BlockTime::new(3_600));
        assert!(repo
            .stats_baseline(&id, Interval::Hour, BlockTime::new(3_599))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_and_count_by_parent() {
        let (repo, _temp) = setup_test_db().await;
        let token_a = Address::repeat_byte(0x0a);
        let token_b = Address::repeat_byte(0x0b);

        let mut cs = change_set(1, 0, 100);
        for holder in 1..=3u8 {
            cs.insert_new(balance(token_a, Address::repeat_byte(holder), 10));
        }
        cs.insert_new(balance(token_b, Address::repeat_byte(9), 10));
        repo.commit(&cs).await.unwrap();

        let parent = EntityId::from_address(token_a);
        assert_eq!(
            repo.count_entities(EntityKind::TokenBalance, Some(&parent))
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            repo.count_entities(EntityKind::TokenBalance, None)
                .await
                .unwrap(),
            4
        );
        let page = repo
            .list_entities(EntityKind::TokenBalance, Some(&parent), 1, 5)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_subscriptions_are_append_only() {
        let (repo, _temp) = setup_test_db().await;
        let address = Address::repeat_byte(0x44);

        assert!(repo
            .seed_subscription(address, TemplateKind::DeploymentRegistry)
            .await
            .unwrap());
        let mut cs = change_set(1, 0, 100);
        cs.subscribe(address, TemplateKind::Token);
        repo.commit(&cs).await.unwrap();

        assert_eq!(
            repo.subscriptions().await.unwrap(),
            vec![(address, TemplateKind::DeploymentRegistry)]
        );
    }
}
