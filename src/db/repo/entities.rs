//! Entity graph, dedup log and subscription operations for the repository.

use crate::db::StoreError;
use crate::domain::{Address, Entity, EntityId, EntityKind, EventKey, TemplateKind};
use sqlx::Row;
use std::str::FromStr;

use super::{decode_entity, Repository};

impl Repository {
    /// Load one entity by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored payload does not decode.
    pub async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query("SELECT data FROM entities WHERE id = ?")
            .bind(id.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_entity(r.get("data"))).transpose()
    }

    /// One page of entities of `kind`, optionally restricted to children of `parent`,
    /// ordered by id.
    pub async fn list_entities(
        &self,
        kind: EntityKind,
        parent: Option<&EntityId>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Entity>, StoreError> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match parent {
            Some(parent) => {
                sqlx::query(
                    r#"
                    SELECT data FROM entities
                    WHERE kind = ? AND parent = ?
                    ORDER BY id ASC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(kind.as_str())
                .bind(parent.as_bytes())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT data FROM entities
                    WHERE kind = ?
                    ORDER BY id ASC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(kind.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(|r| decode_entity(r.get("data"))).collect()
    }

    pub async fn count_entities(
        &self,
        kind: EntityKind,
        parent: Option<&EntityId>,
    ) -> Result<u64, StoreError> {
        let count: i64 = match parent {
            Some(parent) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE kind = ? AND parent = ?")
                    .bind(kind.as_str())
                    .bind(parent.as_bytes())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE kind = ?")
                    .bind(kind.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {}", count)))
    }

    pub async fn is_processed(&self, key: &EventKey) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM processed_events WHERE tx_hash = ? AND log_index = ?")
            .bind(key.tx_hash.as_slice())
            .bind(i64::from(key.log_index))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Every watched contract, in registration order.
    pub async fn subscriptions(&self) -> Result<Vec<(Address, TemplateKind)>, StoreError> {
        let rows = sqlx::query(
            "SELECT address, template FROM subscriptions ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let address: Vec<u8> = row.get("address");
                let template: String = row.get("template");
                if address.len() != 20 {
                    return Err(StoreError::Corrupt(format!(
                        "bad address {}",
                        hex::encode(&address)
                    )));
                }
                let address = Address::from_slice(&address);
                let template = TemplateKind::from_str(&template).map_err(StoreError::Corrupt)?;
                Ok((address, template))
            })
            .collect()
    }

    /// Register a statically known contract. Returns false if the address was already watched.
    pub async fn seed_subscription(
        &self,
        address: Address,
        template: TemplateKind,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (address, template, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(address) DO NOTHING
            "#,
        )
        .bind(address.as_slice())
        .bind(template.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
