//! Counter application and series reads for the repository.

use crate::db::StoreError;
use crate::domain::{BlockTime, CounterDelta, Counters, EntityId, Interval, StatsBucket};
use crate::indexer::ChangeSet;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeMap;

use super::{decode_counters, decode_id, Repository};

/// Fold the change set's counter deltas into the current snapshot of each entity and
/// write the resulting cumulative values into the hour and day buckets of the event.
pub(super) async fn apply_counters(
    tx: &mut Transaction<'_, Sqlite>,
    changes: &ChangeSet,
    now: i64,
) -> Result<(), StoreError> {
    let mut grouped: BTreeMap<&EntityId, Vec<&CounterDelta>> = BTreeMap::new();
    for delta in changes.counters() {
        grouped.entry(&delta.entity).or_default().push(delta);
    }

    for (entity, deltas) in grouped {
        let row = sqlx::query("SELECT counters FROM stats_current WHERE entity_id = ?")
            .bind(entity.as_bytes())
            .fetch_optional(&mut **tx)
            .await?;
        let mut current = match row {
            Some(row) => decode_counters(row.get("counters"))?,
            None => Counters::new(),
        };
        for delta in deltas {
            current.add(delta.name, delta.amount)?;
        }
        let encoded = serde_json::to_string(&current)?;

        sqlx::query(
            r#"
            INSERT INTO stats_current (entity_id, counters, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                counters = excluded.counters,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity.as_bytes())
        .bind(&encoded)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        for interval in Interval::ALL {
            let start = changes
                .timestamp()
                .bucket_start(interval)
                .ok_or(StoreError::Unbucketable {
                    at: changes.timestamp(),
                    interval,
                })?;
            sqlx::query(
                r#"
                INSERT INTO stats_buckets (entity_id, interval, bucket_start, counters)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(entity_id, interval, bucket_start) DO UPDATE SET
                    counters = excluded.counters
                "#,
            )
            .bind(entity.as_bytes())
            .bind(interval.as_str())
            .bind(start.as_secs())
            .bind(&encoded)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

fn bucket_from_row(row: &sqlx::sqlite::SqliteRow, interval: Interval) -> Result<StatsBucket, StoreError> {
    let entity: Vec<u8> = row.get("entity_id");
    Ok(StatsBucket {
        entity: decode_id(&entity)?,
        interval,
        bucket_start: BlockTime::new(row.get("bucket_start")),
        counters: decode_counters(row.get("counters"))?,
    })
}

impl Repository {
    /// Buckets with `from <= bucket_start <= to`, ascending, one page at a time.
    pub async fn stats_buckets_in_range(
        &self,
        entity: &EntityId,
        interval: Interval,
        from: BlockTime,
        to: BlockTime,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StatsBucket>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, bucket_start, counters
            FROM stats_buckets
            WHERE entity_id = ? AND interval = ? AND bucket_start >= ? AND bucket_start <= ?
            ORDER BY bucket_start ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(entity.as_bytes())
        .bind(interval.as_str())
        .bind(from.as_secs())
        .bind(to.as_secs())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| bucket_from_row(r, interval)).collect()
    }

    /// Last bucket starting at or before `at`.
    pub async fn stats_baseline(
        &self,
        entity: &EntityId,
        interval: Interval,
        at: BlockTime,
    ) -> Result<Option<StatsBucket>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT entity_id, bucket_start, counters
            FROM stats_buckets
            WHERE entity_id = ? AND interval = ? AND bucket_start <= ?
            ORDER BY bucket_start DESC
            LIMIT 1
            "#,
        )
        .bind(entity.as_bytes())
        .bind(interval.as_str())
        .bind(at.as_secs())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| bucket_from_row(&r, interval)).transpose()
    }

    /// Always-current counters; `None` until the entity's first event.
    pub async fn stats_current(&self, entity: &EntityId) -> Result<Option<Counters>, StoreError> {
        let row = sqlx::query("SELECT counters FROM stats_current WHERE entity_id = ?")
            .bind(entity.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_counters(r.get("counters"))).transpose()
    }
}
