//! `Paginator` adapters over repository reads.

use crate::db::StoreError;
use crate::domain::{BlockTime, Entity, EntityId, EntityKind, Interval, StatsBucket};
use crate::pagination::{Page, PageCursor, PageError, Paginator, Strategy};
use async_trait::async_trait;
use std::sync::Arc;

use super::Repository;

fn page_error(err: StoreError) -> PageError {
    match err {
        StoreError::Db(e) => PageError::Transient(e.to_string()),
        other => PageError::Permanent(other.to_string()),
    }
}

/// Entities of one kind (optionally children of one parent), via the kind index.
/// Page 0 carries the count.
pub struct EntityPager {
    repo: Arc<Repository>,
    kind: EntityKind,
    parent: Option<EntityId>,
}

impl EntityPager {
    pub fn new(repo: Arc<Repository>, kind: EntityKind) -> Self {
        EntityPager {
            repo,
            kind,
            parent: None,
        }
    }

    pub fn children_of(repo: Arc<Repository>, kind: EntityKind, parent: EntityId) -> Self {
        EntityPager {
            repo,
            kind,
            parent: Some(parent),
        }
    }
}

#[async_trait]
impl Paginator for EntityPager {
    type Item = Entity;

    fn strategy(&self) -> Strategy {
        Strategy::CountFirst
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<Entity>, PageError> {
        let records = self
            .repo
            .list_entities(self.kind, self.parent.as_ref(), cursor.offset, cursor.limit)
            .await
            .map_err(page_error)?;
        if cursor.offset > 0 {
            return Ok(Page::new(records));
        }
        let total = self
            .repo
            .count_entities(self.kind, self.parent.as_ref())
            .await
            .map_err(page_error)?;
        Ok(Page::with_total(records, total))
    }
}

/// In-range stats buckets for one entity and interval, ascending.
pub struct BucketPager {
    repo: Arc<Repository>,
    entity: EntityId,
    interval: Interval,
    from: BlockTime,
    to: BlockTime,
}

impl BucketPager {
    pub fn new(
        repo: Arc<Repository>,
        entity: EntityId,
        interval: Interval,
        from: BlockTime,
        to: BlockTime,
    ) -> Self {
        BucketPager {
            repo,
            entity,
            interval,
            from,
            to,
        }
    }
}

#[async_trait]
impl Paginator for BucketPager {
    type Item = StatsBucket;

    fn strategy(&self) -> Strategy {
        Strategy::Sentinel
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<StatsBucket>, PageError> {
        self.repo
            .stats_buckets_in_range(
                &self.entity,
                self.interval,
                self.from,
                self.to,
                cursor.offset,
                cursor.limit,
            )
            .await
            .map(Page::new)
            .map_err(page_error)
    }
}
