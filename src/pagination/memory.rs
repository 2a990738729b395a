//! In-process pager over a fixed record set.

use super::{Page, PageCursor, PageError, Paginator, Strategy};
use async_trait::async_trait;
use std::sync::Mutex;

/// Serves slices of a vector, with either page-end convention.
#[derive(Debug)]
pub struct VecPager<T> {
    records: Vec<T>,
    strategy: Strategy,
    requests: Mutex<Vec<(u64, u64)>>,
}

impl<T: Clone + Send + Sync> VecPager<T> {
    pub fn new(records: Vec<T>, strategy: Strategy) -> Self {
        VecPager {
            records,
            strategy,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn sentinel(records: Vec<T>) -> Self {
        Self::new(records, Strategy::Sentinel)
    }

    pub fn count_first(records: Vec<T>) -> Self {
        Self::new(records, Strategy::CountFirst)
    }

    /// `(offset, limit)` of every page served so far.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Paginator for VecPager<T> {
    type Item = T;

    fn strategy(&self) -> Strategy {
        self.strategy
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<T>, PageError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((cursor.offset, cursor.limit));
        }
        let len = self.records.len();
        let start = usize::try_from(cursor.offset).unwrap_or(usize::MAX).min(len);
        let end = start
            .saturating_add(usize::try_from(cursor.limit).unwrap_or(usize::MAX))
            .min(len);
        let records = self.records[start..end].to_vec();
        Ok(match self.strategy {
            Strategy::Sentinel => Page::new(records),
            Strategy::CountFirst => Page::with_total(records, len as u64),
        })
    }
}
