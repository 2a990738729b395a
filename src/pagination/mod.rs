//! Multi-backend "fetch all pages".
//!
//! Every read path that lists records goes through [`fetch_all`]. Backends
//! expose one page at a time behind [`Paginator`]; the strategy decides how
//! the end of the data is detected:
//!
//! - [`Strategy::Sentinel`]: ask for `page_size + 1` records. A full reply
//!   proves another page exists; the extra record is dropped and the next
//!   request starts at `offset + page_size`.
//! - [`Strategy::CountFirst`]: page 0 carries the total count, which fixes
//!   the number of remaining requests up front.
//!
//! Each page is retried with the same cursor on timeout or transient
//! failure. When the retry budget runs out the caller gets a [`FetchError`],
//! never a truncated list.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod http;
pub mod memory;

pub use http::{OffsetLimitPager, PageCountPager, SubgraphPager};
pub use memory::VecPager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sentinel,
    CountFirst,
}

/// Position of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u64,
    pub limit: u64,
}

impl PageCursor {
    /// Zero-based page number, for backends addressed by page rather than offset.
    pub fn page_index(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.offset / self.limit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Total record count; required from count-first backends.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>) -> Self {
        Page {
            records,
            total: None,
        }
    }

    pub fn with_total(records: Vec<T>, total: u64) -> Self {
        Page {
            records,
            total: Some(total),
        }
    }
}

/// Failure of a single page attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("page at offset {offset} timed out after {attempts} attempts")]
    TimedOut { offset: u64, attempts: u32 },
    #[error("page at offset {offset} failed after {attempts} attempts: {message}")]
    Backend {
        offset: u64,
        attempts: u32,
        message: String,
    },
    #[error("count-first backend returned no total count")]
    MissingCount,
    #[error("page size must be between 1 and {}", u64::MAX - 1)]
    InvalidPageSize,
}

/// One page-at-a-time backend.
#[async_trait]
pub trait Paginator: Send + Sync {
    type Item: Send;

    fn strategy(&self) -> Strategy;

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<Self::Item>, PageError>;
}

/// Per-page retry budget and timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Fetch every record behind `pager`, in backend order.
pub async fn fetch_all<P>(
    pager: &P,
    page_size: u64,
    policy: &RetryPolicy,
) -> Result<Vec<P::Item>, FetchError>
where
    P: Paginator + ?Sized,
{
    if page_size == 0 {
        return Err(FetchError::InvalidPageSize);
    }
    match pager.strategy() {
        Strategy::Sentinel => fetch_with_sentinel(pager, page_size, policy).await,
        Strategy::CountFirst => fetch_count_first(pager, page_size, policy).await,
    }
}

async fn fetch_with_sentinel<P>(
    pager: &P,
    page_size: u64,
    policy: &RetryPolicy,
) -> Result<Vec<P::Item>, FetchError>
where
    P: Paginator + ?Sized,
{
    let limit = page_size.checked_add(1).ok_or(FetchError::InvalidPageSize)?;
    let mut out = Vec::new();
    let mut offset = 0u64;
    loop {
        let cursor = PageCursor { offset, limit };
        let mut page = fetch_page_with_retry(pager, cursor, policy).await?;
        let more = page.records.len() as u64 > page_size;
        page.records.truncate(page_size as usize);
        out.extend(page.records);
        match offset.checked_add(page_size) {
            Some(next) if more => offset = next,
            _ => break,
        }
    }
    debug!(records = out.len(), page_size, "sentinel fetch complete");
    Ok(out)
}

async fn fetch_count_first<P>(
    pager: &P,
    page_size: u64,
    policy: &RetryPolicy,
) -> Result<Vec<P::Item>, FetchError>
where
    P: Paginator + ?Sized,
{
    let first = fetch_page_with_retry(
        pager,
        PageCursor {
            offset: 0,
            limit: page_size,
        },
        policy,
    )
    .await?;
    let total = first.total.ok_or(FetchError::MissingCount)?;
    let pages = total.div_ceil(page_size);

    let mut out = first.records;
    for page in 1..pages {
        let cursor = PageCursor {
            offset: page.saturating_mul(page_size),
            limit: page_size,
        };
        out.extend(fetch_page_with_retry(pager, cursor, policy).await?.records);
    }
    debug!(records = out.len(), total, pages, "count-first fetch complete");
    Ok(out)
}

/// Fetch one page, retrying the same cursor until it succeeds or the budget runs out.
pub async fn fetch_page_with_retry<P>(
    pager: &P,
    cursor: PageCursor,
    policy: &RetryPolicy,
) -> Result<Page<P::Item>, FetchError>
where
    P: Paginator + ?Sized,
{
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;
    let max_attempts = policy.max_attempts.max(1);
    let timeout = policy.timeout;
    let backoff = ExponentialBackoff {
        initial_interval: policy.initial_backoff,
        max_elapsed_time: None,
        ..Default::default()
    };

    retry(backoff, || async move {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = match tokio::time::timeout(timeout, pager.fetch_page(cursor)).await {
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(PageError::Permanent(message))) => {
                return Err(backoff::Error::permanent(FetchError::Backend {
                    offset: cursor.offset,
                    attempts: attempt,
                    message,
                }));
            }
            Ok(Err(PageError::Transient(message))) => FetchError::Backend {
                offset: cursor.offset,
                attempts: attempt,
                message,
            },
            Err(_) => FetchError::TimedOut {
                offset: cursor.offset,
                attempts: attempt,
            },
        };
        if attempt >= max_attempts {
            return Err(backoff::Error::permanent(failure));
        }
        warn!(offset = cursor.offset, attempt, error = %failure, "retrying page fetch");
        Err(backoff::Error::transient(failure))
    })
    .await
}

/// Run independent fetches with at most `concurrency` in flight; results keep input order.
pub async fn fetch_all_many<P, I>(
    pagers: I,
    page_size: u64,
    policy: &RetryPolicy,
    concurrency: usize,
) -> Result<Vec<Vec<P::Item>>, FetchError>
where
    P: Paginator,
    I: IntoIterator<Item = P>,
{
    let policy = policy.clone();
    stream::iter(pagers)
        .map(move |pager| {
            let policy = policy.clone();
            async move { fetch_all(&pager, page_size, &policy).await }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            timeout: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(1),
        }
    }

    /// Fails the first `failures` attempts of every page with the given error.
    struct FlakyPager {
        inner: VecPager<u32>,
        failures: usize,
        error: PageError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Paginator for FlakyPager {
        type Item = u32;

        fn strategy(&self) -> Strategy {
            self.inner.strategy()
        }

        async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<u32>, PageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            self.inner.fetch_page(cursor).await
        }
    }

    /// Single-page pager that counts requests and optionally stalls.
    struct CountingPager {
        records: Vec<u32>,
        delay: Option<Duration>,
        requests: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Paginator for CountingPager {
        type Item = u32;

        fn strategy(&self) -> Strategy {
            Strategy::Sentinel
        }

        async fn fetch_page(&self, _cursor: PageCursor) -> Result<Page<u32>, PageError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Page::new(self.records.clone()))
        }
    }

    struct HangingPager;

    #[async_trait]
    impl Paginator for HangingPager {
        type Item = u32;

        fn strategy(&self) -> Strategy {
            Strategy::Sentinel
        }

        async fn fetch_page(&self, _cursor: PageCursor) -> Result<Page<u32>, PageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Page::new(vec![]))
        }
    }

    #[test]
    fn test_page_index() {
        let cursor = PageCursor {
            offset: 20,
            limit: 10,
        };
        assert_eq!(cursor.page_index(), 2);
    }

    #[tokio::test]
    async fn test_sentinel_requests_one_extra_record() {
        let pager = VecPager::sentinel((0..25).collect());
        let all = fetch_all(&pager, 10, &quick_policy(1)).await.unwrap();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
        assert_eq!(pager.requests(), vec![(0, 11), (10, 11), (20, 11)]);
    }

    #[tokio::test]
    async fn test_sentinel_exact_multiple_needs_one_short_page() {
        let pager = VecPager::sentinel((0..20).collect());
        let all = fetch_all(&pager, 10, &quick_policy(1)).await.unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(pager.requests(), vec![(0, 11), (10, 11)]);
    }

    #[tokio::test]
    async fn test_count_first_fetches_ceil_pages() {
        let pager = VecPager::count_first((0..25).collect());
        let all = fetch_all(&pager, 10, &quick_policy(1)).await.unwrap();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
        assert_eq!(pager.requests(), vec![(0, 10), (10, 10), (20, 10)]);
    }

    #[tokio::test]
    async fn test_empty_backend() {
        let pager = VecPager::<u32>::count_first(vec![]);
        assert!(fetch_all(&pager, 10, &quick_policy(1))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(pager.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let pager = VecPager::sentinel(vec![1u32]);
        assert_eq!(
            fetch_all(&pager, 0, &quick_policy(1)).await,
            Err(FetchError::InvalidPageSize)
        );
    }

    #[tokio::test]
    async fn test_largest_page_size_is_rejected_by_sentinel() {
        let sentinel = VecPager::sentinel(vec![1u32, 2]);
        assert_eq!(
            fetch_all(&sentinel, u64::MAX, &quick_policy(1)).await,
            Err(FetchError::InvalidPageSize)
        );
        assert!(sentinel.requests().is_empty());

        let sentinel = VecPager::sentinel(vec![1u32, 2]);
        assert_eq!(
            fetch_all(&sentinel, u64::MAX - 1, &quick_policy(1)).await,
            Ok(vec![1, 2])
        );
        assert_eq!(sentinel.requests(), vec![(0, u64::MAX)]);

        let counted = VecPager::count_first(vec![1u32, 2]);
        assert_eq!(
            fetch_all(&counted, u64::MAX, &quick_policy(1)).await,
            Ok(vec![1, 2])
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let pager = FlakyPager {
            inner: VecPager::sentinel((0..5).collect()),
            failures: 2,
            error: PageError::Transient("503".to_string()),
            calls: AtomicUsize::new(0),
        };
        let all = fetch_all(&pager, 10, &quick_policy(3)).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(pager.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_typed_error() {
        let pager = FlakyPager {
            inner: VecPager::sentinel((0..5).collect()),
            failures: usize::MAX,
            error: PageError::Transient("503".to_string()),
            calls: AtomicUsize::new(0),
        };
        let err = fetch_all(&pager, 10, &quick_policy(3)).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Backend {
                offset: 0,
                attempts: 3,
                message: "503".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let pager = FlakyPager {
            inner: VecPager::sentinel((0..5).collect()),
            failures: usize::MAX,
            error: PageError::Permanent("400".to_string()),
            calls: AtomicUsize::new(0),
        };
        let err = fetch_all(&pager, 10, &quick_policy(5)).await.unwrap_err();
        assert!(matches!(err, FetchError::Backend { attempts: 1, .. }));
        assert_eq!(pager.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_surfaced() {
        let err = fetch_all(&HangingPager, 10, &quick_policy(2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::TimedOut {
                offset: 0,
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn test_count_first_without_total() {
        struct NoCount;

        #[async_trait]
        impl Paginator for NoCount {
            type Item = u32;
            fn strategy(&self) -> Strategy {
                Strategy::CountFirst
            }
            async fn fetch_page(&self, _cursor: PageCursor) -> Result<Page<u32>, PageError> {
                Ok(Page::new(vec![1, 2]))
            }
        }

        assert_eq!(
            fetch_all(&NoCount, 10, &quick_policy(1)).await,
            Err(FetchError::MissingCount)
        );
    }

    #[tokio::test]
    async fn test_fetch_all_many_preserves_order() {
        let pagers = vec![
            VecPager::sentinel(vec![1u32, 2, 3]),
            VecPager::count_first(vec![4u32]),
            VecPager::sentinel(vec![]),
        ];
        let results = fetch_all_many(pagers, 2, &quick_policy(1), 2)
            .await
            .unwrap();
        assert_eq!(results, vec![vec![1, 2, 3], vec![4], vec![]]);
    }

    #[tokio::test]
    async fn test_fetch_all_many_bounds_in_flight_fetches() {
        for (concurrency, fast_requests) in [(1usize, 0usize), (2, 1)] {
            let slow = Arc::new(AtomicUsize::new(0));
            let fast = Arc::new(AtomicUsize::new(0));
            let pagers = vec![
                CountingPager {
                    records: vec![1],
                    delay: Some(Duration::from_secs(60)),
                    requests: slow.clone(),
                },
                CountingPager {
                    records: vec![2],
                    delay: None,
                    requests: fast.clone(),
                },
            ];
            let policy = RetryPolicy {
                timeout: Duration::from_secs(120),
                ..quick_policy(1)
            };

            let mut fetch =
                tokio_test::task::spawn(fetch_all_many(pagers, 10, &policy, concurrency));
            tokio_test::assert_pending!(fetch.poll());
            assert_eq!(slow.load(Ordering::SeqCst), 1);
            assert_eq!(fast.load(Ordering::SeqCst), fast_requests, "concurrency={}", concurrency);
        }
    }
}
