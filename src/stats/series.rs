//! Three-source series reducer.
//!
//! A window is answered from the baseline (last bucket at or before `from`),
//! the buckets inside the window and the current snapshot, without replaying
//! history. Counters are cumulative, so the merged series is passed through a
//! running max and never decreases.

use super::StatsError;
use crate::db::{BucketPager, Repository};
use crate::domain::{BlockTime, Counters, EntityId, Interval, SeriesPoint, StatsBucket, TimeSeries};
use crate::pagination::{fetch_all, RetryPolicy};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on points produced by a dense query.
pub const MAX_DENSE_POINTS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeriesQuery {
    pub entity: EntityId,
    pub from: BlockTime,
    pub to: BlockTime,
    pub interval: Interval,
    #[serde(default)]
    pub dense: bool,
}

pub struct SeriesAggregator {
    repo: Arc<Repository>,
    page_size: u64,
    policy: RetryPolicy,
}

impl SeriesAggregator {
    pub fn new(repo: Arc<Repository>, page_size: u64, policy: RetryPolicy) -> Self {
        SeriesAggregator {
            repo,
            page_size,
            policy,
        }
    }

    pub async fn query_series(&self, query: &SeriesQuery) -> Result<TimeSeries, StatsError> {
        if query.from > query.to {
            return Err(StatsError::InvalidRange {
                from: query.from,
                to: query.to,
            });
        }
        if let Some(at) = [query.from, query.to].into_iter().find(|t| !t.is_bucketable()) {
            return Err(StatsError::TimestampOutOfRange(at));
        }
        if query.dense {
            let points = dense_point_count(query.from, query.to, query.interval);
            if points > MAX_DENSE_POINTS {
                return Err(StatsError::TooManyPoints(points));
            }
        }

        let pager = BucketPager::new(
            self.repo.clone(),
            query.entity.clone(),
            query.interval,
            query.from,
            query.to,
        );
        let (rows, baseline, current) = futures::try_join!(
            async {
                fetch_all(&pager, self.page_size, &self.policy)
                    .await
                    .map_err(StatsError::from)
            },
            async {
                self.repo
                    .stats_baseline(&query.entity, query.interval, query.from)
                    .await
                    .map_err(StatsError::from)
            },
            async {
                self.repo
                    .stats_current(&query.entity)
                    .await
                    .map_err(StatsError::from)
            },
        )?;

        debug!(
            entity = %query.entity,
            interval = %query.interval,
            rows = rows.len(),
            has_baseline = baseline.is_some(),
            "series sources loaded"
        );

        let merged = merge_series(
            query.from,
            query.to,
            baseline.map(|b| b.counters).unwrap_or_default(),
            rows,
            current.unwrap_or_default(),
        );
        let points = if query.dense {
            densify(&merged, query.interval, query.from, query.to)
        } else {
            merged
        };

        Ok(TimeSeries {
            entity: query.entity.clone(),
            interval: query.interval,
            points,
        })
    }
}

/// Baseline at `from`, in-window rows ascending, current snapshot at `to`; then running max.
pub fn merge_series(
    from: BlockTime,
    to: BlockTime,
    baseline: Counters,
    rows: Vec<StatsBucket>,
    current: Counters,
) -> Vec<SeriesPoint> {
    let mut points = Vec::with_capacity(rows.len() + 2);
    points.push(SeriesPoint {
        timestamp: from,
        counters: baseline,
    });
    points.extend(rows.into_iter().map(|bucket| SeriesPoint {
        timestamp: bucket.bucket_start,
        counters: bucket.counters,
    }));
    points.push(SeriesPoint {
        timestamp: to,
        counters: current,
    });
    running_max(&mut points);
    points
}

/// Raise every point to at least the previous point, counter by counter.
pub fn running_max(points: &mut [SeriesPoint]) {
    let mut floor = Counters::new();
    for point in points.iter_mut() {
        point.counters.raise_to(&floor);
        floor = point.counters.clone();
    }
}

fn dense_point_count(from: BlockTime, to: BlockTime, interval: Interval) -> u64 {
    let span = to.as_secs().saturating_sub(from.as_secs()).max(0) as u64;
    span / interval.seconds() as u64 + 2
}

/// One point at `from`, at every interval boundary inside the window and at `to`,
/// each holding the last value at or before it. `points` must be ascending.
pub fn densify(
    points: &[SeriesPoint],
    interval: Interval,
    from: BlockTime,
    to: BlockTime,
) -> Vec<SeriesPoint> {
    let step = interval.seconds();
    let mut stamps = vec![from];
    let mut next = from.next_bucket_start(interval).map(|t| t.as_secs());
    while let Some(boundary) = next.filter(|b| *b < to.as_secs()) {
        stamps.push(BlockTime::new(boundary));
        next = boundary.checked_add(step);
    }
    if to > from {
        stamps.push(to);
    }

    let mut out = Vec::with_capacity(stamps.len());
    let mut source = points.iter().peekable();
    let mut held = Counters::new();
    for stamp in stamps {
        while let Some(point) = source.next_if(|p| p.timestamp <= stamp) {
            held = point.counters.clone();
        }
        out.push(SeriesPoint {
            timestamp: stamp,
            counters: held.clone(),
        });
    }
    out
}
