//! Percentage-of-max histograms.

use super::StatsError;
use crate::db::{EntityPager, Repository};
use crate::domain::amount::{mul_div, percent_of, pow10, u256_dec};
use crate::domain::{ArithmeticError, Decimal, DistributionBucket, Entity, EntityId, EntityKind, U256};
use crate::pagination::{fetch_all, RetryPolicy};
use alloy_primitives::U512;
use serde::Serialize;
use std::sync::Arc;

/// `(label, lower %, upper %)`. Lower bounds are inclusive and upper bounds
/// exclusive, except that the last bucket also includes 100%.
pub const BUCKETS: [(&str, u64, u64); 5] = [
    ("0-2%", 0, 2),
    ("2-10%", 2, 10),
    ("10-20%", 10, 20),
    ("20-40%", 20, 40),
    ("40-100%", 40, 100),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub entity: EntityId,
    /// Largest record; the 100% mark.
    #[serde(with = "u256_dec")]
    pub max: U256,
    /// Always the sum of the bucket counts.
    pub total_holders: u64,
    pub buckets: Vec<DistributionBucket>,
}

fn widen(value: U256) -> U512 {
    U512::from_be_slice(&value.to_be_bytes::<32>())
}

/// Index of the bucket holding `value` relative to `max`, compared as
/// `value * 100 < max * upper` on exact integers.
fn bucket_index(value: U256, max: U256) -> usize {
    let scaled = widen(value) * U512::from(100u8);
    let max = widen(max);
    BUCKETS
        .iter()
        .position(|(_, _, upper)| scaled < max * U512::from(*upper))
        .unwrap_or(BUCKETS.len() - 1)
}

/// Bucket `values` against their own maximum. Returns the buckets and the maximum.
pub fn bucketize(values: &[U256]) -> Result<(Vec<DistributionBucket>, U256), ArithmeticError> {
    let max = values.iter().copied().max().unwrap_or(U256::ZERO);
    let mut counts = [0u64; BUCKETS.len()];
    for value in values {
        counts[bucket_index(*value, max)] += 1;
    }
    let total: u64 = counts.iter().sum();

    let buckets = BUCKETS
        .into_iter()
        .zip(counts)
        .map(|((label, _, _), count)| {
            let share_pct = if total == 0 {
                Decimal::zero()
            } else {
                percent_of(U256::from(count), U256::from(total))?
            };
            Ok(DistributionBucket {
                label,
                count,
                share_pct,
            })
        })
        .collect::<Result<Vec<_>, ArithmeticError>>()?;
    Ok((buckets, max))
}

pub struct DistributionService {
    repo: Arc<Repository>,
    page_size: u64,
    policy: RetryPolicy,
}

impl DistributionService {
    pub fn new(repo: Arc<Repository>, page_size: u64, policy: RetryPolicy) -> Self {
        DistributionService {
            repo,
            page_size,
            policy,
        }
    }

    /// Token: non-zero holder balances. TokenRegistry: per bond, the
    /// denomination asset required to redeem it (`supply * face value / 10^decimals`).
    pub async fn query(&self, id: &EntityId) -> Result<Distribution, StatsError> {
        let entity = self
            .repo
            .get_entity(id)
            .await?
            .ok_or_else(|| StatsError::NotFound(id.clone()))?;

        let values = match entity.kind() {
            EntityKind::Token => self.holder_balances(id).await?,
            EntityKind::TokenRegistry => self.bond_requirements(id).await?,
            other => return Err(StatsError::Unsupported(other)),
        };

        let (buckets, max) = bucketize(&values)?;
        Ok(Distribution {
            entity: id.clone(),
            max,
            total_holders: buckets.iter().map(|b| b.count).sum(),
            buckets,
        })
    }

    async fn holder_balances(&self, token: &EntityId) -> Result<Vec<U256>, StatsError> {
        let pager = EntityPager::children_of(self.repo.clone(), EntityKind::TokenBalance, token.clone());
        let balances = fetch_all(&pager, self.page_size, &self.policy).await?;
        Ok(balances
            .into_iter()
            .filter_map(|e| match e {
                Entity::TokenBalance(b) if !b.value.is_zero() => Some(b.value.exact()),
                _ => None,
            })
            .collect())
    }

    async fn bond_requirements(&self, registry: &EntityId) -> Result<Vec<U256>, StatsError> {
        let pager = EntityPager::children_of(self.repo.clone(), EntityKind::Token, registry.clone());
        let tokens = fetch_all(&pager, self.page_size, &self.policy).await?;
        let mut required = Vec::new();
        for entity in tokens {
            if let Entity::Token(token) = entity {
                if token.is_bond() {
                    required.push(mul_div(
                        token.total_supply.exact(),
                        token.face_value,
                        pow10(token.decimals)?,
                    )?);
                }
            }
        }
        Ok(required)
    }
}
