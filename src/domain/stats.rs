//! Cumulative counters and the read-model shapes built from them.

use crate::domain::{ArithmeticError, BlockTime, Decimal, EntityId, Interval};
use alloy_primitives::U256;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Counter names.
pub mod counter {
    pub const EVENTS_COUNT: &str = "eventsCount";
    pub const TRANSFERS_COUNT: &str = "transfersCount";
    pub const TOTAL_MINTED: &str = "totalMinted";
    pub const TOTAL_BURNED: &str = "totalBurned";
    pub const TOTAL_TRANSFERRED: &str = "totalTransferred";
    pub const COLLATERAL_UPDATES: &str = "collateralUpdates";
    pub const IDENTITIES_REGISTERED: &str = "identitiesRegistered";
    pub const SETTLEMENTS_CREATED: &str = "settlementsCreated";
    pub const TOKENS_DEPLOYED: &str = "tokensDeployed";
}

/// Named cumulative counters. Missing names read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters(BTreeMap<String, U256>);

impl Counters {
    pub fn new() -> Self {
        Counters(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> U256 {
        self.0.get(name).copied().unwrap_or(U256::ZERO)
    }

    pub fn set(&mut self, name: &str, value: U256) {
        self.0.insert(name.to_string(), value);
    }

    pub fn add(&mut self, name: &str, delta: U256) -> Result<(), ArithmeticError> {
        let next = self
            .get(name)
            .checked_add(delta)
            .ok_or(ArithmeticError::Overflow("counter add"))?;
        self.0.insert(name.to_string(), next);
        Ok(())
    }

    /// Raise every counter to at least `floor`'s value; names only in `floor` are carried over.
    pub fn raise_to(&mut self, floor: &Counters) {
        for (name, value) in &floor.0 {
            let entry = self.0.entry(name.clone()).or_insert(U256::ZERO);
            if *entry < *value {
                *entry = *value;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, U256)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Serialize for Counters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, &value.to_string())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Counters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut counters = BTreeMap::new();
        for (name, value) in raw {
            let value = U256::from_str_radix(&value, 10).map_err(serde::de::Error::custom)?;
            counters.insert(name, value);
        }
        Ok(Counters(counters))
    }
}

/// A pending counter increment recorded while handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub entity: EntityId,
    pub name: &'static str,
    pub amount: U256,
}

/// One persisted per-interval row: cumulative counters after the last event in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBucket {
    pub entity: EntityId,
    pub interval: Interval,
    pub bucket_start: BlockTime,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp: BlockTime,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub entity: EntityId,
    pub interval: Interval,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
    pub label: &'static str,
    pub count: u64,
    /// Share of holders in this bucket; display only.
    pub share_pct: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_checked() {
        let mut c = Counters::new();
        c.add(counter::EVENTS_COUNT, U256::from(2u8)).unwrap();
        c.add(counter::EVENTS_COUNT, U256::from(3u8)).unwrap();
        assert_eq!(c.get(counter::EVENTS_COUNT), U256::from(5u8));
        assert_eq!(c.get(counter::TOTAL_MINTED), U256::ZERO);

        c.set(counter::TOTAL_MINTED, U256::MAX);
        assert!(c.add(counter::TOTAL_MINTED, U256::from(1u8)).is_err());
        assert_eq!(c.get(counter::TOTAL_MINTED), U256::MAX);
    }

    #[test]
    fn test_raise_to_takes_per_name_max() {
        let mut a = Counters::new();
        a.set("x", U256::from(5u8));
        a.set("y", U256::from(1u8));
        let mut b = Counters::new();
        b.set("x", U256::from(3u8));
        b.set("y", U256::from(9u8));
        b.set("z", U256::from(2u8));

        a.raise_to(&b);
        assert_eq!(a.get("x"), U256::from(5u8));
        assert_eq!(a.get("y"), U256::from(9u8));
        assert_eq!(a.get("z"), U256::from(2u8));
    }

    #[test]
    fn test_json_uses_decimal_strings() {
        let mut c = Counters::new();
        c.set(counter::TOTAL_MINTED, U256::from(10u8).pow(U256::from(30u8)));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["totalMinted"], format!("1{}", "0".repeat(30)));
        let back: Counters = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
