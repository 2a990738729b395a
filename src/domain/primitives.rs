//! Domain primitives: BlockTime, Interval, EntityId.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Longest persisted key: a 20-byte address followed by a 32-byte sub-index.
pub const MAX_ENTITY_ID_LEN: usize = 52;

/// Block timestamp in seconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockTime(pub i64);

impl BlockTime {
    /// Create a BlockTime from seconds.
    pub fn new(secs: i64) -> Self {
        BlockTime(secs)
    }

    /// Get the underlying seconds value.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Start of the interval bucket containing this timestamp. `None` when the
    /// bucket would begin before `i64::MIN`.
    pub fn bucket_start(&self, interval: Interval) -> Option<BlockTime> {
        let width = interval.seconds();
        self.0.div_euclid(width).checked_mul(width).map(BlockTime)
    }

    /// First bucket boundary strictly after this timestamp.
    pub fn next_bucket_start(&self, interval: Interval) -> Option<BlockTime> {
        let width = interval.seconds();
        self.0
            .div_euclid(width)
            .checked_add(1)?
            .checked_mul(width)
            .map(BlockTime)
    }

    /// Whether every maintained interval has a bucket for this timestamp.
    pub fn is_bucketable(&self) -> bool {
        Interval::ALL
            .iter()
            .all(|interval| self.bucket_start(*interval).is_some())
    }
}

impl std::fmt::Display for BlockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width of a stats bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    Day,
}

impl Interval {
    /// Every interval maintained by the counter writer.
    pub const ALL: [Interval; 2] = [Interval::Hour, Interval::Day];

    pub fn seconds(&self) -> i64 {
        match self {
            Interval::Hour => 3_600,
            Interval::Day => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            other => Err(format!("unknown interval: {}", other)),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdError {
    #[error("entity id is empty")]
    Empty,
    #[error("entity id is {0} bytes, at most 52 allowed")]
    TooLong(usize),
    #[error("entity id is not valid hex: {0}")]
    InvalidHex(String),
}

/// Opaque entity key.
///
/// Ids are pure functions of stable inputs: a contract or account address,
/// optionally followed by a 4-byte index, a 32-byte word, or a second address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(Vec<u8>);

impl EntityId {
    pub fn from_address(address: Address) -> Self {
        EntityId(address.as_slice().to_vec())
    }

    /// `address ‖ index` with the index big-endian, so byte order follows index order.
    pub fn with_index(address: Address, index: u32) -> Self {
        let mut bytes = address.as_slice().to_vec();
        bytes.extend_from_slice(&index.to_be_bytes());
        EntityId(bytes)
    }

    /// `address ‖ word`.
    pub fn with_word(address: Address, word: B256) -> Self {
        let mut bytes = address.as_slice().to_vec();
        bytes.extend_from_slice(word.as_slice());
        EntityId(bytes)
    }

    /// `left ‖ right`, used for per-(contract, account) entities.
    pub fn pair(left: Address, right: Address) -> Self {
        let mut bytes = left.as_slice().to_vec();
        bytes.extend_from_slice(right.as_slice());
        EntityId(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EntityIdError> {
        if bytes.is_empty() {
            return Err(EntityIdError::Empty);
        }
        if bytes.len() > MAX_ENTITY_ID_LEN {
            return Err(EntityIdError::TooLong(bytes.len()));
        }
        Ok(EntityId(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The leading address, when the id is at least 20 bytes long.
    pub fn address(&self) -> Option<Address> {
        self.0.get(..20).map(Address::from_slice)
    }

    /// The trailing address of a [`EntityId::pair`] id.
    pub fn second_address(&self) -> Option<Address> {
        if self.0.len() == 40 {
            Some(Address::from_slice(&self.0[20..]))
        } else {
            None
        }
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl From<Address> for EntityId {
    fn from(address: Address) -> Self {
        EntityId::from_address(address)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| EntityIdError::InvalidHex(e.to_string()))?;
        EntityId::from_bytes(&bytes)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EntityId::from_str(&s).map_err(serde::de::Error::custom)
    }
}
