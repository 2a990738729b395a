//! Exact scaled-integer amounts.
//!
//! Every monetary value is an exact `U256` plus a decimals count. The decimal
//! string view is derived by integer division by `10^decimals` and can be
//! parsed back to the identical integer; no float ever sits between the two.

use crate::domain::Decimal;
use alloy_primitives::U256;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// `10^77` is the largest power of ten below `2^256`.
pub const MAX_DECIMALS: u8 = 77;

/// rust_decimal cannot carry a scale beyond this.
const MAX_DISPLAY_SCALE: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("arithmetic underflow in {0}")]
    Underflow(&'static str),
    #[error("decimals {0} exceed the supported maximum of 77")]
    DecimalsOutOfRange(u64),
    #[error("invalid decimal string {0:?}")]
    InvalidDecimal(String),
    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),
}

/// `10^decimals` as an exact integer.
pub fn pow10(decimals: u8) -> Result<U256, ArithmeticError> {
    if decimals > MAX_DECIMALS {
        return Err(ArithmeticError::DecimalsOutOfRange(decimals as u64));
    }
    U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .ok_or(ArithmeticError::Overflow("pow10"))
}

/// Validate an on-chain `decimals()` value.
pub fn checked_decimals(raw: U256) -> Result<u8, ArithmeticError> {
    if raw > U256::from(MAX_DECIMALS) {
        return Err(ArithmeticError::DecimalsOutOfRange(
            raw.saturating_to::<u64>(),
        ));
    }
    Ok(raw.saturating_to::<u8>())
}

/// `a * b / denominator` on exact integers, truncating toward zero.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, ArithmeticError> {
    if denominator.is_zero() {
        return Err(ArithmeticError::DivisionByZero("mul_div"));
    }
    a.checked_mul(b)
        .map(|product| product / denominator)
        .ok_or(ArithmeticError::Overflow("mul_div"))
}

/// `value / max` in basis points, computed on the exact integers.
pub fn ratio_bps(value: U256, max: U256) -> Result<U256, ArithmeticError> {
    mul_div(value, U256::from(10_000u32), max)
}

/// Percentage of `part` in `whole` for display, rounded down to 0.01%.
pub fn percent_of(part: U256, whole: U256) -> Result<Decimal, ArithmeticError> {
    let bps = ratio_bps(part, whole)?;
    if bps > U256::from(i64::MAX as u64) {
        return Err(ArithmeticError::Overflow("percent_of"));
    }
    Ok(Decimal::from_bps(bps.saturating_to::<i64>()))
}

/// An exact token quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TokenAmount {
    exact: U256,
    decimals: u8,
}

impl TokenAmount {
    pub fn new(exact: U256, decimals: u8) -> Result<Self, ArithmeticError> {
        if decimals > MAX_DECIMALS {
            return Err(ArithmeticError::DecimalsOutOfRange(decimals as u64));
        }
        Ok(TokenAmount { exact, decimals })
    }

    pub fn zero(decimals: u8) -> Result<Self, ArithmeticError> {
        Self::new(U256::ZERO, decimals)
    }

    pub fn exact(&self) -> U256 {
        self.exact
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.exact.is_zero()
    }

    pub fn checked_add(&self, delta: U256) -> Result<Self, ArithmeticError> {
        let exact = self
            .exact
            .checked_add(delta)
            .ok_or(ArithmeticError::Overflow("amount add"))?;
        Ok(TokenAmount { exact, ..*self })
    }

    pub fn checked_sub(&self, delta: U256) -> Result<Self, ArithmeticError> {
        let exact = self
            .exact
            .checked_sub(delta)
            .ok_or(ArithmeticError::Underflow("amount sub"))?;
        Ok(TokenAmount { exact, ..*self })
    }

    /// Lossless decimal rendering, e.g. `1500` with 3 decimals is `"1.5"`.
    pub fn to_decimal_string(&self) -> String {
        if self.decimals == 0 {
            return self.exact.to_string();
        }
        // decimals <= MAX_DECIMALS is enforced by every constructor
        let scale = match pow10(self.decimals) {
            Ok(scale) => scale,
            Err(_) => return self.exact.to_string(),
        };
        let whole = self.exact / scale;
        let fraction = self.exact % scale;
        if fraction.is_zero() {
            return whole.to_string();
        }
        let digits = format!(
            "{:0>width$}",
            fraction.to_string(),
            width = self.decimals as usize
        );
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }

    /// Parse a decimal string into an exact amount without rounding.
    ///
    /// More fractional digits than `decimals` is an error, not a truncation.
    pub fn parse(s: &str, decimals: u8) -> Result<Self, ArithmeticError> {
        let invalid = || ArithmeticError::InvalidDecimal(s.to_string());
        let scale = pow10(decimals)?;
        let trimmed = s.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
            || (trimmed.contains('.') && fraction.is_empty())
        {
            return Err(invalid());
        }
        if fraction.len() > decimals as usize {
            return Err(invalid());
        }

        let whole = U256::from_str_radix(whole, 10)
            .map_err(|_| ArithmeticError::Overflow("parse whole part"))?;
        let mut exact = whole
            .checked_mul(scale)
            .ok_or(ArithmeticError::Overflow("parse scale"))?;
        if !fraction.is_empty() {
            let fraction_value = U256::from_str_radix(fraction, 10)
                .map_err(|_| ArithmeticError::Overflow("parse fraction"))?;
            let padding = pow10(decimals - fraction.len() as u8)?;
            exact = exact
                .checked_add(fraction_value * padding)
                .ok_or(ArithmeticError::Overflow("parse fraction"))?;
        }
        Ok(TokenAmount { exact, decimals })
    }

    /// Convert to the display decimal type.
    ///
    /// Scales beyond 28 digits are truncated for display; magnitudes beyond
    /// 96 bits are an overflow rather than a silent clamp.
    pub fn to_decimal(&self) -> Result<Decimal, ArithmeticError> {
        let mut mantissa = self.exact;
        let mut scale = self.decimals;
        while scale > MAX_DISPLAY_SCALE {
            mantissa /= U256::from(10u8);
            scale -= 1;
        }
        if mantissa > U256::from(i128::MAX as u128) {
            return Err(ArithmeticError::Overflow("to_decimal"));
        }
        let mantissa = mantissa.saturating_to::<u128>() as i128;
        RustDecimal::try_from_i128_with_scale(mantissa, scale as u32)
            .map(Decimal::new)
            .map_err(|_| ArithmeticError::Overflow("to_decimal"))
    }
}

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

#[derive(Serialize)]
struct AmountOut {
    exact: String,
    decimals: u8,
    value: String,
}

#[derive(Deserialize)]
struct AmountIn {
    exact: String,
    decimals: u8,
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AmountOut {
            exact: self.exact.to_string(),
            decimals: self.decimals,
            value: self.to_decimal_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = AmountIn::deserialize(deserializer)?;
        let exact = U256::from_str_radix(&raw.exact, 10).map_err(serde::de::Error::custom)?;
        TokenAmount::new(exact, raw.decimals).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for a bare `U256` as a base-10 string.
pub mod u256_dec {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}
