use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const GIG_CURRENCY_CODE: &str = "GIG";
pub const GIG_CURRENCY_CODE_LOWER: &str = "gig";

const NANO_PER_COIN: i64 = 1_000_000_000;

//--------------------------------------     NanoCoin       ----------------------------------------------------------
/// An amount expressed in the smallest on-chain unit (one billionth of a coin).
///
/// All ledger messages carry amounts in this unit, and the database stores them as-is. Conversion to whole coins
/// only ever happens at display boundaries.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct NanoCoin(i64);

op!(binary NanoCoin, Add, add);
op!(binary NanoCoin, Sub, sub);
op!(inplace NanoCoin, SubAssign, sub_assign);
op!(unary NanoCoin, Neg, neg);

impl Mul<i64> for NanoCoin {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for NanoCoin {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in nano coins: {0}")]
pub struct NanoCoinConversionError(String);

impl From<i64> for NanoCoin {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for NanoCoin {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for NanoCoin {}

impl TryFrom<u64> for NanoCoin {
    type Error = NanoCoinConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(NanoCoinConversionError(format!("Value {} is too large to convert to NanoCoin", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for NanoCoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 10_000 {
            write!(f, "{}n{GIG_CURRENCY_CODE}", self.0)
        } else {
            let coins = self.0 as f64 / NANO_PER_COIN as f64;
            write!(f, "{coins:0.4} {GIG_CURRENCY_CODE}")
        }
    }
}

impl NanoCoin {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_coins(coins: i64) -> Self {
        Self(coins * NANO_PER_COIN)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = NanoCoin::from(1_500_000_000);
        let b = NanoCoin::from_coins(2);
        assert_eq!(a + b, NanoCoin::from(3_500_000_000));
        assert_eq!(b - a, NanoCoin::from(500_000_000));
        assert_eq!(-a, NanoCoin::from(-1_500_000_000));
        assert_eq!(a * 2, NanoCoin::from(3_000_000_000));
    }

    #[test]
    fn display_uses_whole_coins_for_large_amounts() {
        assert_eq!(NanoCoin::from(500).to_string(), "500nGIG");
        assert_eq!(NanoCoin::from(5_000_000_000).to_string(), "5.0000 GIG");
    }

    #[test]
    fn u64_conversion_guards_overflow() {
        assert!(NanoCoin::try_from(u64::MAX).is_err());
        assert_eq!(NanoCoin::try_from(42u64).unwrap(), NanoCoin::from(42));
    }
}
