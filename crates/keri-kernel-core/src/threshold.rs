//! Signing thresholds.
//!
//! A threshold is either a plain count of required signatures or a list of
//! clauses of fractional weights. Weighted thresholds are satisfied when every
//! clause sums to at least one over the verified signers. Weights are compared
//! with exact integer arithmetic.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationError};

/// A single fractional weight `num/den`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Weight {
    pub num: u64,
    pub den: u64,
}

impl Weight {
    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    pub const ONE: Self = Self { num: 1, den: 1 };
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl fmt::Debug for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Weight {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| CoreError::malformed(format!("invalid weight {s:?}")))
        };
        match s.split_once('/') {
            Some((num, den)) => Ok(Self::new(parse(num)?, parse(den)?)),
            None => Ok(Self::new(parse(s)?, 1)),
        }
    }
}

impl Serialize for Weight {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Weight {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Exact sum of fractions.
#[derive(Clone, Copy)]
struct Fraction {
    num: u128,
    den: u128,
}

impl Fraction {
    const ZERO: Self = Self { num: 0, den: 1 };

    /// `None` when the exact sum no longer fits.
    fn checked_add(self, w: Weight) -> Option<Self> {
        let (wn, wd) = (u128::from(w.num), u128::from(w.den));
        let num = self
            .num
            .checked_mul(wd)?
            .checked_add(wn.checked_mul(self.den)?)?;
        let den = self.den.checked_mul(wd)?;
        let g = gcd(num, den).max(1);
        Some(Self {
            num: num / g,
            den: den / g,
        })
    }

    fn at_least_one(self) -> bool {
        self.num >= self.den
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Signing threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// At least this many distinct signers.
    Count(u64),
    /// Clauses of weights, one weight per key in key-list order.
    Weighted(Vec<Vec<Weight>>),
}

impl Threshold {
    /// Default threshold for `keys` signers: half, rounded up.
    pub fn default_for(keys: usize) -> Self {
        Threshold::Count((keys as u64).div_ceil(2).max(1))
    }

    /// Number of keys the threshold is written for, if weighted.
    fn weight_count(&self) -> Option<usize> {
        match self {
            Threshold::Count(_) => None,
            Threshold::Weighted(clauses) => Some(clauses.iter().map(Vec::len).sum()),
        }
    }

    /// Check the threshold is well formed and satisfiable over `key_count`
    /// keys.
    pub fn validate(&self, key_count: usize) -> Result<(), ValidationError> {
        if key_count == 0 {
            return Err(ValidationError::InvalidThreshold(
                "empty key list".to_string(),
            ));
        }
        match self {
            Threshold::Count(0) => Err(ValidationError::InvalidThreshold(
                "threshold must be at least 1".to_string(),
            )),
            Threshold::Count(n) if *n as usize > key_count => {
                Err(ValidationError::InvalidThreshold(format!(
                    "threshold {n} exceeds {key_count} keys"
                )))
            }
            Threshold::Count(_) => Ok(()),
            Threshold::Weighted(clauses) => {
                if clauses.is_empty() || clauses.iter().any(Vec::is_empty) {
                    return Err(ValidationError::InvalidThreshold(
                        "empty weight clause".to_string(),
                    ));
                }
                if self.weight_count() != Some(key_count) {
                    return Err(ValidationError::InvalidThreshold(format!(
                        "{} weights for {key_count} keys",
                        self.weight_count().unwrap_or(0)
                    )));
                }
                for clause in clauses {
                    if clause.iter().any(|w| w.den == 0 || w.num > w.den) {
                        return Err(ValidationError::InvalidThreshold(
                            "weights must be fractions in [0, 1]".to_string(),
                        ));
                    }
                    let total = clause
                        .iter()
                        .try_fold(Fraction::ZERO, |acc, w| acc.checked_add(*w))
                        .ok_or_else(|| {
                            ValidationError::InvalidThreshold("weight sum overflows".to_string())
                        })?;
                    if !total.at_least_one() {
                        return Err(ValidationError::InvalidThreshold(
                            "weight clause can never be satisfied".to_string(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Whether signatures from the keys at `indices` satisfy the threshold.
    pub fn is_satisfied(&self, indices: &[usize]) -> bool {
        let signed: BTreeSet<usize> = indices.iter().copied().collect();
        match self {
            Threshold::Count(n) => signed.len() as u64 >= *n && *n > 0,
            Threshold::Weighted(clauses) => {
                let mut offset = 0;
                clauses.iter().all(|clause| {
                    let total = clause
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| signed.contains(&(offset + i)))
                        .try_fold(Fraction::ZERO, |acc, (_, w)| acc.checked_add(*w));
                    offset += clause.len();
                    total.is_some_and(Fraction::at_least_one)
                })
            }
        }
    }

    /// Text committed to by a next-keys commitment.
    pub fn canonical_text(&self) -> String {
        match self {
            Threshold::Count(n) => format!("{n:x}"),
            Threshold::Weighted(clauses) => clauses
                .iter()
                .map(|clause| {
                    clause
                        .iter()
                        .map(Weight::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect::<Vec<_>>()
                .join("&"),
        }
    }

    /// Wire value of the `sith` field.
    pub fn to_value(&self) -> Value {
        let clause_value = |clause: &Vec<Weight>| {
            Value::Array(clause.iter().map(|w| Value::Text(w.to_string())).collect())
        };
        match self {
            Threshold::Count(n) => Value::Text(format!("{n:x}")),
            Threshold::Weighted(clauses) if clauses.len() == 1 => clause_value(&clauses[0]),
            Threshold::Weighted(clauses) => {
                Value::Array(clauses.iter().map(clause_value).collect())
            }
        }
    }

    /// Parse the `sith` field.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        fn clause(items: &[Value]) -> Result<Vec<Weight>, CoreError> {
            items
                .iter()
                .map(|item| match item {
                    Value::Text(t) => t.parse(),
                    _ => Err(CoreError::malformed("weight must be a string")),
                })
                .collect()
        }

        match value {
            Value::Text(hex) => u64::from_str_radix(hex, 16)
                .map(Threshold::Count)
                .map_err(|_| CoreError::malformed(format!("invalid threshold {hex:?}"))),
            Value::Array(items) if items.iter().all(|i| matches!(i, Value::Array(_))) => {
                let clauses = items
                    .iter()
                    .filter_map(|i| match i {
                        Value::Array(inner) => Some(clause(inner)),
                        _ => None,
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Threshold::Weighted(clauses))
            }
            Value::Array(items) => Ok(Threshold::Weighted(vec![clause(items)?])),
            _ => Err(CoreError::malformed("threshold must be a string or list")),
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Count(1)
    }
}
