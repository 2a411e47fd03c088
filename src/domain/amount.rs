//! Amount type
//!
//! Domain primitive for transfer amounts in minor currency units.
//! Amounts are validated at construction time, so a non-positive amount
//! never reaches the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Amount represents a validated, strictly positive quantity of minor
/// currency units (cents for USD and EUR).
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Negation never overflows, since `-i64::MAX` is representable
///
/// # Example
/// ```
/// use atomic_ledger::domain::Amount;
///
/// let amount = Amount::new(30).unwrap();
/// assert_eq!(amount.value(), 30);
/// assert_eq!(amount.debit_delta(), -30);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(i64),

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value <= 0 {
            return Err(AmountError::NotPositive(value));
        }
        Ok(Self(value))
    }

    /// Get the underlying number of minor units.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Balance delta applied to the debited account.
    pub fn debit_delta(&self) -> i64 {
        -self.0
    }

    /// Balance delta applied to the credited account.
    pub fn credit_delta(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(value)
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_amount() {
        let amount = Amount::new(100).unwrap();
        assert_eq!(amount.value(), 100);
        assert_eq!(amount.credit_delta(), 100);
        assert_eq!(amount.debit_delta(), -100);
    }

    #[test]
    fn test_zero_and_negative_rejected() {
        assert_eq!(Amount::new(0), Err(AmountError::NotPositive(0)));
        assert_eq!(Amount::new(-5), Err(AmountError::NotPositive(-5)));
    }

    #[test]
    fn test_max_amount_negates_cleanly() {
        let amount = Amount::new(i64::MAX).unwrap();
        assert_eq!(amount.debit_delta(), -i64::MAX);
    }

    #[test]
    fn test_parse() {
        assert_eq!("42".parse::<Amount>().unwrap().value(), 42);
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::ParseError(_))));
        assert!(matches!("0".parse::<Amount>(), Err(AmountError::NotPositive(0))));
    }

    #[test]
    fn test_serde_rejects_non_positive() {
        let amount: Amount = serde_json::from_str("25").unwrap();
        assert_eq!(amount.value(), 25);
        assert!(serde_json::from_str::<Amount>("-1").is_err());
        assert_eq!(serde_json::to_string(&amount).unwrap(), "25");
    }
}
