//! Account addresses and coin amounts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, ValidationError, MAX_NAME_LEN};

/// An account address.
///
/// Addresses are opaque to this workspace; the only requirement is that
/// they fit a one-byte length prefix and carry no whitespace or control
/// characters, so they can be embedded in store keys and logs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidAddress`] if the address is empty, longer
    ///   than [`MAX_NAME_LEN`] bytes, or contains whitespace/control characters
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if address.is_empty() {
            return Err(ValidationError::InvalidAddress {
                address,
                reason: "empty",
            });
        }
        if address.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidAddress {
                address,
                reason: "too long",
            });
        }
        if address
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ValidationError::InvalidAddress {
                address,
                reason: "contains whitespace or control characters",
            });
        }
        Ok(Self(address))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address bytes, as embedded in store keys.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A denominated amount.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    /// Create a coin.
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// A zero amount of the same denomination.
    pub fn zero(denom: impl Into<String>) -> Self {
        Self::new(denom, 0)
    }

    /// Validate the denomination: 1..=255 bytes of ASCII alphanumerics,
    /// `/`, `-`, `.` or `_`, starting with a letter.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidCoin`] on a malformed denomination
    pub fn validate(&self) -> Result<()> {
        let valid_start = self
            .denom
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());
        if !valid_start || self.denom.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidCoin(format!(
                "invalid denomination {:?}",
                self.denom
            )));
        }
        if !self
            .denom
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '.' | '_'))
        {
            return Err(ValidationError::InvalidCoin(format!(
                "invalid denomination {:?}",
                self.denom
            )));
        }
        Ok(())
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}
