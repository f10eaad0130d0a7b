//! Recipient address parsing

use crate::error::{FaucetError, FaucetResult};
use std::fmt;

/// A recipient address that matched `^0x[0-9a-fA-F]{40}$`.
///
/// Keeps the text as submitted (echoed back to the caller) alongside the
/// decoded bytes. Registry lookups always go through [`normalized`].
///
/// [`normalized`]: RecipientAddress::normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientAddress {
    raw: String,
    bytes: [u8; 20],
}

impl RecipientAddress {
    /// Parse a claim address. Empty input is reported as missing rather than
    /// malformed.
    pub fn parse(input: &str) -> FaucetResult<Self> {
        if input.is_empty() {
            return Err(FaucetError::MissingAddress);
        }

        let digits = input
            .strip_prefix("0x")
            .ok_or(FaucetError::InvalidAddress)?;

        if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FaucetError::InvalidAddress);
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| FaucetError::InvalidAddress)?;

        Ok(Self {
            raw: input.to_string(),
            bytes,
        })
    }

    /// Address exactly as submitted
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lower-cased form used as the registry key
    pub fn normalized(&self) -> String {
        self.raw.to_ascii_lowercase()
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.bytes
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
