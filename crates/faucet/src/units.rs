//! Wei/ether conversions and JSON-RPC quantity parsing

use crate::error::{FaucetError, FaucetResult};

/// Wei per ether
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

const ETHER_DECIMALS: usize = 18;

/// Render a wei amount as a decimal ether string with no trailing zeros
/// (`10^16` -> `"0.01"`, `0` -> `"0"`).
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let fraction = wei % WEI_PER_ETHER;

    if fraction == 0 {
        return whole.to_string();
    }

    let fraction = format!("{:0width$}", fraction, width = ETHER_DECIMALS);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// Parse a `0x`-prefixed hex quantity as returned by an Ethereum node
pub fn parse_quantity(value: &str) -> FaucetResult<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| FaucetError::Rpc(format!("Invalid quantity: {}", value)))?;

    if digits.is_empty() {
        return Ok(0);
    }

    u128::from_str_radix(digits, 16)
        .map_err(|e| FaucetError::Rpc(format!("Invalid quantity {}: {}", value, e)))
}

/// Big-endian bytes with leading zeros stripped, as RLP encodes integers
pub fn trim_be_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
