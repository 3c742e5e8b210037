//! Wire format primitives shared by requests, responses and configuration.
//!
//! Addresses are rendered with EIP-55 checksums, amounts as decimal strings and
//! byte payloads as `0x`-prefixed hex.

use alloy_primitives::{Address, U256, hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An account address that always serializes with EIP-55 checksum encoding.
///
/// ```
/// use metatx_relay::types::ChecksummedAddress;
///
/// let addr: ChecksummedAddress = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045".parse().unwrap();
/// assert_eq!(addr.to_string(), "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChecksummedAddress(pub Address);

impl FromStr for ChecksummedAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address::from_str(s)?;
        Ok(Self(address))
    }
}

impl Display for ChecksummedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl Serialize for ChecksummedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_checksum(None))
    }
}

impl<'de> Deserialize<'de> for ChecksummedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<ChecksummedAddress> for Address {
    fn from(value: ChecksummedAddress) -> Self {
        value.0
    }
}

impl From<Address> for ChecksummedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// Serde adapter for amounts carried as base-10 strings.
///
/// Accepts either a decimal string or a JSON number small enough for `u64`.
pub mod decimal_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DecimalWire {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match DecimalWire::deserialize(deserializer)? {
            DecimalWire::Text(s) => U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom),
            DecimalWire::Number(n) => Ok(U256::from(n)),
        }
    }
}

/// Serde adapter for a list of decimal amounts.
pub mod decimal_u256_vec {
    use alloy_primitives::U256;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    struct Item(#[serde(with = "super::decimal_u256")] U256);

    pub fn serialize<S>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = Vec::<Item>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|item| item.0).collect())
    }
}

/// Amount wrapper for places where a newtype reads better than a serde attribute,
/// such as map values in configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecimalU256(#[serde(with = "decimal_u256")] pub U256);

impl From<DecimalU256> for U256 {
    fn from(value: DecimalU256) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Amounts {
        #[serde(with = "decimal_u256")]
        single: U256,
        #[serde(with = "decimal_u256_vec")]
        many: Vec<U256>,
    }

    #[test]
    fn test_checksummed_address_display() {
        let addr = ChecksummedAddress(address!("0xd8da6bf26964af9d7eed9e03e53415d37aa96045"));
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045\""
        );
    }

    #[test]
    fn test_decimal_amounts_accept_strings_and_numbers() {
        let parsed: Amounts =
            serde_json::from_str(r#"{"single": "105", "many": ["1", 2, "340282366920938463463374607431768211456"]}"#)
                .unwrap();
        assert_eq!(parsed.single, U256::from(105u64));
        assert_eq!(parsed.many[1], U256::from(2u64));
        assert_eq!(parsed.many[2], U256::from(1u64) << 128);
    }

    #[test]
    fn test_decimal_amounts_serialize_as_strings() {
        let amounts = Amounts {
            single: U256::from(7u64),
            many: vec![U256::ZERO],
        };
        let json = serde_json::to_value(&amounts).unwrap();
        assert_eq!(json["single"], "7");
        assert_eq!(json["many"][0], "0");
    }

    #[test]
    fn test_decimal_rejects_hex() {
        let parsed = serde_json::from_str::<DecimalU256>("\"0x10\"");
        assert!(parsed.is_err());
    }
}
