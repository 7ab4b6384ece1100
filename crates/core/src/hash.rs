// Copyright (C) 2015-2025 The Neo Project.
//
// hash.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Fixed-width hash types used on the Neo N3 wire.
//!
//! Both types store bytes in the chain's internal little-endian order and
//! render the reversed, `0x`-prefixed hex form the RPC layer uses.

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The length of a script hash in bytes.
pub const UINT160_SIZE: usize = 20;

/// The length of a transaction or block hash in bytes.
pub const UINT256_SIZE: usize = 32;

macro_rules! hash_type {
    ($name:ident, $size:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $size]);

        impl $name {
            /// Returns the all-zero hash.
            pub fn zero() -> Self {
                Self([0u8; $size])
            }

            /// Checks whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Wraps a fixed-size array (little-endian byte order).
            pub fn from_array(value: [u8; $size]) -> Self {
                Self(value)
            }

            /// Copies a slice of exactly the right length.
            pub fn from_bytes(value: &[u8]) -> Result<Self, CoreError> {
                if value.len() != $size {
                    return Err(CoreError::InvalidHashLength {
                        expected: $size,
                        actual: value.len(),
                    });
                }
                let mut data = [0u8; $size];
                data.copy_from_slice(value);
                Ok(Self(data))
            }

            /// Returns the little-endian bytes.
            pub fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }

            /// Returns the bytes as an owned array.
            pub fn to_array(&self) -> [u8; $size] {
                self.0
            }

            /// Parses the RPC form: `0x`-prefixed hex, most significant byte
            /// first, or the same without the prefix.
            pub fn parse(s: &str) -> Result<Self, CoreError> {
                let trimmed = s.strip_prefix("0x").unwrap_or(s);
                if trimmed.len() != $size * 2 {
                    return Err(CoreError::InvalidHash(s.to_string()));
                }
                let mut data: Vec<u8> =
                    hex::decode(trimmed).map_err(|_| CoreError::InvalidHash(s.to_string()))?;
                data.reverse();
                Self::from_bytes(&data)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                write!(f, "0x{}", hex::encode(reversed))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<[u8; $size]> for $name {
            fn from(data: [u8; $size]) -> Self {
                Self(data)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    Self::parse(&s).map_err(serde::de::Error::custom)
                } else {
                    let bytes = Vec::<u8>::deserialize(deserializer)?;
                    Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
                }
            }
        }
    };
}

hash_type!(UInt160, UINT160_SIZE, "A 160-bit contract or account hash.");
hash_type!(UInt256, UINT256_SIZE, "A 256-bit transaction or block hash.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let literal = "0xd2a4cff31913016155e38e474a2c06d08be276cf";
        let hash = UInt160::parse(literal).unwrap();
        assert_eq!(hash.to_string(), literal);
    }

    #[test]
    fn parse_accepts_unprefixed() {
        let hash = UInt256::parse(&"ab".repeat(32)).unwrap();
        assert!(!hash.is_zero());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(UInt160::parse("0x1234").is_err());
        assert!(UInt160::from_bytes(&[0u8; 19]).is_err());
    }

    #[test]
    fn display_reverses_byte_order() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xcf;
        let hash = UInt160::from_array(bytes);
        assert!(hash.to_string().ends_with("cf"));
    }

    #[test]
    fn binary_serde_preserves_internal_order() {
        let hash = UInt256::parse(&"1f".repeat(32)).unwrap();
        let encoded = bincode::serialize(&hash).unwrap();
        let decoded: UInt256 = bincode::deserialize(&encoded).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn json_serde_uses_rpc_form() {
        let literal = "0xd2a4cff31913016155e38e474a2c06d08be276cf";
        let hash = UInt160::parse(literal).unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{literal}\""));
        let back: UInt160 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
