//! Account and pair identifiers.
//!
//! Addresses are opaque 20-byte identifiers supplied by the execution
//! environment. Pairs are keyed by their canonically ordered token
//! addresses, and every pair gets a deterministic address derived from
//! that key so fee callbacks can be authenticated against the registry.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of an address in bytes
pub const ADDRESS_LENGTH: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// A 20-byte account or token address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The zero address
    pub const ZERO: Self = Self([0u8; ADDRESS_LENGTH]);

    /// Create from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for a human-readable label
    pub fn from_label(label: &str) -> Self {
        Self::derive(&[b"musd:label:", label.as_bytes()])
    }

    /// Hash-derived address over the concatenated parts
    pub(crate) fn derive(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Hex encoding with `0x` prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// First 4 bytes as hex, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| Error::InvalidParameter {
            name: "address".into(),
            reason: e.to_string(),
        })?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(Error::InvalidParameter {
                name: "address".into(),
                reason: format!("expected {} bytes, got {}", ADDRESS_LENGTH, bytes.len()),
            });
        }
        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAIR KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonically ordered token pair (`token0 < token1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    token0: Address,
    token1: Address,
}

impl PairKey {
    /// Canonicalize an unordered pair
    pub fn new(token_a: Address, token_b: Address) -> Result<Self> {
        if token_a == token_b {
            return Err(Error::IdenticalTokens(token_a.to_hex()));
        }
        if token_a.is_zero() || token_b.is_zero() {
            return Err(Error::ZeroAddress("pair token".into()));
        }
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Ok(Self { token0, token1 })
    }

    /// Lower-ordered token
    pub fn token0(&self) -> Address {
        self.token0
    }

    /// Higher-ordered token
    pub fn token1(&self) -> Address {
        self.token1
    }

    /// Whether `token` is one side of the pair
    pub fn contains(&self, token: &Address) -> bool {
        self.token0 == *token || self.token1 == *token
    }

    /// The other side of the pair
    pub fn other(&self, token: &Address) -> Result<Address> {
        if *token == self.token0 {
            Ok(self.token1)
        } else if *token == self.token1 {
            Ok(self.token0)
        } else {
            Err(Error::TokenNotInPair {
                token: token.to_hex(),
                pair: self.to_string(),
            })
        }
    }

    /// Deterministic address of the pool for this pair
    pub fn pair_address(&self) -> Address {
        Address::derive(&[b"musd:pair:", self.token0.as_bytes(), self.token1.as_bytes()])
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.token0.short(), self.token1.short())
    }
}
