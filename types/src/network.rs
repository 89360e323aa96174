//! CAIP-2 network identifiers.
//!
//! A network id is a `namespace:reference` pair, e.g. `eip155:1` for
//! Ethereum mainnet or `bip122:000000000019d6689c085ae165831e93` for
//! Bitcoin. The namespace selects the chain standard; the reference picks
//! the concrete network within it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated CAIP-2 network identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    /// Parse and validate a CAIP-2 string.
    ///
    /// Namespace: 3–8 chars of `[a-z0-9]`. Reference: 1–32 chars of
    /// `[a-zA-Z0-9-_]`. Exactly one `:` separator.
    pub fn parse(s: &str) -> Result<Self, InvalidNetworkId> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| InvalidNetworkId(s.to_string()))?;

        let ns_ok = (3..=8).contains(&namespace.len())
            && namespace
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        let ref_ok = (1..=32).contains(&reference.len())
            && reference
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if ns_ok && ref_ok && !reference.contains(':') {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidNetworkId(s.to_string()))
        }
    }

    /// EVM network id for the given numeric chain id (`eip155:<id>`).
    pub fn eip155(chain_id: u64) -> Self {
        Self(format!("eip155:{chain_id}"))
    }

    /// UTXO network id for the given genesis-hash prefix (`bip122:<hash>`).
    pub fn bip122(genesis: &str) -> Self {
        Self(format!("bip122:{genesis}"))
    }

    /// Cosmos-family network id (`cosmos:<chain-name>`).
    pub fn cosmos(chain: &str) -> Self {
        Self(format!("cosmos:{chain}"))
    }

    /// The Ripple mainnet id.
    pub fn ripple_mainnet() -> Self {
        Self("ripple:mainnet".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace portion (before the `:`).
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }

    /// The reference portion (after the `:`).
    pub fn reference(&self) -> &str {
        self.0.split_once(':').map(|(_, r)| r).unwrap_or("")
    }

    /// For `eip155` ids, the numeric chain id.
    pub fn evm_chain_id(&self) -> Option<u64> {
        if self.namespace() == "eip155" {
            self.reference().parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a string is not a valid CAIP-2 identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CAIP-2 network id: {0}")]
pub struct InvalidNetworkId(pub String);
