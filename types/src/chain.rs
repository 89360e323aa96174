//! Chain-family tags used for handler dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies which chain family a request targets.
///
/// Dispatch is by exact-match tag: the router looks the tag up in its
/// handler registry. One handler implementation may be registered under
/// several tags (the UTXO handler serves every Bitcoin fork).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Ethereum,
    Bitcoin,
    BitcoinCash,
    Litecoin,
    Dogecoin,
    Cosmos,
    Osmosis,
    Thorchain,
    Ripple,
}

impl ChainFamily {
    /// The lowercase tag used on the wire and in records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bitcoin => "bitcoin",
            Self::BitcoinCash => "bitcoincash",
            Self::Litecoin => "litecoin",
            Self::Dogecoin => "dogecoin",
            Self::Cosmos => "cosmos",
            Self::Osmosis => "osmosis",
            Self::Thorchain => "thorchain",
            Self::Ripple => "ripple",
        }
    }

    /// Every chain family the pipeline knows about.
    pub fn all() -> &'static [ChainFamily] {
        &[
            Self::Ethereum,
            Self::Bitcoin,
            Self::BitcoinCash,
            Self::Litecoin,
            Self::Dogecoin,
            Self::Cosmos,
            Self::Osmosis,
            Self::Thorchain,
            Self::Ripple,
        ]
    }

    /// Whether this family uses the UTXO transaction model.
    pub fn is_utxo(&self) -> bool {
        matches!(
            self,
            Self::Bitcoin | Self::BitcoinCash | Self::Litecoin | Self::Dogecoin
        )
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Self::Ethereum),
            "bitcoin" => Ok(Self::Bitcoin),
            "bitcoincash" => Ok(Self::BitcoinCash),
            "litecoin" => Ok(Self::Litecoin),
            "dogecoin" => Ok(Self::Dogecoin),
            "cosmos" => Ok(Self::Cosmos),
            "osmosis" => Ok(Self::Osmosis),
            "thorchain" => Ok(Self::Thorchain),
            "ripple" => Ok(Self::Ripple),
            other => Err(UnknownChain(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized chain tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chain family: {0}")]
pub struct UnknownChain(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_through_from_str() {
        for family in ChainFamily::all() {
            let parsed: ChainFamily = family.as_str().parse().expect("known tag");
            assert_eq!(parsed, *family);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = "solana".parse::<ChainFamily>().unwrap_err();
        assert_eq!(err.0, "solana");
    }

    #[test]
    fn utxo_classification() {
        assert!(ChainFamily::Bitcoin.is_utxo());
        assert!(ChainFamily::Dogecoin.is_utxo());
        assert!(!ChainFamily::Ethereum.is_utxo());
        assert!(!ChainFamily::Cosmos.is_utxo());
    }
}
