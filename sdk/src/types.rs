//! Data types exchanged with the wallet capability.

use serde::{Deserialize, Serialize};

use keybridge_types::NetworkId;

/// A derived public key and its address, tagged with the networks it is
/// valid for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedKey {
    pub pubkey: String,
    pub address: String,
    /// BIP-32 path as raw u32 elements (hardened = high bit set).
    pub derivation_path: Vec<u32>,
    pub networks: Vec<NetworkId>,
}

impl DerivedKey {
    /// Whether this key is usable on `network`.
    pub fn valid_on(&self, network: &NetworkId) -> bool {
        self.networks.iter().any(|n| n == network)
    }
}

/// A cached balance entry for one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    /// Canonical asset identifier, CAIP-19 style
    /// (e.g. `eip155:1/slip44:60`).
    pub asset: String,
    pub network_id: NetworkId,
    pub symbol: String,
    /// Display-unit amount as a decimal string.
    pub amount: String,
}

/// An unspent transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshi-equivalent integer units.
    pub value: u64,
    pub address: String,
    /// Path of the key that owns this output, for device signing.
    pub derivation_path: Vec<u32>,
}

/// One output of a UTXO transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    /// Value in satoshi-equivalent integer units.
    pub value: u64,
    /// Marks the change output so the device can verify it.
    #[serde(default)]
    pub is_change: bool,
}

/// A fully selected, unsigned UTXO transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTransaction {
    pub network_id: NetworkId,
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    /// `sum(inputs) - sum(outputs)`. Never negative.
    pub fee: u64,
}

impl UtxoTransaction {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// Fee fields for an EVM transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvmFees {
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        gas_price: u128,
    },
}

/// An unsigned EVM transaction ready for device signing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTransaction {
    pub network_id: NetworkId,
    pub chain_id: u64,
    pub from: String,
    pub to: String,
    /// Value in wei, 0x-hex.
    pub value: String,
    /// Calldata, 0x-hex.
    pub data: String,
    pub nonce: u64,
    pub gas_limit: u64,
    #[serde(flatten)]
    pub fees: EvmFees,
    pub derivation_path: Vec<u32>,
}

/// The subset of an EVM transaction needed for a gas estimate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmCallRequest {
    pub from: String,
    pub to: String,
    pub value: String,
    pub data: String,
}

/// Current EVM fee-market data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmFeeData {
    /// Present on EIP-1559 networks.
    pub base_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Legacy gas price, always available as a fallback.
    pub gas_price: u128,
}

/// An account-model send for Cosmos-family chains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosSendTx {
    pub network_id: NetworkId,
    pub from: String,
    pub to: String,
    /// Amount in the chain's smallest native unit (e.g. uatom).
    pub amount: u128,
    pub denom: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub derivation_path: Vec<u32>,
}

/// An account-model send for Ripple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RippleSendTx {
    pub network_id: NetworkId,
    pub from: String,
    pub to: String,
    /// Amount in drops.
    pub amount: u128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
    pub derivation_path: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_network_check() {
        let key = DerivedKey {
            pubkey: "02ab".into(),
            address: "0xfeed".into(),
            derivation_path: vec![0x8000002c, 0x8000003c, 0x80000000, 0, 0],
            networks: vec![NetworkId::eip155(1), NetworkId::eip155(137)],
        };
        assert!(key.valid_on(&NetworkId::eip155(1)));
        assert!(!key.valid_on(&NetworkId::eip155(10)));
    }

    #[test]
    fn utxo_transaction_totals() {
        let tx = UtxoTransaction {
            network_id: NetworkId::bip122("000000000019d6689c085ae165831e93"),
            inputs: vec![
                Utxo {
                    txid: "aa".into(),
                    vout: 0,
                    value: 70_000,
                    address: "bc1q".into(),
                    derivation_path: vec![],
                },
                Utxo {
                    txid: "bb".into(),
                    vout: 1,
                    value: 30_000,
                    address: "bc1q".into(),
                    derivation_path: vec![],
                },
            ],
            outputs: vec![TxOutput {
                address: "bc1p".into(),
                value: 95_000,
                is_change: false,
            }],
            fee: 5_000,
        };
        assert_eq!(tx.input_total(), 100_000);
        assert_eq!(tx.output_total(), 95_000);
        assert_eq!(tx.input_total() - tx.output_total(), tx.fee);
    }

    #[test]
    fn evm_fees_flatten_into_transaction() {
        let tx = EvmTransaction {
            network_id: NetworkId::eip155(1),
            chain_id: 1,
            from: "0xfrom".into(),
            to: "0xto".into(),
            value: "0x0".into(),
            data: "0x".into(),
            nonce: 3,
            gas_limit: 615_000,
            fees: EvmFees::Eip1559 {
                max_fee_per_gas: 40_000_000_000,
                max_priority_fee_per_gas: 2_000_000_000,
            },
            derivation_path: vec![],
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("max_fee_per_gas").is_some());
        assert!(json.get("gas_price").is_none());
    }
}
