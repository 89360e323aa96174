//! The UTXO chain handler (Bitcoin and its forks).
//!
//! Transfers fetch the unspent outputs of every owned key valid on the
//! network, derive a fresh change address, and run coin selection against
//! the target amount and fee rate. When standard selection cannot cover
//! the amount, a "maximum send" fallback spends all available inputs; if
//! that also fails the caller receives a distinguishable insufficiency
//! error.
//!
//! Numeric policy: all amounts are integer satoshi-equivalent units and
//! `fee == sum(inputs) − sum(outputs) ≥ 0` in every produced selection.
//! A change output strictly below the chain's dust threshold is dropped
//! and its value folded into the fee.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use keybridge_messages::RequestInfo;
use keybridge_sdk::{TxOutput, Utxo, UtxoTransaction};
use keybridge_types::{ChainFamily, NetworkId, ProviderError, RequestRecord};

use crate::chains::{
    complete_record, param_object, parse_u64_value, require_str, require_user_approval, sdk_err,
};
use crate::handler::{ChainHandler, HandlerContext};
use crate::wallet_state::AssetContext;

// Virtual-size weights for fee estimation (P2WPKH-shaped).
const TX_OVERHEAD_VBYTES: u64 = 11;
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;

/// Coin selection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no spendable inputs")]
    NoSpendableInputs,

    #[error("insufficient funds: {available} available, {required} required")]
    InsufficientFunds { available: u64, required: u64 },
}

/// A completed coin selection. `fee == sum(inputs) − sum(outputs)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
}

fn estimated_fee(fee_rate: u64, inputs: u64, outputs: u64) -> u64 {
    fee_rate * (TX_OVERHEAD_VBYTES + inputs * INPUT_VBYTES + outputs * OUTPUT_VBYTES)
}

/// Standard largest-first accumulative selection with a change output.
///
/// Change strictly below `dust_threshold` is not emitted: the selection is
/// recomputed without a change output and the residue folds into the fee.
pub fn select_coins(
    utxos: &[Utxo],
    amount: u64,
    fee_rate: u64,
    to: &str,
    change_address: &str,
    dust_threshold: u64,
) -> Result<Selection, SelectionError> {
    if utxos.is_empty() {
        return Err(SelectionError::NoSpendableInputs);
    }

    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut inputs: Vec<Utxo> = Vec::new();
    let mut total: u64 = 0;

    for utxo in sorted {
        total = total.saturating_add(utxo.value);
        inputs.push(utxo);
        let n = inputs.len() as u64;

        let fee_with_change = estimated_fee(fee_rate, n, 2);
        if total >= amount.saturating_add(fee_with_change) {
            let change = total - amount - fee_with_change;
            if change < dust_threshold {
                // Sub-dust change: drop the output, absorb the residue.
                return Ok(Selection {
                    inputs,
                    outputs: vec![TxOutput {
                        address: to.to_string(),
                        value: amount,
                        is_change: false,
                    }],
                    fee: total - amount,
                });
            }
            return Ok(Selection {
                inputs,
                outputs: vec![
                    TxOutput {
                        address: to.to_string(),
                        value: amount,
                        is_change: false,
                    },
                    TxOutput {
                        address: change_address.to_string(),
                        value: change,
                        is_change: true,
                    },
                ],
                fee: fee_with_change,
            });
        }
    }

    // Every input consumed and the two-output shape never fit. A final
    // change-less attempt: the residue here is provably below
    // dust + one output's fee weight, so folding it into the fee is bounded.
    let n = inputs.len() as u64;
    let fee_no_change = estimated_fee(fee_rate, n, 1);
    if total >= amount.saturating_add(fee_no_change) {
        return Ok(Selection {
            inputs,
            outputs: vec![TxOutput {
                address: to.to_string(),
                value: amount,
                is_change: false,
            }],
            fee: total - amount,
        });
    }

    Err(SelectionError::InsufficientFunds {
        available: total,
        required: amount.saturating_add(fee_no_change),
    })
}

/// Fallback strategy: spend every input and send the maximum the fee
/// allows. Fails when even that cannot cover the requested amount.
pub fn select_max_send(
    utxos: &[Utxo],
    amount: u64,
    fee_rate: u64,
    to: &str,
) -> Result<Selection, SelectionError> {
    if utxos.is_empty() {
        return Err(SelectionError::NoSpendableInputs);
    }
    let inputs = utxos.to_vec();
    let total: u64 = inputs.iter().map(|u| u.value).sum();
    let fee = estimated_fee(fee_rate, inputs.len() as u64, 1);
    let send_value = total
        .checked_sub(fee)
        .ok_or(SelectionError::InsufficientFunds {
            available: total,
            required: fee,
        })?;
    if send_value < amount {
        return Err(SelectionError::InsufficientFunds {
            available: send_value,
            required: amount,
        });
    }
    Ok(Selection {
        inputs,
        outputs: vec![TxOutput {
            address: to.to_string(),
            value: send_value,
            is_change: false,
        }],
        fee,
    })
}

pub struct UtxoHandler {
    chain: ChainFamily,
    network_id: NetworkId,
    asset: String,
    dust_threshold: u64,
}

impl UtxoHandler {
    pub fn new(chain: ChainFamily, network_id: NetworkId, dust_threshold: u64) -> Self {
        let asset = format!("{}/slip44:0", network_id.as_str());
        Self {
            chain,
            network_id,
            asset,
            dust_threshold,
        }
    }

    pub fn bitcoin() -> Self {
        Self::new(
            ChainFamily::Bitcoin,
            NetworkId::bip122("000000000019d6689c085ae165831e93"),
            546,
        )
    }

    pub fn litecoin() -> Self {
        Self::new(
            ChainFamily::Litecoin,
            NetworkId::bip122("12a765e31ffd4059bada1e25190f6e98"),
            5_460,
        )
    }

    pub fn dogecoin() -> Self {
        Self::new(
            ChainFamily::Dogecoin,
            NetworkId::bip122("1a91e3dace36e2be3bf030a65679fe82"),
            1_000_000,
        )
    }

    pub fn bitcoin_cash() -> Self {
        Self::new(
            ChainFamily::BitcoinCash,
            NetworkId::bip122("000000000000000000651ef99cb9fcbe"),
            546,
        )
    }

    pub fn dust_threshold(&self) -> u64 {
        self.dust_threshold
    }

    fn ensure_context(&self, ctx: &HandlerContext) {
        ctx.wallet.ensure_context(AssetContext {
            chain: self.chain,
            network_id: self.network_id.clone(),
            asset: self.asset.clone(),
        });
    }

    /// Gather the unspent outputs of every owned key valid on this network.
    async fn gather_utxos(&self, ctx: &HandlerContext) -> Result<Vec<Utxo>, ProviderError> {
        let keys = ctx.wallet.keys_for(&self.network_id);
        if keys.is_empty() {
            return Err(ProviderError::misconfigured(format!(
                "no derived key for {}",
                self.network_id
            )));
        }
        let mut utxos = Vec::new();
        for key in &keys {
            let mut owned = ctx
                .sdk
                .utxos_for(key, &self.network_id)
                .await
                .map_err(sdk_err)?;
            utxos.append(&mut owned);
        }
        Ok(utxos)
    }
}

#[async_trait]
impl ChainHandler for UtxoHandler {
    fn chain(&self) -> ChainFamily {
        self.chain
    }

    fn network_id(&self) -> NetworkId {
        self.network_id.clone()
    }

    async fn request_accounts(
        &self,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value, ProviderError> {
        // UTXO convention: the first receive address is the active account.
        let first = ctx
            .wallet
            .keys_for(&self.network_id)
            .into_iter()
            .next()
            .map(|k| k.address);
        match first {
            Some(address) => Ok(json!([address])),
            None => Ok(json!([])),
        }
    }

    async fn request_balance(
        &self,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value, ProviderError> {
        let entry = ctx.wallet.balance_for(&self.asset).ok_or_else(|| {
            ProviderError::upstream(format!("no cached balance for {}", self.asset))
        })?;
        serde_json::to_value(entry).map_err(ProviderError::wrap_internal)
    }

    async fn transfer(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        self.ensure_context(ctx);

        let obj = param_object(info)?;
        let to = require_str(obj, "to")?.to_string();
        let amount = obj
            .get("amount")
            .and_then(parse_u64_value)
            .ok_or_else(|| {
                ProviderError::invalid_request("transfer requires an integer satoshi amount")
            })?;

        let utxos = self.gather_utxos(ctx).await?;
        let change_address = ctx
            .sdk
            .change_address(&self.network_id)
            .await
            .map_err(sdk_err)?;
        let fee_rate = match obj.get("feeRate").and_then(parse_u64_value) {
            Some(rate) => rate,
            None => ctx.sdk.fee_rate(&self.network_id).await.map_err(sdk_err)?,
        };

        let selection = select_coins(
            &utxos,
            amount,
            fee_rate,
            &to,
            &change_address,
            self.dust_threshold,
        )
        .or_else(|primary| {
            warn!(chain = %self.chain, %primary, "standard selection failed, trying max-send");
            select_max_send(&utxos, amount, fee_rate, &to)
        })
        .map_err(|e| {
            warn!(chain = %self.chain, "transfer could not be funded: {e}");
            ProviderError::upstream(format!("could not fund transfer on {}", self.chain))
                .with_data(json!({ "selection": e.to_string() }))
        })?;

        let tx = UtxoTransaction {
            network_id: self.network_id.clone(),
            inputs: selection.inputs,
            outputs: selection.outputs,
            fee: selection.fee,
        };
        debug_assert_eq!(tx.input_total() - tx.output_total(), tx.fee);

        let mut record = RequestRecord::new(
            self.network_id.clone(),
            self.chain,
            &info.method,
            json!(info.params),
            info.metadata(),
        );
        record
            .set_unsigned_tx(serde_json::to_value(&tx).map_err(ProviderError::wrap_internal)?)
            .map_err(ProviderError::wrap_internal)?;

        let record = require_user_approval(ctx, record).await?;

        let tx: UtxoTransaction = record
            .unsigned_tx
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(tx);

        let signed = ctx.sdk.sign_utxo_transaction(&tx).await.map_err(sdk_err)?;
        let txid = ctx
            .sdk
            .broadcast(&self.network_id, &signed)
            .await
            .map_err(sdk_err)?;
        ctx.metrics.broadcasts.inc();
        info!(txid = %txid, fee = tx.fee, "broadcast UTXO transaction");

        complete_record(ctx, record, signed, Some(&txid))?;
        Ok(json!(txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utxo(value: u64) -> Utxo {
        Utxo {
            txid: format!("tx-{value}"),
            vout: 0,
            value,
            address: "bc1qowner".into(),
            derivation_path: vec![0, 0],
        }
    }

    fn conservation(sel: &Selection) -> (u64, u64) {
        let inputs: u64 = sel.inputs.iter().map(|u| u.value).sum();
        let outputs: u64 = sel.outputs.iter().map(|o| o.value).sum();
        (inputs, outputs)
    }

    #[test]
    fn simple_selection_with_change() {
        let utxos = vec![utxo(100_000), utxo(50_000)];
        let sel = select_coins(&utxos, 40_000, 2, "bc1qdest", "bc1qchange", 546).unwrap();

        let (inputs, outputs) = conservation(&sel);
        assert_eq!(inputs - outputs, sel.fee);
        assert_eq!(sel.outputs.len(), 2);
        assert_eq!(sel.outputs[0].value, 40_000);
        assert!(sel.outputs[1].is_change);
        assert!(sel.outputs[1].value >= 546);
    }

    #[test]
    fn sub_dust_change_folds_into_fee() {
        // One 50_000 input; amount chosen so the change would be below dust.
        let fee_two = 2 * (TX_OVERHEAD_VBYTES + INPUT_VBYTES + 2 * OUTPUT_VBYTES);
        let amount = 50_000 - fee_two - 100; // change would be 100 < 546
        let utxos = vec![utxo(50_000)];
        let sel = select_coins(&utxos, amount, 2, "bc1qdest", "bc1qchange", 546).unwrap();

        assert_eq!(sel.outputs.len(), 1, "no change output emitted");
        let (inputs, outputs) = conservation(&sel);
        assert_eq!(inputs - outputs, sel.fee);
        assert_eq!(sel.fee, 50_000 - amount);
    }

    #[test]
    fn insufficient_funds_is_distinguishable() {
        let utxos = vec![utxo(10_000)];
        let err = select_coins(&utxos, 50_000, 2, "bc1qdest", "bc1qchange", 546).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientFunds { .. }));

        let err = select_coins(&[], 50_000, 2, "bc1qdest", "bc1qchange", 546).unwrap_err();
        assert_eq!(err, SelectionError::NoSpendableInputs);
    }

    #[test]
    fn max_send_spends_everything() {
        let utxos = vec![utxo(30_000), utxo(20_000)];
        let sel = select_max_send(&utxos, 40_000, 2, "bc1qdest").unwrap();
        assert_eq!(sel.inputs.len(), 2);
        assert_eq!(sel.outputs.len(), 1);
        let (inputs, outputs) = conservation(&sel);
        assert_eq!(inputs - outputs, sel.fee);
        assert!(sel.outputs[0].value >= 40_000);
    }

    #[test]
    fn max_send_fails_when_amount_uncoverable() {
        let utxos = vec![utxo(10_000)];
        let err = select_max_send(&utxos, 50_000, 2, "bc1qdest").unwrap_err();
        match err {
            SelectionError::InsufficientFunds {
                available,
                required,
            } => {
                assert!(available < required);
                assert_eq!(required, 50_000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dust_thresholds_per_chain() {
        assert_eq!(UtxoHandler::bitcoin().dust_threshold(), 546);
        assert_eq!(UtxoHandler::litecoin().dust_threshold(), 5_460);
        assert_eq!(UtxoHandler::dogecoin().dust_threshold(), 1_000_000);
    }

    proptest! {
        /// Fee conservation holds for every successful selection, and any
        /// emitted change output is at or above the dust threshold.
        #[test]
        fn fee_conservation_holds(
            values in prop::collection::vec(600u64..500_000, 1..12),
            amount in 1u64..400_000,
            fee_rate in 1u64..50,
        ) {
            let utxos: Vec<Utxo> = values.into_iter().map(utxo).collect();
            if let Ok(sel) = select_coins(&utxos, amount, fee_rate, "dest", "change", 546) {
                let inputs: u64 = sel.inputs.iter().map(|u| u.value).sum();
                let outputs: u64 = sel.outputs.iter().map(|o| o.value).sum();
                prop_assert!(inputs >= outputs);
                prop_assert_eq!(inputs - outputs, sel.fee);
                for out in sel.outputs.iter().filter(|o| o.is_change) {
                    prop_assert!(out.value >= 546);
                }
            }
            if let Ok(sel) = select_max_send(&utxos, amount, fee_rate, "dest") {
                let inputs: u64 = sel.inputs.iter().map(|u| u.value).sum();
                let outputs: u64 = sel.outputs.iter().map(|o| o.value).sum();
                prop_assert_eq!(inputs - outputs, sel.fee);
            }
        }
    }
}
