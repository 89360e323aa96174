//! Nullable wallet capability — scripted signing and chain queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use keybridge_sdk::{
    BalanceEntry, CosmosSendTx, DerivedKey, EvmCallRequest, EvmFeeData, EvmTransaction,
    RippleSendTx, SdkError, Utxo, UtxoTransaction, WalletSdk,
};
use keybridge_types::NetworkId;

/// A deterministic, programmable [`WalletSdk`] double.
///
/// Every answer is configured up front; every broadcast is recorded for
/// later inspection. Defaults are chosen so a freshly constructed double
/// behaves like a wallet with no keys and an empty chain.
pub struct NullSdk {
    keys: Mutex<Vec<DerivedKey>>,
    balances: Mutex<Vec<BalanceEntry>>,
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    change_address: Mutex<String>,
    fee_rate: Mutex<u64>,
    nonce: Mutex<u64>,
    gas_estimate: Mutex<u64>,
    fee_data: Mutex<EvmFeeData>,
    broadcast_failure: Mutex<Option<String>>,
    broadcasts: Mutex<Vec<(NetworkId, serde_json::Value)>>,
    next_txid: AtomicU64,
}

impl NullSdk {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
            utxos: Mutex::new(HashMap::new()),
            change_address: Mutex::new("null-change-address".to_string()),
            fee_rate: Mutex::new(2),
            nonce: Mutex::new(7),
            gas_estimate: Mutex::new(50_000),
            fee_data: Mutex::new(EvmFeeData {
                base_fee_per_gas: Some(30_000_000_000),
                max_priority_fee_per_gas: Some(1_500_000_000),
                gas_price: 40_000_000_000,
            }),
            broadcast_failure: Mutex::new(None),
            broadcasts: Mutex::new(Vec::new()),
            next_txid: AtomicU64::new(1),
        }
    }

    // ── Scripting ───────────────────────────────────────────────────────

    pub fn push_key(&self, key: DerivedKey) -> &Self {
        self.keys.lock().unwrap().push(key);
        self
    }

    pub fn push_balance(&self, balance: BalanceEntry) -> &Self {
        self.balances.lock().unwrap().push(balance);
        self
    }

    pub fn set_utxos(&self, pubkey: &str, utxos: Vec<Utxo>) -> &Self {
        self.utxos.lock().unwrap().insert(pubkey.to_string(), utxos);
        self
    }

    pub fn set_fee_rate(&self, rate: u64) -> &Self {
        *self.fee_rate.lock().unwrap() = rate;
        self
    }

    pub fn set_nonce(&self, nonce: u64) -> &Self {
        *self.nonce.lock().unwrap() = nonce;
        self
    }

    pub fn set_gas_estimate(&self, estimate: u64) -> &Self {
        *self.gas_estimate.lock().unwrap() = estimate;
        self
    }

    pub fn set_fee_data(&self, fee_data: EvmFeeData) -> &Self {
        *self.fee_data.lock().unwrap() = fee_data;
        self
    }

    /// Make every subsequent broadcast fail with the given message.
    pub fn fail_broadcasts(&self, message: &str) -> &Self {
        *self.broadcast_failure.lock().unwrap() = Some(message.to_string());
        self
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Every payload broadcast so far.
    pub fn recorded_broadcasts(&self) -> Vec<(NetworkId, serde_json::Value)> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl Default for NullSdk {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletSdk for NullSdk {
    async fn derived_keys(&self) -> Result<Vec<DerivedKey>, SdkError> {
        Ok(self.keys.lock().unwrap().clone())
    }

    async fn balances(&self) -> Result<Vec<BalanceEntry>, SdkError> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn utxos_for(
        &self,
        key: &DerivedKey,
        _network: &NetworkId,
    ) -> Result<Vec<Utxo>, SdkError> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(&key.pubkey)
            .cloned()
            .unwrap_or_default())
    }

    async fn change_address(&self, _network: &NetworkId) -> Result<String, SdkError> {
        Ok(self.change_address.lock().unwrap().clone())
    }

    async fn fee_rate(&self, _network: &NetworkId) -> Result<u64, SdkError> {
        Ok(*self.fee_rate.lock().unwrap())
    }

    async fn evm_nonce(&self, _network: &NetworkId, _address: &str) -> Result<u64, SdkError> {
        Ok(*self.nonce.lock().unwrap())
    }

    async fn evm_estimate_gas(
        &self,
        _network: &NetworkId,
        _call: &EvmCallRequest,
    ) -> Result<u64, SdkError> {
        Ok(*self.gas_estimate.lock().unwrap())
    }

    async fn evm_fee_data(&self, _network: &NetworkId) -> Result<EvmFeeData, SdkError> {
        Ok(self.fee_data.lock().unwrap().clone())
    }

    async fn sign_evm_transaction(
        &self,
        tx: &EvmTransaction,
    ) -> Result<serde_json::Value, SdkError> {
        Ok(serde_json::json!({
            "raw": format!("0xsigned-evm-{}", tx.nonce),
            "tx": tx,
        }))
    }

    async fn sign_message(
        &self,
        _network: &NetworkId,
        address: &str,
        message: &str,
    ) -> Result<String, SdkError> {
        Ok(format!("0xsig:{address}:{message}"))
    }

    async fn sign_typed_data(
        &self,
        _network: &NetworkId,
        address: &str,
        _typed_data: &serde_json::Value,
    ) -> Result<String, SdkError> {
        Ok(format!("0xtyped:{address}"))
    }

    async fn sign_utxo_transaction(
        &self,
        tx: &UtxoTransaction,
    ) -> Result<serde_json::Value, SdkError> {
        Ok(serde_json::json!({
            "raw": format!("signed-utxo-fee-{}", tx.fee),
            "tx": tx,
        }))
    }

    async fn sign_cosmos_transaction(
        &self,
        tx: &CosmosSendTx,
    ) -> Result<serde_json::Value, SdkError> {
        Ok(serde_json::json!({
            "raw": format!("signed-cosmos-{}", tx.amount),
            "tx": tx,
        }))
    }

    async fn sign_ripple_transaction(
        &self,
        tx: &RippleSendTx,
    ) -> Result<serde_json::Value, SdkError> {
        Ok(serde_json::json!({
            "raw": format!("signed-ripple-{}", tx.amount),
            "tx": tx,
        }))
    }

    async fn broadcast(
        &self,
        network: &NetworkId,
        signed: &serde_json::Value,
    ) -> Result<String, SdkError> {
        if let Some(message) = self.broadcast_failure.lock().unwrap().clone() {
            return Err(SdkError::Broadcast(message));
        }
        self.broadcasts
            .lock()
            .unwrap()
            .push((network.clone(), signed.clone()));
        let n = self.next_txid.fetch_add(1, Ordering::Relaxed);
        Ok(format!("txid-{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_are_recorded_with_fresh_txids() {
        let sdk = NullSdk::new();
        let network = NetworkId::eip155(1);
        let a = sdk
            .broadcast(&network, &serde_json::json!({"raw": "a"}))
            .await
            .unwrap();
        let b = sdk
            .broadcast(&network, &serde_json::json!({"raw": "b"}))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(sdk.recorded_broadcasts().len(), 2);
    }

    #[tokio::test]
    async fn scripted_broadcast_failure() {
        let sdk = NullSdk::new();
        sdk.fail_broadcasts("node unreachable");
        let err = sdk
            .broadcast(&NetworkId::eip155(1), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Broadcast(_)));
        assert!(sdk.recorded_broadcasts().is_empty());
    }
}
