//! HTTP client for a local wallet-bridge daemon.
//!
//! The hardware-wallet vendor ships a desktop bridge that exposes the
//! device over a localhost REST endpoint. [`RemoteSdk`] wraps
//! `reqwest::Client` with the bridge's base URL and provides typed methods
//! for each action the pipeline needs.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use keybridge_types::NetworkId;

use crate::error::SdkError;
use crate::types::{
    BalanceEntry, CosmosSendTx, DerivedKey, EvmCallRequest, EvmFeeData, EvmTransaction,
    RippleSendTx, Utxo, UtxoTransaction,
};
use crate::WalletSdk;

/// Device actions can block on user confirmation at the hardware screen,
/// so the request timeout is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the wallet bridge.
#[derive(Clone)]
pub struct RemoteSdk {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteSdk {
    /// Create a client targeting the given base URL
    /// (e.g. `http://127.0.0.1:1646`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, SdkError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SdkError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST an action to the bridge and return the `result` field.
    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> Result<T, SdkError> {
        let url = format!("{}/api/{}", self.base_url, action);
        debug!(action, "wallet bridge call");

        let response = self
            .http
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| SdkError::Transport(format!("{action}: request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SdkError::Transport(format!(
                "{action}: bridge returned HTTP {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SdkError::Malformed(format!("{action}: invalid JSON: {e}")))?;

        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(SdkError::Signing(format!("{action}: {err}")));
        }

        let result = json.get("result").cloned().unwrap_or(json);
        serde_json::from_value(result)
            .map_err(|e| SdkError::Malformed(format!("{action}: unexpected shape: {e}")))
    }
}

#[async_trait]
impl WalletSdk for RemoteSdk {
    async fn derived_keys(&self) -> Result<Vec<DerivedKey>, SdkError> {
        self.call("pubkeys", serde_json::json!({})).await
    }

    async fn balances(&self) -> Result<Vec<BalanceEntry>, SdkError> {
        self.call("balances", serde_json::json!({})).await
    }

    async fn utxos_for(
        &self,
        key: &DerivedKey,
        network: &NetworkId,
    ) -> Result<Vec<Utxo>, SdkError> {
        self.call(
            "utxos",
            serde_json::json!({ "pubkey": key.pubkey, "network": network }),
        )
        .await
    }

    async fn change_address(&self, network: &NetworkId) -> Result<String, SdkError> {
        self.call("change-address", serde_json::json!({ "network": network }))
            .await
    }

    async fn fee_rate(&self, network: &NetworkId) -> Result<u64, SdkError> {
        self.call("fee-rate", serde_json::json!({ "network": network }))
            .await
            .map_err(|e| match e {
                SdkError::Signing(msg) => SdkError::Node(msg),
                other => other,
            })
    }

    async fn evm_nonce(&self, network: &NetworkId, address: &str) -> Result<u64, SdkError> {
        self.call(
            "evm/nonce",
            serde_json::json!({ "network": network, "address": address }),
        )
        .await
        .map_err(|e| match e {
            SdkError::Signing(msg) => SdkError::Node(msg),
            other => other,
        })
    }

    async fn evm_estimate_gas(
        &self,
        network: &NetworkId,
        call: &EvmCallRequest,
    ) -> Result<u64, SdkError> {
        self.call(
            "evm/estimate-gas",
            serde_json::json!({ "network": network, "call": call }),
        )
        .await
        .map_err(|e| match e {
            SdkError::Signing(msg) => SdkError::Node(msg),
            other => other,
        })
    }

    async fn evm_fee_data(&self, network: &NetworkId) -> Result<EvmFeeData, SdkError> {
        self.call("evm/fee-data", serde_json::json!({ "network": network }))
            .await
            .map_err(|e| match e {
                SdkError::Signing(msg) => SdkError::Node(msg),
                other => other,
            })
    }

    async fn sign_evm_transaction(
        &self,
        tx: &EvmTransaction,
    ) -> Result<serde_json::Value, SdkError> {
        self.call("sign/evm", serde_json::to_value(tx).map_err(|e| {
            SdkError::Malformed(format!("sign/evm: failed to encode tx: {e}"))
        })?)
        .await
    }

    async fn sign_message(
        &self,
        network: &NetworkId,
        address: &str,
        message: &str,
    ) -> Result<String, SdkError> {
        self.call(
            "sign/message",
            serde_json::json!({
                "network": network,
                "address": address,
                "message": message,
            }),
        )
        .await
    }

    async fn sign_typed_data(
        &self,
        network: &NetworkId,
        address: &str,
        typed_data: &serde_json::Value,
    ) -> Result<String, SdkError> {
        self.call(
            "sign/typed-data",
            serde_json::json!({
                "network": network,
                "address": address,
                "typed_data": typed_data,
            }),
        )
        .await
    }

    async fn sign_utxo_transaction(
        &self,
        tx: &UtxoTransaction,
    ) -> Result<serde_json::Value, SdkError> {
        self.call("sign/utxo", serde_json::to_value(tx).map_err(|e| {
            SdkError::Malformed(format!("sign/utxo: failed to encode tx: {e}"))
        })?)
        .await
    }

    async fn sign_cosmos_transaction(
        &self,
        tx: &CosmosSendTx,
    ) -> Result<serde_json::Value, SdkError> {
        self.call("sign/cosmos", serde_json::to_value(tx).map_err(|e| {
            SdkError::Malformed(format!("sign/cosmos: failed to encode tx: {e}"))
        })?)
        .await
    }

    async fn sign_ripple_transaction(
        &self,
        tx: &RippleSendTx,
    ) -> Result<serde_json::Value, SdkError> {
        self.call("sign/ripple", serde_json::to_value(tx).map_err(|e| {
            SdkError::Malformed(format!("sign/ripple: failed to encode tx: {e}"))
        })?)
        .await
    }

    async fn broadcast(
        &self,
        network: &NetworkId,
        signed: &serde_json::Value,
    ) -> Result<String, SdkError> {
        self.call(
            "broadcast",
            serde_json::json!({ "network": network, "signed": signed }),
        )
        .await
        .map_err(|e| match e {
            SdkError::Signing(msg) => SdkError::Broadcast(msg),
            other => other,
        })
    }
}
