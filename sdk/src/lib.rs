//! The hardware-wallet capability interface.
//!
//! Everything the pipeline delegates — key derivation, signing, broadcast,
//! chain-state queries — sits behind [`WalletSdk`]. The trait describes the
//! capability; it does not reimplement it. [`RemoteSdk`] talks to a local
//! wallet-bridge REST endpoint; `keybridge-nullables` provides a scripted
//! double for tests.

pub mod error;
pub mod remote;
pub mod types;

pub use error::SdkError;
pub use remote::RemoteSdk;
pub use types::{
    BalanceEntry, CosmosSendTx, DerivedKey, EvmCallRequest, EvmFeeData, EvmFees, EvmTransaction,
    RippleSendTx, TxOutput, Utxo, UtxoTransaction,
};

use async_trait::async_trait;
use keybridge_types::NetworkId;

/// The external signing/broadcast capability backing every chain handler.
///
/// All methods are async: the real implementation crosses a process
/// boundary to a hardware device and (for chain queries) the network.
#[async_trait]
pub trait WalletSdk: Send + Sync {
    /// Every derived public key, tagged with the networks it is valid on.
    async fn derived_keys(&self) -> Result<Vec<DerivedKey>, SdkError>;

    /// Cached per-asset balances.
    async fn balances(&self) -> Result<Vec<BalanceEntry>, SdkError>;

    // ── UTXO chain queries ──────────────────────────────────────────────

    /// Unspent outputs owned by `key` on `network`.
    async fn utxos_for(&self, key: &DerivedKey, network: &NetworkId)
        -> Result<Vec<Utxo>, SdkError>;

    /// A fresh change address from the wallet's deterministic path.
    async fn change_address(&self, network: &NetworkId) -> Result<String, SdkError>;

    /// Current fee rate in satoshis per virtual byte.
    async fn fee_rate(&self, network: &NetworkId) -> Result<u64, SdkError>;

    // ── EVM chain queries ───────────────────────────────────────────────

    /// Next account nonce for `address`.
    async fn evm_nonce(&self, network: &NetworkId, address: &str) -> Result<u64, SdkError>;

    /// Raw gas estimate for a call. Handlers apply their own bounds policy
    /// on top of this value.
    async fn evm_estimate_gas(
        &self,
        network: &NetworkId,
        call: &EvmCallRequest,
    ) -> Result<u64, SdkError>;

    /// Current fee-market data.
    async fn evm_fee_data(&self, network: &NetworkId) -> Result<EvmFeeData, SdkError>;

    // ── Signing ─────────────────────────────────────────────────────────

    async fn sign_evm_transaction(
        &self,
        tx: &EvmTransaction,
    ) -> Result<serde_json::Value, SdkError>;

    /// Sign a personal message; returns the signature as 0x-hex.
    async fn sign_message(
        &self,
        network: &NetworkId,
        address: &str,
        message: &str,
    ) -> Result<String, SdkError>;

    /// Sign EIP-712 typed data; returns the signature as 0x-hex.
    async fn sign_typed_data(
        &self,
        network: &NetworkId,
        address: &str,
        typed_data: &serde_json::Value,
    ) -> Result<String, SdkError>;

    async fn sign_utxo_transaction(
        &self,
        tx: &UtxoTransaction,
    ) -> Result<serde_json::Value, SdkError>;

    async fn sign_cosmos_transaction(
        &self,
        tx: &CosmosSendTx,
    ) -> Result<serde_json::Value, SdkError>;

    async fn sign_ripple_transaction(
        &self,
        tx: &RippleSendTx,
    ) -> Result<serde_json::Value, SdkError>;

    // ── Broadcast ───────────────────────────────────────────────────────

    /// Submit a signed payload; returns the transaction id.
    async fn broadcast(
        &self,
        network: &NetworkId,
        signed: &serde_json::Value,
    ) -> Result<String, SdkError>;
}
