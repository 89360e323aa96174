//! The shared wallet state.
//!
//! A singleton per background-service lifetime holding the derived keys,
//! cached balances, and the active asset context. Handlers read from it
//! and switch the context before building transactions. All access goes
//! through one mutex so concurrent context switches are serialized and
//! auditable.

use std::sync::Mutex;

use tracing::debug;

use keybridge_sdk::{BalanceEntry, DerivedKey, WalletSdk};
use keybridge_types::{ChainFamily, NetworkId};

use crate::BackgroundError;

/// The active chain/asset used for contextual operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetContext {
    pub chain: ChainFamily,
    pub network_id: NetworkId,
    /// Canonical asset identifier, CAIP-19 style.
    pub asset: String,
}

#[derive(Default)]
struct Inner {
    keys: Vec<DerivedKey>,
    balances: Vec<BalanceEntry>,
    context: Option<AssetContext>,
}

/// Serialized accessor over the externally-derived wallet data.
pub struct WalletState {
    inner: Mutex<Inner>,
}

impl WalletState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Re-fetch keys and balances from the wallet capability.
    pub async fn refresh(&self, sdk: &dyn WalletSdk) -> Result<(), BackgroundError> {
        let keys = sdk.derived_keys().await?;
        let balances = sdk.balances().await?;
        let mut inner = self.inner.lock().unwrap();
        inner.keys = keys;
        inner.balances = balances;
        Ok(())
    }

    /// Keys valid on the given network.
    pub fn keys_for(&self, network: &NetworkId) -> Vec<DerivedKey> {
        self.inner
            .lock()
            .unwrap()
            .keys
            .iter()
            .filter(|k| k.valid_on(network))
            .cloned()
            .collect()
    }

    /// The cached balance entry for a canonical asset id.
    pub fn balance_for(&self, asset: &str) -> Option<BalanceEntry> {
        self.inner
            .lock()
            .unwrap()
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .cloned()
    }

    /// The current active asset context.
    pub fn context(&self) -> Option<AssetContext> {
        self.inner.lock().unwrap().context.clone()
    }

    /// Switch the active context if it differs. Returns whether a switch
    /// happened — the compare-and-set is atomic under the state mutex, so
    /// two handlers racing here cannot interleave half-switched state.
    pub fn ensure_context(&self, context: AssetContext) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.context.as_ref() == Some(&context) {
            return false;
        }
        debug!(chain = %context.chain, asset = %context.asset, "switching active asset context");
        inner.context = Some(context);
        true
    }
}

impl Default for WalletState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(address: &str, networks: Vec<NetworkId>) -> DerivedKey {
        DerivedKey {
            pubkey: format!("pk-{address}"),
            address: address.to_string(),
            derivation_path: vec![0, 0],
            networks,
        }
    }

    fn eth_context() -> AssetContext {
        AssetContext {
            chain: ChainFamily::Ethereum,
            network_id: NetworkId::eip155(1),
            asset: "eip155:1/slip44:60".into(),
        }
    }

    #[test]
    fn keys_are_filtered_by_network() {
        let state = WalletState::new();
        {
            let mut inner = state.inner.lock().unwrap();
            inner.keys = vec![
                key("0xeth", vec![NetworkId::eip155(1)]),
                key("bc1q", vec![NetworkId::bip122("000000000019d6689c085ae165831e93")]),
            ];
        }
        let eth = state.keys_for(&NetworkId::eip155(1));
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].address, "0xeth");
        assert!(state.keys_for(&NetworkId::eip155(137)).is_empty());
    }

    #[test]
    fn ensure_context_is_idempotent() {
        let state = WalletState::new();
        assert!(state.ensure_context(eth_context()));
        assert!(!state.ensure_context(eth_context()));
        assert_eq!(state.context(), Some(eth_context()));
    }
}
