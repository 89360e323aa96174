//! The Cosmos-family chain handler.
//!
//! Account-model chains: no coin selection. A transfer resolves the
//! display amount into the chain's smallest native unit and assembles a
//! structured send payload (from, amount, memo, recipient).

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use keybridge_messages::RequestInfo;
use keybridge_sdk::CosmosSendTx;
use keybridge_types::{ChainFamily, NetworkId, ProviderError, RequestRecord};

use crate::chains::{
    complete_record, param_object, parse_decimal_to_base, require_str, require_user_approval,
    sdk_err,
};
use crate::handler::{ChainHandler, HandlerContext};
use crate::wallet_state::AssetContext;

pub struct CosmosHandler {
    chain: ChainFamily,
    network_id: NetworkId,
    asset: String,
    denom: String,
    decimals: u32,
}

impl CosmosHandler {
    pub fn new(
        chain: ChainFamily,
        network_id: NetworkId,
        denom: impl Into<String>,
        decimals: u32,
        slip44: u32,
    ) -> Self {
        let asset = format!("{}/slip44:{}", network_id.as_str(), slip44);
        Self {
            chain,
            network_id,
            asset,
            denom: denom.into(),
            decimals,
        }
    }

    pub fn cosmos_hub() -> Self {
        Self::new(
            ChainFamily::Cosmos,
            NetworkId::cosmos("cosmoshub-4"),
            "uatom",
            6,
            118,
        )
    }

    pub fn osmosis() -> Self {
        Self::new(
            ChainFamily::Osmosis,
            NetworkId::cosmos("osmosis-1"),
            "uosmo",
            6,
            118,
        )
    }

    pub fn thorchain() -> Self {
        Self::new(
            ChainFamily::Thorchain,
            NetworkId::cosmos("thorchain-mainnet-v1"),
            "rune",
            8,
            931,
        )
    }

    fn ensure_context(&self, ctx: &HandlerContext) {
        ctx.wallet.ensure_context(AssetContext {
            chain: self.chain,
            network_id: self.network_id.clone(),
            asset: self.asset.clone(),
        });
    }
}

#[async_trait]
impl ChainHandler for CosmosHandler {
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
            .and_then(|v| parse_decimal_to_base(v, self.decimals))
            .ok_or_else(|| {
                ProviderError::invalid_request(format!(
                    "transfer requires an amount with at most {} decimals",
                    self.decimals
                ))
            })?;
        let memo = obj
            .get("memo")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let key = ctx
            .wallet
            .keys_for(&self.network_id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::misconfigured(format!("no derived key for {}", self.network_id))
            })?;

        let tx = CosmosSendTx {
            network_id: self.network_id.clone(),
            from: key.address.clone(),
            to,
            amount,
            denom: self.denom.clone(),
            memo,
            derivation_path: key.derivation_path.clone(),
        };

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

        let tx: CosmosSendTx = record
            .unsigned_tx
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(tx);

        let signed = ctx
            .sdk
            .sign_cosmos_transaction(&tx)
            .await
            .map_err(sdk_err)?;
        let txid = ctx
            .sdk
            .broadcast(&self.network_id, &signed)
            .await
            .map_err(sdk_err)?;
        ctx.metrics.broadcasts.inc();
        info!(txid = %txid, denom = %tx.denom, "broadcast Cosmos transaction");

        complete_record(ctx, record, signed, Some(&txid))?;
        Ok(json!(txid))
    }
}
