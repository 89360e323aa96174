//! The Ripple chain handler.
//!
//! Account-model sends in drops (1 XRP = 1,000,000 drops) with an
//! optional destination tag instead of a memo.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use keybridge_messages::RequestInfo;
use keybridge_sdk::RippleSendTx;
use keybridge_types::{ChainFamily, NetworkId, ProviderError, RequestRecord};

use crate::chains::{
    complete_record, param_object, parse_decimal_to_base, parse_u64_value, require_str,
    require_user_approval, sdk_err,
};
use crate::handler::{ChainHandler, HandlerContext};
use crate::wallet_state::AssetContext;

const DROPS_DECIMALS: u32 = 6;

pub struct RippleHandler {
    network_id: NetworkId,
    asset: String,
}

impl RippleHandler {
    pub fn mainnet() -> Self {
        let network_id = NetworkId::ripple_mainnet();
        let asset = format!("{}/slip44:144", network_id.as_str());
        Self { network_id, asset }
    }

    fn ensure_context(&self, ctx: &HandlerContext) {
        ctx.wallet.ensure_context(AssetContext {
            chain: ChainFamily::Ripple,
            network_id: self.network_id.clone(),
            asset: self.asset.clone(),
        });
    }
}

#[async_trait]
impl ChainHandler for RippleHandler {
    fn chain(&self) -> ChainFamily {
        ChainFamily::Ripple
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
            .and_then(|v| parse_decimal_to_base(v, DROPS_DECIMALS))
            .ok_or_else(|| {
                ProviderError::invalid_request("transfer requires an XRP amount")
            })?;
        let destination_tag = obj
            .get("destinationTag")
            .and_then(parse_u64_value)
            .map(|t| t as u32);

        let key = ctx
            .wallet
            .keys_for(&self.network_id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::misconfigured(format!("no derived key for {}", self.network_id))
            })?;

        let tx = RippleSendTx {
            network_id: self.network_id.clone(),
            from: key.address.clone(),
            to,
            amount,
            destination_tag,
            derivation_path: key.derivation_path.clone(),
        };

        let mut record = RequestRecord::new(
            self.network_id.clone(),
            ChainFamily::Ripple,
            &info.method,
            json!(info.params),
            info.metadata(),
        );
        record
            .set_unsigned_tx(serde_json::to_value(&tx).map_err(ProviderError::wrap_internal)?)
            .map_err(ProviderError::wrap_internal)?;

        let record = require_user_approval(ctx, record).await?;

        let tx: RippleSendTx = record
            .unsigned_tx
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(tx);

        let signed = ctx
            .sdk
            .sign_ripple_transaction(&tx)
            .await
            .map_err(sdk_err)?;
        let txid = ctx
            .sdk
            .broadcast(&self.network_id, &signed)
            .await
            .map_err(sdk_err)?;
        ctx.metrics.broadcasts.inc();
        info!(txid = %txid, drops = tx.amount, "broadcast Ripple transaction");

        complete_record(ctx, record, signed, Some(&txid))?;
        Ok(json!(txid))
    }
}
