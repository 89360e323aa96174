//! The EVM chain handler.
//!
//! Builds canonical EVM transactions: nonce resolution (explicit or
//! fetched), gas estimation under a bounds policy, and fee-field
//! resolution (EIP-1559 pair, explicit legacy price, or fetched
//! fee-market data).

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use keybridge_messages::RequestInfo;
use keybridge_sdk::{DerivedKey, EvmCallRequest, EvmFees, EvmTransaction};
use keybridge_types::{ChainFamily, NetworkId, ProviderError, RequestRecord};

use crate::chains::{
    complete_record, param_object, parse_u128_value, parse_u64_value, require_str,
    require_user_approval, sdk_err,
};
use crate::handler::{dispatch_common, ChainHandler, HandlerContext};
use crate::wallet_state::AssetContext;

/// Estimated gas never goes below this, whatever the node reports.
pub const GAS_LIMIT_FLOOR: u64 = 615_000;
/// Estimates above this get a proportional safety margin.
pub const GAS_MARGIN_THRESHOLD: u64 = 1_000_000;
/// Hard ceiling bounding user cost exposure and chain-imposed limits.
pub const GAS_LIMIT_CEILING: u64 = 10_000_000;
/// Priority fee used when the fee market reports none: 1.5 gwei.
const DEFAULT_PRIORITY_FEE: u128 = 1_500_000_000;
/// m/44'/60'/0'/0/0 — the signing key's fixed derivation path.
pub const DEFAULT_DERIVATION_PATH: [u32; 5] =
    [0x8000_002c, 0x8000_003c, 0x8000_0000, 0, 0];

/// Apply the gas bounds policy to a raw node estimate.
pub fn bounded_gas_limit(raw_estimate: u64) -> u64 {
    let padded = if raw_estimate > GAS_MARGIN_THRESHOLD {
        raw_estimate.saturating_mul(12) / 10
    } else {
        raw_estimate
    };
    padded.clamp(GAS_LIMIT_FLOOR, GAS_LIMIT_CEILING)
}

pub struct EthereumHandler {
    network_id: NetworkId,
    asset: String,
}

impl EthereumHandler {
    pub fn new(network_id: NetworkId) -> Self {
        let asset = format!("{}/slip44:60", network_id.as_str());
        Self { network_id, asset }
    }

    pub fn mainnet() -> Self {
        Self::new(NetworkId::eip155(1))
    }

    fn chain_id(&self) -> u64 {
        self.network_id.evm_chain_id().unwrap_or(1)
    }

    fn ensure_context(&self, ctx: &HandlerContext) {
        ctx.wallet.ensure_context(AssetContext {
            chain: ChainFamily::Ethereum,
            network_id: self.network_id.clone(),
            asset: self.asset.clone(),
        });
    }

    fn signing_key(&self, ctx: &HandlerContext) -> Result<DerivedKey, ProviderError> {
        ctx.wallet
            .keys_for(&self.network_id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::misconfigured(format!(
                    "no derived key for {}",
                    self.network_id
                ))
            })
    }

    /// Assemble the canonical unsigned transaction from caller-supplied
    /// fields, filling nonce, gas, and fees from the network as needed.
    async fn build_transaction(
        &self,
        ctx: &HandlerContext,
        obj: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<EvmTransaction, ProviderError> {
        let key = self.signing_key(ctx)?;
        let from = obj
            .get("from")
            .and_then(|v| v.as_str())
            .unwrap_or(&key.address)
            .to_string();
        let to = require_str(obj, "to")?.to_string();
        let value = obj
            .get("value")
            .and_then(parse_u128_value)
            .unwrap_or(0);
        let data = obj
            .get("data")
            .and_then(|v| v.as_str())
            .unwrap_or("0x")
            .to_string();

        let nonce = match obj.get("nonce").and_then(parse_u64_value) {
            Some(n) => n,
            None => ctx
                .sdk
                .evm_nonce(&self.network_id, &from)
                .await
                .map_err(sdk_err)?,
        };

        let explicit_gas = obj
            .get("gas")
            .or_else(|| obj.get("gasLimit"))
            .and_then(parse_u64_value);
        let gas_limit = match explicit_gas {
            Some(g) => g,
            None => {
                let call = EvmCallRequest {
                    from: from.clone(),
                    to: to.clone(),
                    value: format!("0x{value:x}"),
                    data: data.clone(),
                };
                let raw = ctx
                    .sdk
                    .evm_estimate_gas(&self.network_id, &call)
                    .await
                    .map_err(sdk_err)?;
                bounded_gas_limit(raw)
            }
        };

        let max_fee = obj.get("maxFeePerGas").and_then(parse_u128_value);
        let max_priority = obj.get("maxPriorityFeePerGas").and_then(parse_u128_value);
        let gas_price = obj.get("gasPrice").and_then(parse_u128_value);
        let fees = match (max_fee, max_priority, gas_price) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas), _) => EvmFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
            (_, _, Some(gas_price)) => EvmFees::Legacy { gas_price },
            _ => {
                let market = ctx
                    .sdk
                    .evm_fee_data(&self.network_id)
                    .await
                    .map_err(sdk_err)?;
                match market.base_fee_per_gas {
                    Some(base) => {
                        let tip = market
                            .max_priority_fee_per_gas
                            .unwrap_or(DEFAULT_PRIORITY_FEE);
                        EvmFees::Eip1559 {
                            max_fee_per_gas: base.saturating_mul(2).saturating_add(tip),
                            max_priority_fee_per_gas: tip,
                        }
                    }
                    None => EvmFees::Legacy {
                        gas_price: market.gas_price,
                    },
                }
            }
        };

        let derivation_path = if key.derivation_path.is_empty() {
            DEFAULT_DERIVATION_PATH.to_vec()
        } else {
            key.derivation_path.clone()
        };

        Ok(EvmTransaction {
            network_id: self.network_id.clone(),
            chain_id: self.chain_id(),
            from,
            to,
            value: format!("0x{value:x}"),
            data,
            nonce,
            gas_limit,
            fees,
            derivation_path,
        })
    }

    fn new_record(&self, info: &RequestInfo) -> RequestRecord {
        RequestRecord::new(
            self.network_id.clone(),
            ChainFamily::Ethereum,
            &info.method,
            json!(info.params),
            info.metadata(),
        )
    }

    /// Build → approve → sign → broadcast for `eth_sendTransaction` and
    /// native transfers.
    async fn send_transaction(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
        obj: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError> {
        self.ensure_context(ctx);
        let tx = self.build_transaction(ctx, obj).await?;

        let mut record = self.new_record(info);
        record
            .set_unsigned_tx(serde_json::to_value(&tx).map_err(ProviderError::wrap_internal)?)
            .map_err(ProviderError::wrap_internal)?;

        let record = require_user_approval(ctx, record).await?;

        // Sign what the record holds now — the approval surface may have
        // adjusted fee fields while the request was pending.
        let tx: EvmTransaction = record
            .unsigned_tx
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(tx);

        let signed = ctx.sdk.sign_evm_transaction(&tx).await.map_err(sdk_err)?;
        let txid = ctx
            .sdk
            .broadcast(&self.network_id, &signed)
            .await
            .map_err(sdk_err)?;
        ctx.metrics.broadcasts.inc();
        info!(txid = %txid, nonce = tx.nonce, "broadcast EVM transaction");

        complete_record(ctx, record, signed, Some(&txid))?;
        Ok(json!(txid))
    }

    async fn personal_sign(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        self.ensure_context(ctx);
        let message = info
            .params
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::invalid_request("personal_sign requires a message"))?
            .to_string();
        let address = match info.params.get(1).and_then(|v| v.as_str()) {
            Some(a) => a.to_string(),
            None => self.signing_key(ctx)?.address,
        };

        let mut record = self.new_record(info);
        record
            .set_unsigned_tx(json!({ "message": message, "address": address }))
            .map_err(ProviderError::wrap_internal)?;

        let record = require_user_approval(ctx, record).await?;
        let signature = ctx
            .sdk
            .sign_message(&self.network_id, &address, &message)
            .await
            .map_err(sdk_err)?;

        complete_record(ctx, record, json!({ "signature": signature }), None)?;
        Ok(json!(signature))
    }

    async fn sign_typed_data(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        self.ensure_context(ctx);
        let address = match info.params.first().and_then(|v| v.as_str()) {
            Some(a) => a.to_string(),
            None => self.signing_key(ctx)?.address,
        };
        let typed = match info.params.get(1) {
            Some(serde_json::Value::String(s)) => serde_json::from_str(s).map_err(|e| {
                ProviderError::invalid_request(format!("typed data is not valid JSON: {e}"))
            })?,
            Some(v @ serde_json::Value::Object(_)) => v.clone(),
            _ => {
                return Err(ProviderError::invalid_request(
                    "typed-data signing requires [address, typedData]",
                ))
            }
        };

        let mut record = self.new_record(info);
        record
            .set_unsigned_tx(json!({ "address": address, "typed_data": typed }))
            .map_err(ProviderError::wrap_internal)?;

        let record = require_user_approval(ctx, record).await?;
        let signature = ctx
            .sdk
            .sign_typed_data(&self.network_id, &address, &typed)
            .await
            .map_err(sdk_err)?;

        complete_record(ctx, record, json!({ "signature": signature }), None)?;
        Ok(json!(signature))
    }
}

#[async_trait]
impl ChainHandler for EthereumHandler {
    fn chain(&self) -> ChainFamily {
        ChainFamily::Ethereum
    }

    fn network_id(&self) -> NetworkId {
        self.network_id.clone()
    }

    async fn request_accounts(
        &self,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value, ProviderError> {
        let addresses: Vec<String> = ctx
            .wallet
            .keys_for(&self.network_id)
            .into_iter()
            .map(|k| k.address)
            .collect();
        Ok(json!(addresses))
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
        let obj = param_object(info)?;
        let amount = obj
            .get("amount")
            .and_then(parse_u128_value)
            .ok_or_else(|| ProviderError::invalid_request("transfer requires an amount"))?;
        let mut tx_obj = obj.clone();
        tx_obj.insert("value".to_string(), json!(format!("0x{amount:x}")));
        self.send_transaction(ctx, info, &tx_obj).await
    }

    async fn sign(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        match info.method.as_str() {
            "eth_sendTransaction" => {
                let obj = param_object(info)?.clone();
                self.send_transaction(ctx, info, &obj).await
            }
            "personal_sign" | "eth_sign" => self.personal_sign(ctx, info).await,
            m if m.starts_with("eth_signTypedData") => self.sign_typed_data(ctx, info).await,
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        match info.method.as_str() {
            // Read-only chain identity; no approval, no record.
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id()))),
            "wallet_switchEthereumChain" => self.switch_chain(info),
            _ => dispatch_common(self, ctx, info).await,
        }
    }
}

impl EthereumHandler {
    /// EIP-3326 chain switching. This handler serves a single network, so
    /// a switch to it is a no-op and anything else is unrecognized.
    fn switch_chain(&self, info: &RequestInfo) -> Result<serde_json::Value, ProviderError> {
        let requested = info
            .params
            .first()
            .and_then(|v| v.get("chainId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::invalid_request("wallet_switchEthereumChain requires a chainId")
            })?;
        let requested_id = requested
            .strip_prefix("0x")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .ok_or_else(|| {
                ProviderError::invalid_request(format!("malformed chainId: {requested}"))
            })?;
        if requested_id == self.chain_id() {
            Ok(serde_json::Value::Null)
        } else {
            Err(ProviderError::unrecognized_chain(&format!(
                "eip155:{requested_id}"
            )))
        }
    }
}
