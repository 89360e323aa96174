//! The chain-handler capability interface.
//!
//! Every chain family implements the same verb set against the shared
//! wallet state and the approval gate. New chains register with the router
//! instead of editing a dispatch switch.

use std::sync::Arc;

use async_trait::async_trait;

use keybridge_messages::RequestInfo;
use keybridge_sdk::WalletSdk;
use keybridge_store::EventStore;
use keybridge_types::{ChainFamily, NetworkId, ProviderError};

use crate::approvals::ApprovalGate;
use crate::metrics::PipelineMetrics;
use crate::wallet_state::WalletState;

/// Shared resources handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn EventStore>,
    pub sdk: Arc<dyn WalletSdk>,
    pub wallet: Arc<WalletState>,
    pub gate: Arc<ApprovalGate>,
    pub metrics: Arc<PipelineMetrics>,
}

/// The per-chain-family verb set.
///
/// `request_accounts` and `request_balance` are read-only: they never
/// create records or touch the approval gate. Transfer and signing verbs
/// run the full build → approve → sign → broadcast sequence.
#[async_trait]
pub trait ChainHandler: Send + Sync {
    /// The tag this handler is registered under.
    fn chain(&self) -> ChainFamily;

    /// The network this handler operates on.
    fn network_id(&self) -> NetworkId;

    async fn request_accounts(
        &self,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value, ProviderError>;

    async fn request_balance(
        &self,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value, ProviderError>;

    async fn transfer(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Chain-specific signing verbs (`eth_sendTransaction`,
    /// `personal_sign`, ...). The default implementation rejects
    /// everything; handlers override it for the methods they support.
    async fn sign(
        &self,
        _ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::unsupported_method(&info.method))
    }

    /// Route a request to the matching verb.
    async fn handle(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        dispatch_common(self, ctx, info).await
    }
}

/// The shared verb routing used by every handler's default `handle`.
pub async fn dispatch_common<H: ChainHandler + ?Sized>(
    handler: &H,
    ctx: &HandlerContext,
    info: &RequestInfo,
) -> Result<serde_json::Value, ProviderError> {
    match info.method.as_str() {
        "request_accounts" | "eth_accounts" | "eth_requestAccounts" => {
            handler.request_accounts(ctx).await
        }
        "request_balance" => handler.request_balance(ctx).await,
        "transfer" => handler.transfer(ctx, info).await,
        _ => handler.sign(ctx, info).await,
    }
}
