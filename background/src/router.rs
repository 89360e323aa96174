//! The dispatch router.
//!
//! Validates an incoming relayed request and selects the chain handler by
//! exact-match chain tag. Handler errors pass through unchanged; anything
//! that is not already a structured provider error is wrapped before it
//! can reach the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use keybridge_messages::RequestInfo;
use keybridge_types::{ChainFamily, ProviderError};

use crate::handler::{ChainHandler, HandlerContext};

pub struct Router {
    handlers: HashMap<ChainFamily, Arc<dyn ChainHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own chain tag.
    pub fn register(&mut self, handler: Arc<dyn ChainHandler>) {
        self.handlers.insert(handler.chain(), handler);
    }

    pub fn handler_for(&self, chain: ChainFamily) -> Option<Arc<dyn ChainHandler>> {
        self.handlers.get(&chain).cloned()
    }

    /// Chains with a registered handler.
    pub fn supported_chains(&self) -> Vec<ChainFamily> {
        self.handlers.keys().copied().collect()
    }

    /// Validate and dispatch one request.
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext,
        info: &RequestInfo,
    ) -> Result<serde_json::Value, ProviderError> {
        if info.method.is_empty() {
            return Err(ProviderError::invalid_request("request has no method"));
        }

        let handler = self
            .handlers
            .get(&info.chain)
            .ok_or_else(|| ProviderError::unsupported_chain(info.chain.as_str()))?;

        debug!(chain = %info.chain, method = %info.method, id = info.id, "dispatching request");
        handler.handle(ctx, info).await
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keybridge_types::{codes, NetworkId, Timestamp};

    struct StubHandler;

    #[async_trait]
    impl ChainHandler for StubHandler {
        fn chain(&self) -> ChainFamily {
            ChainFamily::Ethereum
        }

        fn network_id(&self) -> NetworkId {
            NetworkId::eip155(1)
        }

        async fn request_accounts(
            &self,
            _ctx: &HandlerContext,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!(["0xstub"]))
        }

        async fn request_balance(
            &self,
            _ctx: &HandlerContext,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!("0"))
        }

        async fn transfer(
            &self,
            _ctx: &HandlerContext,
            _info: &RequestInfo,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!("0xtxid"))
        }
    }

    fn info(chain: ChainFamily, method: &str) -> RequestInfo {
        RequestInfo {
            id: 1,
            method: method.into(),
            params: vec![],
            chain,
            site_url: "https://dapp.example".into(),
            script_source: "keybridge".into(),
            version: "1.0.0".into(),
            request_time: Timestamp::now(),
            referrer: None,
            href: None,
            user_agent: "test".into(),
            platform: "linux".into(),
            language: "en-US".into(),
        }
    }

    fn test_ctx() -> HandlerContext {
        let store: std::sync::Arc<dyn keybridge_store::EventStore> =
            std::sync::Arc::new(keybridge_nullables::NullEventStore::new());
        let metrics = std::sync::Arc::new(crate::PipelineMetrics::new());
        HandlerContext {
            gate: std::sync::Arc::new(crate::ApprovalGate::new(
                store.clone(),
                metrics.clone(),
                None,
            )),
            store,
            sdk: std::sync::Arc::new(keybridge_nullables::NullSdk::new()),
            wallet: std::sync::Arc::new(crate::WalletState::new()),
            metrics,
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut router = Router::new();
        router.register(Arc::new(StubHandler));
        let result = router
            .dispatch(&test_ctx(), &info(ChainFamily::Ethereum, "eth_accounts"))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(["0xstub"]));
    }

    #[tokio::test]
    async fn unregistered_chain_is_unsupported() {
        let mut router = Router::new();
        router.register(Arc::new(StubHandler));
        let err = router
            .dispatch(&test_ctx(), &info(ChainFamily::Ripple, "transfer"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED);
        assert!(err.message.contains("ripple"));
    }

    #[tokio::test]
    async fn empty_method_is_invalid_request() {
        let mut router = Router::new();
        router.register(Arc::new(StubHandler));
        let err = router
            .dispatch(&test_ctx(), &info(ChainFamily::Ethereum, ""))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method_is_unsupported_method() {
        let mut router = Router::new();
        router.register(Arc::new(StubHandler));
        let err = router
            .dispatch(&test_ctx(), &info(ChainFamily::Ethereum, "eth_mine"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED);
        assert!(err.message.contains("eth_mine"));
    }
}
