//! The background service loop.
//!
//! Receives relayed wallet requests and dispatches each in its own task so
//! a request suspended at the approval gate never blocks the loop. Replies
//! travel back through the per-request oneshot the relay attached.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keybridge_messages::{Envelope, Payload};
use keybridge_relay::RelayedRequest;
use keybridge_sdk::WalletSdk;
use keybridge_store::EventStore;
use keybridge_types::{codes, ProviderError, Timestamp};

use crate::approvals::ApprovalGate;
use crate::chains::{CosmosHandler, EthereumHandler, RippleHandler, UtxoHandler};
use crate::handler::HandlerContext;
use crate::metrics::PipelineMetrics;
use crate::router::Router;
use crate::wallet_state::WalletState;

pub struct BackgroundService {
    ctx: HandlerContext,
    router: Arc<Router>,
}

impl BackgroundService {
    pub fn new(ctx: HandlerContext, router: Router) -> Self {
        Self {
            ctx,
            router: Arc::new(router),
        }
    }

    /// Build a service with every supported chain family registered.
    pub fn with_default_handlers(
        store: Arc<dyn EventStore>,
        sdk: Arc<dyn WalletSdk>,
        wallet: Arc<WalletState>,
        gate: Arc<ApprovalGate>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let ctx = HandlerContext {
            store,
            sdk,
            wallet,
            gate,
            metrics,
        };

        let mut router = Router::new();
        router.register(Arc::new(EthereumHandler::mainnet()));
        router.register(Arc::new(UtxoHandler::bitcoin()));
        router.register(Arc::new(UtxoHandler::bitcoin_cash()));
        router.register(Arc::new(UtxoHandler::litecoin()));
        router.register(Arc::new(UtxoHandler::dogecoin()));
        router.register(Arc::new(CosmosHandler::cosmos_hub()));
        router.register(Arc::new(CosmosHandler::osmosis()));
        router.register(Arc::new(CosmosHandler::thorchain()));
        router.register(Arc::new(RippleHandler::mainnet()));

        Self::new(ctx, router)
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Run the service loop until the request channel closes or shutdown
    /// is signalled.
    pub fn spawn(
        self,
        mut requests: mpsc::Receiver<RelayedRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let Self { ctx, router } = self;
        tokio::spawn(async move {
            info!(
                chains = ?router.supported_chains(),
                "background service started"
            );
            loop {
                tokio::select! {
                    maybe = requests.recv() => match maybe {
                        Some(request) => {
                            let router = router.clone();
                            let ctx = ctx.clone();
                            tokio::spawn(handle_one(router, ctx, request));
                        }
                        None => {
                            debug!("request channel closed");
                            break;
                        }
                    },
                    result = shutdown.recv() => match result {
                        Ok(()) => {
                            info!("background service shutting down");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // No controller: serve until the request
                            // channel closes.
                            while let Some(request) = requests.recv().await {
                                let router = router.clone();
                                let ctx = ctx.clone();
                                tokio::spawn(handle_one(router, ctx, request));
                            }
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            info!("background service shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn handle_one(router: Arc<Router>, ctx: HandlerContext, request: RelayedRequest) {
    let RelayedRequest { envelope, reply_tx } = request;
    let request_id = envelope.request_id();

    let info = match envelope.payload {
        Payload::WalletRequest { request_info, .. } => request_info,
        other => {
            warn!(?other, "background received a non-request payload");
            let _ = reply_tx.send(Envelope::wallet_error(
                request_id,
                ProviderError::invalid_request("expected a wallet request"),
                Timestamp::now().as_millis(),
            ));
            return;
        }
    };

    ctx.metrics.requests_dispatched.inc();
    let reply = match router.dispatch(&ctx, &info).await {
        Ok(result) => Envelope::wallet_result(request_id, result, Timestamp::now().as_millis()),
        Err(error) => {
            if error.code == codes::GENERIC_FAILURE {
                ctx.metrics.handler_failures.inc();
            }
            debug!(
                request_id,
                method = %info.method,
                code = error.code,
                "request failed: {}",
                error.message
            );
            Envelope::wallet_error(request_id, error, Timestamp::now().as_millis())
        }
    };
    let _ = reply_tx.send(reply);
}
