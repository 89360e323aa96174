//! The page bridge core: provider handles, readiness handshake, and the
//! pump tasks that tie the callback map to the relay channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use keybridge_messages::{
    DiscoveryAnnouncement, Envelope, Payload, ProviderMetadata, RequestInfo,
};
use keybridge_types::{ChainFamily, ProviderError, Timestamp};

use crate::correlation::CallbackMap;
use crate::discovery::{default_metadata, Announcer};
use crate::emitter::EventEmitter;
use crate::outbound::OutboundQueue;

/// How long a call may stay unanswered before the sweep fails it.
const CALL_TIMEOUT_MS: u64 = 60_000;
/// How often the sweep scans the callback map.
const SWEEP_INTERVAL_MS: u64 = 10_000;
/// Pre-readiness queue capacity; oldest entries are dropped on overflow.
const OUTBOUND_CAPACITY: usize = 64;
/// First handshake retry delay; doubles per attempt.
const HANDSHAKE_BASE_DELAY_MS: u64 = 250;
const HANDSHAKE_MAX_ATTEMPTS: u32 = 5;
/// Second discovery announcement, for listeners registered after load.
const DISCOVERY_REANNOUNCE_DELAY_MS: u64 = 500;

/// Static facts about the embedding page plus bridge tuning knobs.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub site_url: String,
    pub referrer: Option<String>,
    pub href: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub version: String,
    pub script_source: String,
    /// Chain id reported in `connect`/`chainChanged` events, 0x-hex.
    pub chain_id_hex: String,
    pub metadata: ProviderMetadata,
    pub call_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub outbound_capacity: usize,
    pub handshake_base_delay_ms: u64,
    pub handshake_max_attempts: u32,
    pub discovery_reannounce_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            referrer: None,
            href: None,
            user_agent: String::new(),
            platform: String::new(),
            language: "en-US".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            script_source: "keybridge".to_string(),
            chain_id_hex: "0x1".to_string(),
            metadata: default_metadata(),
            call_timeout_ms: CALL_TIMEOUT_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            outbound_capacity: OUTBOUND_CAPACITY,
            handshake_base_delay_ms: HANDSHAKE_BASE_DELAY_MS,
            handshake_max_attempts: HANDSHAKE_MAX_ATTEMPTS,
            discovery_reannounce_delay_ms: DISCOVERY_REANNOUNCE_DELAY_MS,
        }
    }
}

/// The message channel pair connecting the page context to the relay.
pub struct PageChannel {
    pub to_relay: mpsc::Sender<Envelope>,
    pub from_relay: mpsc::Receiver<Envelope>,
}

struct Shared {
    config: BridgeConfig,
    callbacks: CallbackMap,
    outbound: Mutex<OutboundQueue>,
    ready: watch::Sender<bool>,
    to_relay: mpsc::Sender<Envelope>,
    emitter: EventEmitter,
    announcer: Announcer,
    next_id: AtomicU64,
    last_error: Mutex<Option<String>>,
    connect_emitted: AtomicBool,
}

impl Shared {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Transition to ready: flush the parked queue and emit `connect` once.
    async fn mark_ready(&self) {
        if self.is_ready() {
            return;
        }
        self.ready.send_replace(true);

        let parked = self.outbound.lock().unwrap().drain();
        for envelope in parked {
            if self.to_relay.send(envelope).await.is_err() {
                warn!("relay channel closed while flushing parked requests");
                break;
            }
        }

        if !self.connect_emitted.swap(true, Ordering::SeqCst) {
            self.emitter.emit(
                "connect",
                &serde_json::json!({ "chainId": self.config.chain_id_hex }),
            );
        }
    }

    /// Send a correlated request and await its response.
    async fn dispatch(
        &self,
        chain: ChainFamily,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError> {
        let id = self.next_request_id();
        let rx = self.callbacks.insert(id, method);

        let info = RequestInfo {
            id,
            method: method.to_string(),
            params,
            chain,
            site_url: self.config.site_url.clone(),
            script_source: self.config.script_source.clone(),
            version: self.config.version.clone(),
            request_time: Timestamp::now(),
            referrer: self.config.referrer.clone(),
            href: self.config.href.clone(),
            user_agent: self.config.user_agent.clone(),
            platform: self.config.platform.clone(),
            language: self.config.language.clone(),
        };
        let envelope = Envelope::wallet_request(id, info);

        if self.is_ready() {
            if self.to_relay.send(envelope).await.is_err() {
                self.callbacks.forget(id);
                return Err(ProviderError::misconfigured("relay channel closed"));
            }
        } else {
            // Parked until the handshake completes. If the queue evicts the
            // envelope, the sweep fails its caller at the timeout bound.
            self.outbound.lock().unwrap().push(envelope);
            // Readiness may have flipped between the check and the push;
            // re-flush so nothing is stranded until the sweep.
            if self.is_ready() {
                let parked = self.outbound.lock().unwrap().drain();
                for envelope in parked {
                    if self.to_relay.send(envelope).await.is_err() {
                        break;
                    }
                }
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::misconfigured(
                "bridge shut down before a response arrived",
            )),
        }
    }
}

/// Synchronous argument validation. Failures here never cross the relay.
fn validate_call(
    method: &str,
    params: serde_json::Value,
) -> Result<Vec<serde_json::Value>, ProviderError> {
    let name_ok = !method.is_empty()
        && method.len() <= 64
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if !name_ok {
        return Err(ProviderError::invalid_request(format!(
            "invalid method name: {method:?}"
        )));
    }
    match params {
        serde_json::Value::Array(values) => Ok(values),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(ProviderError::invalid_request(format!(
            "params must be an array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Builder entry point for the page bridge.
pub struct PageBridge;

impl PageBridge {
    /// Spawn the bridge's pump tasks and return the provider hub.
    ///
    /// Three tasks run until their inputs close: the inbound pump (routes
    /// responses into the callback map), the timeout sweep, and the
    /// readiness handshake. A discovery announcement is broadcast on load
    /// and re-broadcast after a short delay.
    pub fn spawn(config: BridgeConfig, channel: PageChannel) -> ProviderHub {
        let announcer = Announcer::new(config.metadata.clone());
        let (ready_tx, _) = watch::channel(false);
        let outbound_capacity = config.outbound_capacity;

        let shared = Arc::new(Shared {
            callbacks: CallbackMap::new(),
            outbound: Mutex::new(OutboundQueue::new(outbound_capacity)),
            ready: ready_tx,
            to_relay: channel.to_relay,
            emitter: EventEmitter::new(),
            announcer,
            next_id: AtomicU64::new(0),
            last_error: Mutex::new(None),
            connect_emitted: AtomicBool::new(false),
            config,
        });

        tokio::spawn(inbound_pump(shared.clone(), channel.from_relay));
        tokio::spawn(sweep_loop(Arc::downgrade(&shared)));
        tokio::spawn(run_handshake(shared.clone()));
        tokio::spawn(announce_twice(shared.clone()));

        ProviderHub { shared }
    }
}

async fn inbound_pump(shared: Arc<Shared>, mut from_relay: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = from_relay.recv().await {
        match envelope.payload {
            Payload::WalletResponse {
                request_id,
                result,
                error,
                ..
            } => {
                let outcome = match error {
                    Some(e) => Err(e),
                    None => Ok(result.unwrap_or(serde_json::Value::Null)),
                };
                shared.callbacks.resolve(request_id, outcome);
            }
            Payload::ReadinessConfirmed { request_id } => {
                debug!(request_id, "relay confirmed readiness");
                shared.mark_ready().await;
            }
            other => debug!(?other, "ignoring unexpected inbound payload"),
        }
    }
    // The relay side is gone; unresolved calls will be swept.
    shared.ready.send_replace(false);
}

async fn sweep_loop(shared: Weak<Shared>) {
    let interval_ms = match shared.upgrade() {
        Some(s) => s.config.sweep_interval_ms,
        None => return,
    };
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match shared.upgrade() {
            Some(s) => {
                let timeout = Duration::from_millis(s.config.call_timeout_ms);
                let failed = s.callbacks.sweep(timeout);
                if failed > 0 {
                    debug!(failed, "sweep timed out stale calls");
                }
            }
            None => return,
        }
    }
}

async fn run_handshake(shared: Arc<Shared>) {
    let base = shared.config.handshake_base_delay_ms.max(1);
    let mut ready_rx = shared.ready.subscribe();

    for attempt in 0..shared.config.handshake_max_attempts {
        let id = shared.next_request_id();
        if shared
            .to_relay
            .send(Envelope::readiness_check(id))
            .await
            .is_err()
        {
            *shared.last_error.lock().unwrap() =
                Some("relay channel closed during handshake".to_string());
            return;
        }

        let wait = Duration::from_millis(base << attempt);
        let outcome = tokio::time::timeout(wait, ready_rx.wait_for(|ready| *ready))
            .await
            .map(|r| r.map(|_| ()));
        match outcome {
            Ok(Ok(_)) => return,
            Ok(Err(_)) => return,
            Err(_) => {
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
            }
        }
    }

    let message = format!(
        "relay did not confirm readiness after {} attempts",
        shared.config.handshake_max_attempts
    );
    warn!("{message}");
    *shared.last_error.lock().unwrap() = Some(message.clone());
    shared.emitter.emit(
        "disconnect",
        &serde_json::to_value(ProviderError::misconfigured(message))
            .unwrap_or(serde_json::Value::Null),
    );
}

async fn announce_twice(shared: Arc<Shared>) {
    shared.announcer.announce();
    tokio::time::sleep(Duration::from_millis(
        shared.config.discovery_reannounce_delay_ms,
    ))
    .await;
    shared.announcer.announce();
}

/// One wallet-shaped provider bound to a single chain family.
#[derive(Clone)]
pub struct Provider {
    chain: ChainFamily,
    shared: Arc<Shared>,
}

impl Provider {
    pub fn chain(&self) -> ChainFamily {
        self.chain
    }

    /// The standard request surface: resolves with the method result or
    /// rejects with a structured provider error.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let params = validate_call(method, params)?;
        self.shared.dispatch(self.chain, method, params).await
    }

    /// Legacy alias for [`request`](Self::request).
    pub async fn send(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        self.request(method, params).await
    }

    /// Legacy callback-style entry point.
    pub fn send_async(
        &self,
        method: String,
        params: serde_json::Value,
        callback: impl FnOnce(Result<serde_json::Value, ProviderError>) + Send + 'static,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.request(&method, params).await;
            callback(result);
        });
    }
}

/// The multi-chain namespace: one provider handle per chain family, plus
/// the lifecycle event registry and discovery surface.
pub struct ProviderHub {
    shared: Arc<Shared>,
}

impl ProviderHub {
    /// The `ethereum`-shaped primary provider.
    pub fn ethereum(&self) -> Provider {
        self.wallet(ChainFamily::Ethereum)
    }

    /// A provider handle for any supported chain family.
    pub fn wallet(&self, chain: ChainFamily) -> Provider {
        Provider {
            chain,
            shared: self.shared.clone(),
        }
    }

    /// The aggregate namespace: one wallet-shaped object per chain key.
    pub fn wallets(&self) -> HashMap<ChainFamily, Provider> {
        ChainFamily::all()
            .iter()
            .map(|chain| (*chain, self.wallet(*chain)))
            .collect()
    }

    /// Lifecycle event registry (`connect`, `disconnect`,
    /// `accountsChanged`, `chainChanged`).
    pub fn events(&self) -> &EventEmitter {
        &self.shared.emitter
    }

    /// Subscribe to discovery announcements.
    pub fn subscribe_discovery(&self) -> broadcast::Receiver<DiscoveryAnnouncement> {
        self.shared.announcer.subscribe()
    }

    /// Handle an observed discovery request by re-announcing.
    pub fn request_providers(&self) {
        self.shared.announcer.announce();
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        self.shared.announcer.metadata()
    }

    /// Whether the readiness handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// The last handshake failure, if the bridge gave up.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Number of calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.callbacks.len()
    }
}
