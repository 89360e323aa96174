//! Integration tests for the page bridge: correlation integrity under
//! arbitrary response orderings, the timeout sweep, pre-readiness queuing,
//! and synchronous argument validation.

use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::mpsc;

use keybridge_messages::{Envelope, Payload};
use keybridge_provider::{BridgeConfig, PageBridge, PageChannel, ProviderHub};
use keybridge_types::codes;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config() -> BridgeConfig {
    BridgeConfig {
        site_url: "https://dapp.example".into(),
        user_agent: "test-agent".into(),
        platform: "linux".into(),
        call_timeout_ms: 200,
        sweep_interval_ms: 20,
        handshake_base_delay_ms: 10,
        handshake_max_attempts: 3,
        discovery_reannounce_delay_ms: 10,
        ..Default::default()
    }
}

/// Spawn a bridge and hand its relay-side channel ends to `relay`.
fn start_bridge<F, Fut>(config: BridgeConfig, relay: F) -> ProviderHub
where
    F: FnOnce(mpsc::Receiver<Envelope>, mpsc::Sender<Envelope>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (to_relay_tx, to_relay_rx) = mpsc::channel(64);
    let (to_page_tx, to_page_rx) = mpsc::channel(64);
    let hub = PageBridge::spawn(
        config,
        PageChannel {
            to_relay: to_relay_tx,
            from_relay: to_page_rx,
        },
    );
    tokio::spawn(relay(to_relay_rx, to_page_tx));
    hub
}

/// A relay that confirms readiness, buffers `expected` wallet requests,
/// then answers them in the order given by `order` (indices into arrival
/// order). Each answer echoes the request's method.
async fn permuting_relay(
    mut rx: mpsc::Receiver<Envelope>,
    tx: mpsc::Sender<Envelope>,
    expected: usize,
    order: Vec<usize>,
) {
    let mut buffered = Vec::new();
    while let Some(envelope) = rx.recv().await {
        match envelope.payload {
            Payload::ReadinessCheck { request_id } => {
                let _ = tx.send(Envelope::readiness_confirmed(request_id)).await;
            }
            Payload::WalletRequest {
                request_id,
                request_info,
            } => {
                buffered.push((request_id, request_info.method.clone()));
                if buffered.len() == expected {
                    for &i in &order {
                        let (id, method) = &buffered[i];
                        let _ = tx
                            .send(Envelope::wallet_result(
                                *id,
                                serde_json::json!({ "echo": method }),
                                0,
                            ))
                            .await;
                    }
                }
            }
            _ => {}
        }
    }
}

/// A relay that confirms readiness but never answers wallet requests.
async fn silent_relay(mut rx: mpsc::Receiver<Envelope>, tx: mpsc::Sender<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Payload::ReadinessCheck { request_id } = envelope.payload {
            let _ = tx.send(Envelope::readiness_confirmed(request_id)).await;
        }
    }
}

async fn run_permutation(order: Vec<usize>) {
    let n = order.len();
    let hub = start_bridge(test_config(), move |rx, tx| {
        permuting_relay(rx, tx, n, order)
    });

    let mut handles = Vec::new();
    for i in 0..n {
        let provider = hub.ethereum();
        handles.push(tokio::spawn(async move {
            let method = format!("method_{i}");
            let result = provider
                .request(&method, serde_json::json!([]))
                .await
                .expect("call should resolve");
            (method, result)
        }));
    }

    for handle in handles {
        let (method, result) = handle.await.unwrap();
        assert_eq!(result["echo"], method, "response matched the wrong caller");
    }
    assert_eq!(hub.in_flight(), 0);
}

// ---------------------------------------------------------------------------
// 1. Correlation integrity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn responses_in_reverse_order_reach_their_callers() {
    run_permutation(vec![3, 2, 1, 0]).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn correlation_holds_under_any_response_order(
        order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(run_permutation(order));
    }
}

// ---------------------------------------------------------------------------
// 2. Timeout bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unanswered_call_times_out_exactly_once() {
    let hub = start_bridge(test_config(), |rx, tx| silent_relay(rx, tx));
    let provider = hub.ethereum();

    let err = provider
        .request("eth_blockNumber", serde_json::json!([]))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::GENERIC_FAILURE);
    assert!(err.message.contains("timed out"));
    assert_eq!(hub.in_flight(), 0);
}

// ---------------------------------------------------------------------------
// 3. Pre-readiness queueing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_issued_before_readiness_is_flushed_and_answered() {
    // Relay that delays its readiness confirmation, then echoes.
    let hub = start_bridge(test_config(), |mut rx, tx| async move {
        let mut confirm_after = None;
        while let Some(envelope) = rx.recv().await {
            match envelope.payload {
                Payload::ReadinessCheck { request_id } => {
                    if confirm_after.is_none() {
                        confirm_after = Some(request_id);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        let _ = tx.send(Envelope::readiness_confirmed(request_id)).await;
                    }
                }
                Payload::WalletRequest { request_id, .. } => {
                    let _ = tx
                        .send(Envelope::wallet_result(
                            request_id,
                            serde_json::json!("flushed"),
                            0,
                        ))
                        .await;
                }
                _ => {}
            }
        }
    });

    // Issued immediately: the handshake cannot have completed yet.
    let result = hub
        .ethereum()
        .request("eth_accounts", serde_json::json!([]))
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!("flushed"));
    assert!(hub.is_ready());
}

// ---------------------------------------------------------------------------
// 4. Handshake failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_gives_up_after_bounded_retries() {
    // Relay that consumes messages but never confirms.
    let hub = start_bridge(test_config(), |mut rx, _tx| async move {
        while rx.recv().await.is_some() {}
    });

    // Wait past all (short) handshake attempts.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!hub.is_ready());
    let err = hub.last_error().expect("handshake failure recorded");
    assert!(err.contains("did not confirm readiness"));
}

// ---------------------------------------------------------------------------
// 5. Synchronous validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_method_and_params_fail_without_crossing_the_relay() {
    // No relay at all: validation failures must not need one.
    let (to_relay_tx, _keep_rx) = mpsc::channel(4);
    let (_to_page_tx, to_page_rx) = mpsc::channel::<Envelope>(4);
    let hub = PageBridge::spawn(
        test_config(),
        PageChannel {
            to_relay: to_relay_tx,
            from_relay: to_page_rx,
        },
    );
    let provider = hub.ethereum();

    let err = provider
        .request("", serde_json::json!([]))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::INVALID_REQUEST);

    let err = provider
        .request("bad method!", serde_json::json!([]))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::INVALID_REQUEST);

    let err = provider
        .request("eth_call", serde_json::json!({"not": "an array"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::INVALID_REQUEST);
    assert!(err.message.contains("object"));
}

// ---------------------------------------------------------------------------
// 6. Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovery_request_triggers_reannouncement() {
    let hub = start_bridge(test_config(), |rx, tx| silent_relay(rx, tx));
    let mut announcements = hub.subscribe_discovery();
    hub.request_providers();
    let got = announcements.recv().await.unwrap();
    assert_eq!(got.info.name, "KeyBridge");
    assert!(!got.info.uuid.is_empty());
}
