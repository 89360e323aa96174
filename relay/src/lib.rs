//! The content-script relay.
//!
//! Pure pass-through between the page's message channel and the background
//! service: forwards outbound wallet requests, relays responses back, and
//! answers readiness checks itself. No business state, no persistence, no
//! payload transformation beyond envelope tagging.
//!
//! Messages whose `source` is not page-origin are dropped — the page
//! channel is shared with other frames, and only same-window page traffic
//! may cross into the extension context.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use keybridge_messages::{Envelope, MessageSource, Payload};
use keybridge_types::{ProviderError, Timestamp};

/// A wallet request handed to the background service, with the oneshot
/// the service resolves when the handler finishes.
pub struct RelayedRequest {
    pub envelope: Envelope,
    pub reply_tx: oneshot::Sender<Envelope>,
}

/// The relay task handle.
pub struct Relay;

impl Relay {
    /// Spawn the relay loop. It runs until the page channel closes.
    pub fn spawn(
        mut from_page: mpsc::Receiver<Envelope>,
        to_page: mpsc::Sender<Envelope>,
        to_background: mpsc::Sender<RelayedRequest>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = from_page.recv().await {
                if envelope.source != MessageSource::PageOrigin {
                    warn!(
                        request_id = envelope.request_id(),
                        "dropping message with non-page source"
                    );
                    continue;
                }

                match envelope.payload {
                    Payload::ReadinessCheck { request_id } => {
                        let _ = to_page
                            .send(Envelope::readiness_confirmed(request_id))
                            .await;
                    }
                    Payload::WalletRequest {
                        request_id,
                        request_info,
                    } => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        let forwarded = to_background
                            .send(RelayedRequest {
                                envelope: Envelope::wallet_request(request_id, request_info),
                                reply_tx,
                            })
                            .await;

                        if forwarded.is_err() {
                            let _ = to_page
                                .send(Envelope::wallet_error(
                                    request_id,
                                    ProviderError::misconfigured(
                                        "background service unavailable",
                                    ),
                                    Timestamp::now().as_millis(),
                                ))
                                .await;
                            continue;
                        }

                        // Await the background reply off the main loop so a
                        // long-lived approval does not stall other requests.
                        let to_page = to_page.clone();
                        tokio::spawn(async move {
                            match reply_rx.await {
                                Ok(response) => {
                                    let _ = to_page.send(response).await;
                                }
                                Err(_) => {
                                    let _ = to_page
                                        .send(Envelope::wallet_error(
                                            request_id,
                                            ProviderError::misconfigured(
                                                "background dropped the request",
                                            ),
                                            Timestamp::now().as_millis(),
                                        ))
                                        .await;
                                }
                            }
                        });
                    }
                    other => {
                        debug!(?other, "ignoring non-request payload from page");
                    }
                }
            }
            debug!("page channel closed, relay exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_messages::RequestInfo;
    use keybridge_types::{codes, ChainFamily};

    fn request_envelope(id: u64) -> Envelope {
        Envelope::wallet_request(
            id,
            RequestInfo {
                id,
                method: "eth_accounts".into(),
                params: vec![],
                chain: ChainFamily::Ethereum,
                site_url: "https://dapp.example".into(),
                script_source: "keybridge".into(),
                version: "1.0.0".into(),
                request_time: Timestamp::now(),
                referrer: None,
                href: None,
                user_agent: "test".into(),
                platform: "linux".into(),
                language: "en-US".into(),
            },
        )
    }

    fn wire() -> (
        mpsc::Sender<Envelope>,
        mpsc::Receiver<Envelope>,
        mpsc::Receiver<RelayedRequest>,
    ) {
        let (page_tx, from_page) = mpsc::channel(8);
        let (to_page, page_rx) = mpsc::channel(8);
        let (to_background, background_rx) = mpsc::channel(8);
        Relay::spawn(from_page, to_page, to_background);
        (page_tx, page_rx, background_rx)
    }

    #[tokio::test]
    async fn forwards_request_and_relays_reply() {
        let (page_tx, mut page_rx, mut background_rx) = wire();

        page_tx.send(request_envelope(5)).await.unwrap();
        let relayed = background_rx.recv().await.unwrap();
        assert_eq!(relayed.envelope.request_id(), 5);

        relayed
            .reply_tx
            .send(Envelope::wallet_result(5, serde_json::json!(["0xabc"]), 1))
            .unwrap();

        let back = page_rx.recv().await.unwrap();
        assert_eq!(back.request_id(), 5);
        assert_eq!(back.source, MessageSource::RelayOrigin);
    }

    #[tokio::test]
    async fn answers_readiness_checks_itself() {
        let (page_tx, mut page_rx, mut background_rx) = wire();

        page_tx.send(Envelope::readiness_check(1)).await.unwrap();
        let back = page_rx.recv().await.unwrap();
        assert!(matches!(
            back.payload,
            Payload::ReadinessConfirmed { request_id: 1 }
        ));
        // Nothing reached the background.
        assert!(background_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drops_messages_with_spoofed_source() {
        let (page_tx, mut page_rx, mut background_rx) = wire();

        let mut spoofed = request_envelope(9);
        spoofed.source = MessageSource::RelayOrigin;
        page_tx.send(spoofed).await.unwrap();

        // A legitimate readiness check after it proves the loop is alive
        // and nothing was forwarded for the spoofed request.
        page_tx.send(Envelope::readiness_check(2)).await.unwrap();
        let back = page_rx.recv().await.unwrap();
        assert!(matches!(
            back.payload,
            Payload::ReadinessConfirmed { request_id: 2 }
        ));
        assert!(background_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn background_unavailable_produces_structured_error() {
        let (page_tx, from_page) = mpsc::channel(8);
        let (to_page, mut page_rx) = mpsc::channel(8);
        let (to_background, background_rx) = mpsc::channel(8);
        drop(background_rx);
        Relay::spawn(from_page, to_page, to_background);

        page_tx.send(request_envelope(3)).await.unwrap();
        let back = page_rx.recv().await.unwrap();
        match back.payload {
            Payload::WalletResponse {
                request_id, error, ..
            } => {
                assert_eq!(request_id, 3);
                assert_eq!(error.unwrap().code, codes::PROVIDER_MISCONFIGURED);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
