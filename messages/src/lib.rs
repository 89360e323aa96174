//! Message types for KeyBridge cross-context communication.
//!
//! Every hop (page ↔ relay ↔ background) carries the same envelope shape;
//! only the `source` tag and the payload variant change. Correlation is by
//! `request_id` alone — delivery order across concurrent requests is not
//! guaranteed and not relied upon.

use serde::{Deserialize, Serialize};

use keybridge_types::{ChainFamily, EventId, ProviderError, RequestMetadata, Timestamp};

/// Which context emitted a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSource {
    #[serde(rename = "page-origin")]
    PageOrigin,
    #[serde(rename = "relay-origin")]
    RelayOrigin,
}

/// The envelope present on every cross-context message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: MessageSource,
    #[serde(flatten)]
    pub payload: Payload,
}

/// All payload variants in the protocol, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// An outbound wallet call from the page bridge.
    WalletRequest {
        request_id: u64,
        request_info: RequestInfo,
    },
    /// The correlated response for a wallet call.
    WalletResponse {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProviderError>,
        /// Milliseconds since epoch, stamped by the responder.
        timestamp: u64,
    },
    /// Page-bridge probe: is the relay alive?
    ReadinessCheck { request_id: u64 },
    /// Relay acknowledgement for a readiness check.
    ReadinessConfirmed { request_id: u64 },
}

impl Envelope {
    /// Build a wallet request envelope originating from the page.
    pub fn wallet_request(request_id: u64, request_info: RequestInfo) -> Self {
        Self {
            source: MessageSource::PageOrigin,
            payload: Payload::WalletRequest {
                request_id,
                request_info,
            },
        }
    }

    /// Build a success response envelope originating from the relay.
    pub fn wallet_result(request_id: u64, result: serde_json::Value, now_ms: u64) -> Self {
        Self {
            source: MessageSource::RelayOrigin,
            payload: Payload::WalletResponse {
                request_id,
                result: Some(result),
                error: None,
                timestamp: now_ms,
            },
        }
    }

    /// Build an error response envelope originating from the relay.
    pub fn wallet_error(request_id: u64, error: ProviderError, now_ms: u64) -> Self {
        Self {
            source: MessageSource::RelayOrigin,
            payload: Payload::WalletResponse {
                request_id,
                result: None,
                error: Some(error),
                timestamp: now_ms,
            },
        }
    }

    pub fn readiness_check(request_id: u64) -> Self {
        Self {
            source: MessageSource::PageOrigin,
            payload: Payload::ReadinessCheck { request_id },
        }
    }

    pub fn readiness_confirmed(request_id: u64) -> Self {
        Self {
            source: MessageSource::RelayOrigin,
            payload: Payload::ReadinessConfirmed { request_id },
        }
    }

    /// The correlation id carried by any payload variant.
    pub fn request_id(&self) -> u64 {
        match self.payload {
            Payload::WalletRequest { request_id, .. }
            | Payload::WalletResponse { request_id, .. }
            | Payload::ReadinessCheck { request_id }
            | Payload::ReadinessConfirmed { request_id } => request_id,
        }
    }
}

/// Full request description relayed to the background router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Mirrors the envelope correlation id.
    pub id: u64,
    pub method: String,
    pub params: Vec<serde_json::Value>,
    pub chain: ChainFamily,
    pub site_url: String,
    /// Which injected script produced this request.
    pub script_source: String,
    pub version: String,
    pub request_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
}

impl RequestInfo {
    /// Extract the audit metadata stored on request records.
    pub fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            site_url: self.site_url.clone(),
            referrer: self.referrer.clone(),
            href: self.href.clone(),
            user_agent: self.user_agent.clone(),
            platform: self.platform.clone(),
            language: self.language.clone(),
            bridge_version: self.version.clone(),
        }
    }
}

// ── Approval decisions ──────────────────────────────────────────────────

/// A user decision arriving from the approval surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub event_id: EventId,
    pub decision: Decision,
}

/// The possible decision outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
    /// The approval surface was closed without an explicit choice.
    /// Treated as a rejection by the gate.
    Closed,
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

// ── Provider discovery ──────────────────────────────────────────────────

/// Stable identity announced to pages using multi-wallet discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Stable UUID for this provider build.
    pub uuid: String,
    /// Display name shown by wallet pickers.
    pub name: String,
    /// Data-URI icon.
    pub icon: String,
    /// Reverse-DNS identifier.
    pub rdns: String,
}

/// Broadcast announcing this provider to discovery listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryAnnouncement {
    pub info: ProviderMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_types::codes;

    #[test]
    fn wallet_request_wire_shape() {
        let info = RequestInfo {
            id: 7,
            method: "eth_accounts".into(),
            params: vec![],
            chain: ChainFamily::Ethereum,
            site_url: "https://app.example".into(),
            script_source: "keybridge".into(),
            version: "1.0.0".into(),
            request_time: Timestamp::from_millis(0),
            referrer: None,
            href: None,
            user_agent: "test".into(),
            platform: "linux".into(),
            language: "en-US".into(),
        };
        let json = serde_json::to_value(Envelope::wallet_request(7, info)).unwrap();
        assert_eq!(json["source"], "page-origin");
        assert_eq!(json["type"], "WALLET_REQUEST");
        assert_eq!(json["request_id"], 7);
        assert_eq!(json["request_info"]["chain"], "ethereum");
    }

    #[test]
    fn response_round_trip() {
        let env = Envelope::wallet_error(3, ProviderError::user_rejected(), 1234);
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id(), 3);
        match back.payload {
            Payload::WalletResponse { error: Some(e), result: None, .. } => {
                assert_eq!(e.code, codes::UNSUPPORTED);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn readiness_types_tag_correctly() {
        let json = serde_json::to_value(Envelope::readiness_check(1)).unwrap();
        assert_eq!(json["type"], "READINESS_CHECK");
        let json = serde_json::to_value(Envelope::readiness_confirmed(1)).unwrap();
        assert_eq!(json["type"], "READINESS_CONFIRMED");
        assert_eq!(json["source"], "relay-origin");
    }

    #[test]
    fn decision_parses_lowercase() {
        let d: Decision = serde_json::from_str("\"accept\"").unwrap();
        assert!(d.is_accept());
        let d: Decision = serde_json::from_str("\"closed\"").unwrap();
        assert!(!d.is_accept());
    }
}
