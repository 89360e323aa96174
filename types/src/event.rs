//! Request records and their status machine.
//!
//! A record is created by a chain handler when a request needs user
//! approval, advanced by the approval gate, and completed by the handler
//! after broadcast. Status transitions are strictly monotonic:
//! `request → approval → completed`, and a completed record is immutable.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::ChainFamily;
use crate::network::NetworkId;
use crate::time::Timestamp;

/// Globally unique record identifier (32 lowercase hex chars).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Wrap an existing id string (used when replaying stored records).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a request record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting a user decision.
    Request,
    /// Approved; signing/broadcast in progress.
    Approval,
    /// Terminal. The record is immutable from here on.
    Completed,
}

impl RequestStatus {
    /// Whether advancing from `self` to `next` is a legal forward step.
    pub fn can_advance_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Request, Self::Approval) | (Self::Approval, Self::Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Approval => "approval",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Error raised on an illegal status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal status transition: {from} -> {to}")]
    Illegal {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("record is completed and immutable")]
    Immutable,
}

/// Origin metadata captured at record creation for audit/display.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub site_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    /// Version of the injected bridge that produced the request.
    pub bridge_version: String,
}

/// A request that requires (or required) user approval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: EventId,
    pub network_id: NetworkId,
    pub chain: ChainFamily,
    /// The requested method name (`transfer`, `personal_sign`, ...).
    #[serde(rename = "type")]
    pub method: String,
    /// Opaque method parameters as supplied by the caller.
    pub request: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_tx: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_tx: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    pub status: RequestStatus,
    /// Creation/last-update time.
    pub timestamp: Timestamp,
    pub metadata: RequestMetadata,
}

impl RequestRecord {
    /// Create a new record in the initial `request` status.
    pub fn new(
        network_id: NetworkId,
        chain: ChainFamily,
        method: impl Into<String>,
        request: serde_json::Value,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            id: EventId::generate(),
            network_id,
            chain,
            method: method.into(),
            request,
            unsigned_tx: None,
            signed_tx: None,
            txid: None,
            status: RequestStatus::Request,
            timestamp: Timestamp::now(),
            metadata,
        }
    }

    /// Advance the status. Fails on any non-forward transition.
    pub fn advance(&mut self, next: RequestStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Immutable);
        }
        if !self.status.can_advance_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.timestamp = Timestamp::now();
        Ok(())
    }

    /// Attach the built unsigned transaction payload.
    pub fn set_unsigned_tx(&mut self, tx: serde_json::Value) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Immutable);
        }
        self.unsigned_tx = Some(tx);
        self.timestamp = Timestamp::now();
        Ok(())
    }

    /// Attach the signed payload produced by the signing capability.
    pub fn set_signed_tx(&mut self, tx: serde_json::Value) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Immutable);
        }
        self.signed_tx = Some(tx);
        self.timestamp = Timestamp::now();
        Ok(())
    }

    /// Attach the broadcast transaction id.
    pub fn set_txid(&mut self, txid: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Immutable);
        }
        self.txid = Some(txid.into());
        self.timestamp = Timestamp::now();
        Ok(())
    }
}
