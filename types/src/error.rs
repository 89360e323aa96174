//! The structured provider error.
//!
//! Every error that crosses a context boundary is converted to this shape
//! before it becomes page-observable. Raw internal errors never leak.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed provider error codes.
pub mod codes {
    /// Generic failure, including signing/broadcast failures and timeouts.
    pub const GENERIC_FAILURE: i64 = 4000;
    /// Invalid or missing parameter.
    pub const INVALID_REQUEST: i64 = 4001;
    /// Unsupported method or chain; also covers user rejection (observed
    /// wire behaviour — see DESIGN.md).
    pub const UNSUPPORTED: i64 = 4200;
    /// Provider misconfigured or not connected.
    pub const PROVIDER_MISCONFIGURED: i64 = 4900;
    /// Unrecognized chain in a chain-switch request.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
}

/// The `{code, message, data?}` error shape delivered to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach upstream detail for debugging. Shown to the caller verbatim.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Malformed input at the router or a handler.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    /// Dispatch miss: no handler registered for the chain.
    pub fn unsupported_chain(chain: &str) -> Self {
        Self::new(codes::UNSUPPORTED, format!("unsupported chain: {chain}"))
    }

    /// Dispatch miss: the handler does not implement the method.
    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::UNSUPPORTED, format!("unsupported method: {method}"))
    }

    /// The user declined the request at the approval surface.
    pub fn user_rejected() -> Self {
        Self::new(codes::UNSUPPORTED, "user rejected the request")
    }

    /// A call to an external capability (signing, broadcast, node RPC) failed.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(codes::GENERIC_FAILURE, message)
    }

    /// A page-bridge callback aged out before a response arrived.
    pub fn timeout(method: &str) -> Self {
        Self::new(
            codes::GENERIC_FAILURE,
            format!("request timed out: {method}"),
        )
    }

    /// The provider is not wired to a live relay/background pair.
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::new(codes::PROVIDER_MISCONFIGURED, message)
    }

    /// Chain-switch request named a network this wallet does not know.
    pub fn unrecognized_chain(network: &str) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("unrecognized chain: {network}"),
        )
    }

    /// Wrap an arbitrary internal error into the structured shape.
    ///
    /// Used at every context boundary so raw exceptions never reach the
    /// page side.
    pub fn wrap_internal(err: impl fmt::Display) -> Self {
        Self::new(codes::GENERIC_FAILURE, err.to_string())
    }

    /// Whether this error is the user-rejection outcome.
    pub fn is_user_rejection(&self) -> bool {
        self.code == codes::UNSUPPORTED && self.message.starts_with("user rejected")
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_use_fixed_codes() {
        assert_eq!(ProviderError::invalid_request("x").code, 4001);
        assert_eq!(ProviderError::unsupported_chain("near").code, 4200);
        assert_eq!(ProviderError::user_rejected().code, 4200);
        assert_eq!(ProviderError::upstream("boom").code, 4000);
        assert_eq!(ProviderError::misconfigured("no relay").code, 4900);
        assert_eq!(ProviderError::unrecognized_chain("eip155:999").code, 4902);
    }

    #[test]
    fn data_is_omitted_when_absent() {
        let json = serde_json::to_value(ProviderError::upstream("boom")).unwrap();
        assert!(json.get("data").is_none());

        let with = ProviderError::upstream("boom").with_data(serde_json::json!({"raw": "detail"}));
        let json = serde_json::to_value(with).unwrap();
        assert_eq!(json["data"]["raw"], "detail");
    }

    #[test]
    fn user_rejection_is_detectable() {
        assert!(ProviderError::user_rejected().is_user_rejection());
        assert!(!ProviderError::unsupported_method("eth_mine").is_user_rejection());
    }
}
