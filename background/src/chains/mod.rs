//! Chain-family handlers.
//!
//! One handler per family, all implementing the common verb set. Shared
//! parameter parsing and the approve → sign → complete record flow live
//! here; the transaction-building algorithms are chain-specific.

pub mod cosmos;
pub mod ethereum;
pub mod ripple;
pub mod utxo;

pub use cosmos::CosmosHandler;
pub use ethereum::EthereumHandler;
pub use ripple::RippleHandler;
pub use utxo::UtxoHandler;

use keybridge_messages::RequestInfo;
use keybridge_sdk::SdkError;
use keybridge_store::{Queue, StoreError};
use keybridge_types::{ProviderError, RequestRecord, RequestStatus};

use crate::handler::HandlerContext;

// ── Parameter parsing ───────────────────────────────────────────────────

/// The first params element, which transfer-style verbs require to be an
/// object.
pub(crate) fn param_object(
    info: &RequestInfo,
) -> Result<&serde_json::Map<String, serde_json::Value>, ProviderError> {
    info.params
        .first()
        .and_then(|v| v.as_object())
        .ok_or_else(|| ProviderError::invalid_request("expected a parameter object"))
}

pub(crate) fn require_str<'a>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str, ProviderError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::invalid_request(format!("missing required field: {key}")))
}

/// Accepts a JSON number, a decimal string, or a 0x-hex string.
pub(crate) fn parse_u64_value(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => parse_u64_str(s),
        _ => None,
    }
}

pub(crate) fn parse_u64_str(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

pub(crate) fn parse_u128_value(v: &serde_json::Value) -> Option<u128> {
    match v {
        serde_json::Value::Number(n) => n.as_u128(),
        serde_json::Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                u128::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

/// Parse a display-unit decimal amount (e.g. `"1.25"`) into the chain's
/// smallest unit with `decimals` fractional digits. Excess fractional
/// digits are rejected rather than silently truncated.
pub(crate) fn parse_decimal_to_base(v: &serde_json::Value, decimals: u32) -> Option<u128> {
    let text = match v {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > decimals as usize {
        return None;
    }

    let scale = 10u128.checked_pow(decimals)?;
    let whole_units: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let padded: u128 = frac.parse().ok()?;
        padded * 10u128.checked_pow(decimals - frac.len() as u32)?
    };
    whole_units
        .checked_mul(scale)?
        .checked_add(frac_units)
}

// ── Error mapping ───────────────────────────────────────────────────────

/// Upstream-capability failures keep their detail in `data`, never as a
/// raw exception.
pub(crate) fn sdk_err(e: SdkError) -> ProviderError {
    ProviderError::upstream("wallet capability call failed")
        .with_data(serde_json::json!({ "upstream": e.to_string() }))
}

pub(crate) fn store_err(e: StoreError) -> ProviderError {
    ProviderError::upstream(format!("event store failure: {e}"))
}

// ── Shared approval flow ────────────────────────────────────────────────

/// Persist the freshly built record, block on the approval gate, and
/// return the re-read (possibly user-updated) record on approval.
pub(crate) async fn require_user_approval(
    ctx: &HandlerContext,
    record: RequestRecord,
) -> Result<RequestRecord, ProviderError> {
    let id = record.id.clone();
    let outcome = ctx.gate.require_approval(record).await?;
    if !outcome.success {
        return Err(ProviderError::user_rejected());
    }
    ctx.store
        .get_by_id(Queue::AwaitingApproval, &id)
        .map_err(store_err)
}

/// Attach the signed payload (and transaction id, when the verb
/// broadcasts) and move the record to the completed queue.
pub(crate) fn complete_record(
    ctx: &HandlerContext,
    mut record: RequestRecord,
    signed: serde_json::Value,
    txid: Option<&str>,
) -> Result<(), ProviderError> {
    record
        .set_signed_tx(signed)
        .map_err(|e| ProviderError::upstream(e.to_string()))?;
    if let Some(txid) = txid {
        record
            .set_txid(txid)
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
    }
    ctx.store
        .update_by_id(Queue::AwaitingApproval, &record.id, &record)
        .map_err(store_err)?;

    record
        .advance(RequestStatus::Completed)
        .map_err(|e| ProviderError::upstream(e.to_string()))?;
    ctx.store
        .move_record(Queue::AwaitingApproval, Queue::Completed, &record)
        .map_err(store_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_values_parse_from_all_encodings() {
        assert_eq!(parse_u64_value(&serde_json::json!(42)), Some(42));
        assert_eq!(parse_u64_value(&serde_json::json!("42")), Some(42));
        assert_eq!(parse_u64_value(&serde_json::json!("0x2a")), Some(42));
        assert_eq!(parse_u64_value(&serde_json::json!(-1)), None);
        assert_eq!(parse_u64_value(&serde_json::json!([42])), None);
    }

    #[test]
    fn decimal_amounts_scale_to_base_units() {
        assert_eq!(
            parse_decimal_to_base(&serde_json::json!("1.25"), 6),
            Some(1_250_000)
        );
        assert_eq!(
            parse_decimal_to_base(&serde_json::json!("0.000001"), 6),
            Some(1)
        );
        assert_eq!(parse_decimal_to_base(&serde_json::json!(3), 6), Some(3_000_000));
        // More fractional digits than the chain supports.
        assert_eq!(parse_decimal_to_base(&serde_json::json!("0.0000001"), 6), None);
        assert_eq!(parse_decimal_to_base(&serde_json::json!("abc"), 6), None);
    }
}
