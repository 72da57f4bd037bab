use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification/settlement result the backend attaches to a paid response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub settled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<String>,
    /// Settlement transaction hash; also the id of a microsub created by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_error: Option<String>,
    #[serde(default)]
    pub microsub_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries_remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentMetadata {
    /// Read metadata from a backend JSON body, under `payment` or
    /// `payment_metadata`. Missing or malformed metadata yields `None`.
    pub fn from_response_body(body: &serde_json::Value) -> Option<Self> {
        let raw = body
            .get("payment")
            .or_else(|| body.get("payment_metadata"))?;
        match serde_json::from_value(raw.clone()) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed payment metadata");
                None
            }
        }
    }

    /// Settled with an error reported by the facilitator.
    pub fn settlement_failed(&self) -> bool {
        self.settlement_error.is_some()
    }
}
