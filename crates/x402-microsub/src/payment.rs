use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// ERC-3009 transfer authorization as carried on the wire.
///
/// Amounts and timestamps are decimal strings. Fields are private so an
/// authorization cannot be altered after it is built or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    from: Address,
    to: Address,
    value: String,
    valid_after: String,
    valid_before: String,
    nonce: B256,
}

impl TransferAuthorization {
    pub fn new(
        from: Address,
        to: Address,
        value: impl Into<String>,
        valid_after: u64,
        valid_before: u64,
        nonce: B256,
    ) -> Self {
        Self {
            from,
            to,
            value: value.into(),
            valid_after: valid_after.to_string(),
            valid_before: valid_before.to_string(),
            nonce,
        }
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn valid_after(&self) -> &str {
        &self.valid_after
    }

    pub fn valid_before(&self) -> &str {
        &self.valid_before
    }

    pub fn nonce(&self) -> B256 {
        self.nonce
    }

    /// `(validAfter, validBefore)` as integers, if both parse.
    pub fn validity_window(&self) -> Option<(u64, u64)> {
        let after = self.valid_after.parse().ok()?;
        let before = self.valid_before.parse().ok()?;
        Some((after, before))
    }
}

/// Signature and authorization pair for the `exact` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: TransferAuthorization,
}

/// Wire-format payment payload (sent in the `X-PAYMENT` header, base64-encoded JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPayload,
}

/// A freshly signed, encoded payment header plus the authorization behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentHeader {
    /// Base64 value for the `X-PAYMENT` header.
    pub encoded: String,
    pub authorization: TransferAuthorization,
    pub signature: String,
}

/// How a single payment-gated request is paid for. Exactly one of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuthorization {
    /// Consume a credit of an existing microsub.
    Microsub { tx_hash: String },
    /// Pay with a fresh signed authorization.
    Payment(PaymentHeader),
}

impl RequestAuthorization {
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            RequestAuthorization::Microsub { tx_hash } => Some(tx_hash),
            RequestAuthorization::Payment(_) => None,
        }
    }

    pub fn payment_header(&self) -> Option<&str> {
        match self {
            RequestAuthorization::Microsub { .. } => None,
            RequestAuthorization::Payment(h) => Some(&h.encoded),
        }
    }

    /// JSON body fragment for proxies that take the authorization in the body:
    /// `{"payment_header": ...}` or `{"tx_hash": ...}`.
    pub fn to_body_fields(&self) -> serde_json::Value {
        match self {
            RequestAuthorization::Microsub { tx_hash } => {
                serde_json::json!({ "tx_hash": tx_hash })
            }
            RequestAuthorization::Payment(h) => {
                serde_json::json!({ "payment_header": h.encoded })
            }
        }
    }
}
