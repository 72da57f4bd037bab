//! Microsub credit records and normalization of loosely-typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::MicrosubErrorKind;

/// What a microsub pays for, e.g. a data room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    /// `name`, else `username`, else `id`.
    pub display_name: String,
}

/// A reusable, pre-paid credit grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Microsub {
    /// Settlement transaction that created the credit; unique id.
    pub tx_hash: String,
    pub is_valid: bool,
    pub is_expired: bool,
    pub is_exhausted: bool,
    pub queries_remaining: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub wallet_address: String,
    pub resource: Option<ResourceRef>,
}

impl Microsub {
    pub fn disabled(&self) -> bool {
        self.is_expired || self.is_exhausted || !self.is_valid
    }

    /// Why the credit is unusable. Precedence: expired > exhausted > invalid.
    pub fn unusable_reason(&self) -> Option<MicrosubErrorKind> {
        if self.is_expired {
            Some(MicrosubErrorKind::Expired)
        } else if self.is_exhausted {
            Some(MicrosubErrorKind::Exhausted)
        } else if !self.is_valid {
            Some(MicrosubErrorKind::Invalid)
        } else {
            None
        }
    }

    /// Apply a classified failure locally. Server flags are refreshed on the next fetch.
    pub fn mark_unusable(&mut self, kind: MicrosubErrorKind) {
        match kind {
            MicrosubErrorKind::Expired => self.is_expired = true,
            MicrosubErrorKind::Exhausted => {
                self.is_exhausted = true;
                self.queries_remaining = 0;
            }
            MicrosubErrorKind::Invalid => self.is_valid = false,
        }
    }
}

/// Why a raw record could not be turned into a [`Microsub`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` has an unexpected type")]
    WrongType(&'static str),
}

/// Response body of the microsub list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MicrosubListResponse {
    #[serde(default)]
    pub microsubs: Vec<Value>,
}

/// Map one loosely-typed record into a [`Microsub`].
///
/// `tx_hash` is required. Flags default to the safe side: a missing
/// `is_valid` reads as invalid, missing `is_expired`/`is_exhausted` as false.
/// `wallet_address` falls back to `fallback_wallet` when absent.
pub fn normalize_microsub(raw: &Value, fallback_wallet: &str) -> Result<Microsub, NormalizeError> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

    let tx_hash = match obj.get("tx_hash") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return Err(NormalizeError::MissingField("tx_hash"))
        }
        Some(_) => return Err(NormalizeError::WrongType("tx_hash")),
    };

    let flag = |key: &'static str, default: bool| -> Result<bool, NormalizeError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(NormalizeError::WrongType(key)),
        }
    };

    let queries_remaining = match obj.get("queries_remaining") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or(NormalizeError::WrongType("queries_remaining"))?,
        Some(_) => return Err(NormalizeError::WrongType("queries_remaining")),
    };

    let expires_at = match obj.get("expires_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            s.parse::<DateTime<Utc>>()
                .map_err(|_| NormalizeError::WrongType("expires_at"))?,
        ),
        Some(Value::Number(n)) => {
            let secs = n.as_i64().ok_or(NormalizeError::WrongType("expires_at"))?;
            Some(DateTime::from_timestamp(secs, 0).ok_or(NormalizeError::WrongType("expires_at"))?)
        }
        Some(_) => return Err(NormalizeError::WrongType("expires_at")),
    };

    let wallet_address = obj
        .get("wallet_address")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_wallet)
        .to_string();

    let resource = match obj.get("resource").or_else(|| obj.get("data_room")) {
        None | Some(Value::Null) => None,
        Some(r) => Some(normalize_resource(r)?),
    };

    Ok(Microsub {
        tx_hash,
        is_valid: flag("is_valid", false)?,
        is_expired: flag("is_expired", false)?,
        is_exhausted: flag("is_exhausted", false)?,
        queries_remaining,
        expires_at,
        wallet_address,
        resource,
    })
}

/// Map a resource object, resolving its display name name → username → id.
pub fn normalize_resource(raw: &Value) -> Result<ResourceRef, NormalizeError> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
    let text = |key: &str| -> Option<String> {
        match obj.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let id = text("id").ok_or(NormalizeError::MissingField("id"))?;
    let display_name = text("name")
        .or_else(|| text("username"))
        .unwrap_or_else(|| id.clone());

    Ok(ResourceRef { id, display_name })
}

/// Normalize a whole list, skipping (and logging) records that fail.
pub fn normalize_microsub_list(raw: &[Value], wallet: &str) -> Vec<Microsub> {
    raw.iter()
        .enumerate()
        .filter_map(|(i, r)| match normalize_microsub(r, wallet) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(index = i, wallet = %wallet, error = %e, "skipping microsub record");
                None
            }
        })
        .collect()
}
