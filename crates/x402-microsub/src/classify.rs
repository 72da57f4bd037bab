//! Maps failure signals onto the microsub error taxonomy.
//!
//! The result decides whether a failed request should fall back from
//! "use microsub" to "sign a fresh payment", and which message the payer sees.

use serde::{Deserialize, Serialize};

use crate::X402Error;

/// Why a microsub can no longer be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrosubErrorKind {
    Expired,
    Exhausted,
    Invalid,
}

impl MicrosubErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MicrosubErrorKind::Expired => "expired",
            MicrosubErrorKind::Exhausted => "exhausted",
            MicrosubErrorKind::Invalid => "invalid",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            MicrosubErrorKind::Expired => {
                "Your subscription has expired. Please make a new payment to continue."
            }
            MicrosubErrorKind::Exhausted => {
                "Your subscription has no queries remaining. Please make a new payment to continue."
            }
            MicrosubErrorKind::Invalid => {
                "Your subscription is no longer valid. Please make a new payment to continue."
            }
        }
    }

    pub fn into_error(self) -> X402Error {
        match self {
            MicrosubErrorKind::Expired => X402Error::MicrosubExpired,
            MicrosubErrorKind::Exhausted => X402Error::MicrosubExhausted,
            MicrosubErrorKind::Invalid => X402Error::MicrosubInvalid,
        }
    }
}

impl std::fmt::Display for MicrosubErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an arbitrary failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Microsub(MicrosubErrorKind),
    NotMicrosubRelated,
}

impl FailureClass {
    pub fn kind(&self) -> Option<MicrosubErrorKind> {
        match self {
            FailureClass::Microsub(k) => Some(*k),
            FailureClass::NotMicrosubRelated => None,
        }
    }
}

/// Result shape of [`is_microsub_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrosubErrorCheck {
    pub is_microsub_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<MicrosubErrorKind>,
}

/// Classify a failure message. Case-insensitive; first matching rule wins.
pub fn classify_message(message: &str) -> FailureClass {
    let msg = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    let kind = if has(&["expired", "expiration"]) {
        MicrosubErrorKind::Expired
    } else if has(&["exhausted", "no queries remaining"]) {
        MicrosubErrorKind::Exhausted
    } else if has(&["409", "conflict"]) {
        MicrosubErrorKind::Exhausted
    } else if has(&["invalid", "not found"]) {
        MicrosubErrorKind::Invalid
    } else if has(&["microsub", "subscription"]) {
        MicrosubErrorKind::Invalid
    } else {
        return FailureClass::NotMicrosubRelated;
    };
    FailureClass::Microsub(kind)
}

/// Classify an HTTP failure from its status code and response body.
pub fn classify_status(status: u16, body: &str) -> FailureClass {
    classify_message(&format!("{status} {body}"))
}

/// Classify an error using its message and every `source()` below it.
pub fn classify_error(err: &(dyn std::error::Error + 'static)) -> FailureClass {
    if let Some(x) = err.downcast_ref::<X402Error>() {
        if let Some(kind) = x.microsub_kind() {
            return FailureClass::Microsub(kind);
        }
    }

    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        text.push_str(": ");
        text.push_str(&s.to_string());
        source = s.source();
    }
    classify_message(&text)
}

/// Message-based check returning `{is_microsub_error, error_type}`.
pub fn is_microsub_error(message: &str) -> MicrosubErrorCheck {
    let class = classify_message(message);
    MicrosubErrorCheck {
        is_microsub_error: class.kind().is_some(),
        error_type: class.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_exhausted() {
        assert_eq!(
            is_microsub_error("409 Conflict"),
            MicrosubErrorCheck {
                is_microsub_error: true,
                error_type: Some(MicrosubErrorKind::Exhausted),
            }
        );
    }

    #[test]
    fn subscription_expired() {
        assert_eq!(
            is_microsub_error("subscription expired").error_type,
            Some(MicrosubErrorKind::Expired)
        );
    }

    #[test]
    fn unrelated_failure() {
        assert_eq!(
            is_microsub_error("random failure"),
            MicrosubErrorCheck {
                is_microsub_error: false,
                error_type: None,
            }
        );
    }

    #[test]
    fn rule_order_prefers_expired() {
        // "invalid" and "expired" both present: expiry rule comes first.
        assert_eq!(
            classify_message("Invalid microsub: expired at 12:00"),
            FailureClass::Microsub(MicrosubErrorKind::Expired)
        );
        assert_eq!(
            classify_message("EXHAUSTED but also not found"),
            FailureClass::Microsub(MicrosubErrorKind::Exhausted)
        );
    }

    #[test]
    fn remaining_rules() {
        assert_eq!(
            classify_message("No queries remaining on this credit").kind(),
            Some(MicrosubErrorKind::Exhausted)
        );
        assert_eq!(
            classify_message("tx_hash not found").kind(),
            Some(MicrosubErrorKind::Invalid)
        );
        assert_eq!(
            classify_message("microsub lookup failed").kind(),
            Some(MicrosubErrorKind::Invalid)
        );
        assert_eq!(
            classify_message("token expiration reached").kind(),
            Some(MicrosubErrorKind::Expired)
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            classify_status(409, "").kind(),
            Some(MicrosubErrorKind::Exhausted)
        );
        assert_eq!(
            classify_status(404, "Not Found").kind(),
            Some(MicrosubErrorKind::Invalid)
        );
        assert_eq!(classify_status(502, "bad gateway").kind(), None);
    }

    #[test]
    fn typed_errors_classify_directly() {
        assert_eq!(
            classify_error(&X402Error::MicrosubExhausted).kind(),
            Some(MicrosubErrorKind::Exhausted)
        );
        assert_eq!(
            classify_error(&X402Error::NetworkFailure("subscription expired".into())).kind(),
            Some(MicrosubErrorKind::Expired)
        );
        assert_eq!(classify_error(&X402Error::Timeout).kind(), None);
    }

    #[test]
    fn kinds_round_trip_through_errors() {
        for kind in [
            MicrosubErrorKind::Expired,
            MicrosubErrorKind::Exhausted,
            MicrosubErrorKind::Invalid,
        ] {
            assert_eq!(kind.into_error().microsub_kind(), Some(kind));
        }
    }
}
