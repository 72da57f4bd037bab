use thiserror::Error;

/// Errors returned by x402 payment and microsub operations.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("wallet not connected")]
    WalletNotConnected,

    #[error("signing rejected: {0}")]
    SigningRejected(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("encode error: {0}")]
    EncodeError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("microsub expired")]
    MicrosubExpired,

    #[error("microsub exhausted")]
    MicrosubExhausted,

    #[error("microsub invalid")]
    MicrosubInvalid,

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

impl X402Error {
    /// One human-readable line suitable for showing to the payer.
    pub fn user_message(&self) -> String {
        match self {
            X402Error::WalletNotConnected => "Connect a wallet to pay for this request.".into(),
            X402Error::SigningRejected(_) => {
                "The payment signature was declined. You can try again.".into()
            }
            X402Error::MicrosubExpired
            | X402Error::MicrosubExhausted
            | X402Error::MicrosubInvalid => self
                .microsub_kind()
                .map(|k| k.user_message().to_string())
                .unwrap_or_default(),
            X402Error::NetworkFailure(_) | X402Error::Timeout => {
                "Could not reach the payment service. Please retry.".into()
            }
            other => format!("Payment failed: {other}"),
        }
    }

    /// The microsub failure this error stands for, if any.
    pub fn microsub_kind(&self) -> Option<crate::classify::MicrosubErrorKind> {
        use crate::classify::MicrosubErrorKind;
        match self {
            X402Error::MicrosubExpired => Some(MicrosubErrorKind::Expired),
            X402Error::MicrosubExhausted => Some(MicrosubErrorKind::Exhausted),
            X402Error::MicrosubInvalid => Some(MicrosubErrorKind::Invalid),
            _ => None,
        }
    }

    /// Whether the caller can reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            X402Error::SigningRejected(_)
                | X402Error::NetworkFailure(_)
                | X402Error::Timeout
                | X402Error::WalletNotConnected
        )
    }
}
