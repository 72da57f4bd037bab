//! Signing capability used by the payment controller.
//!
//! A wallet is opaque here: it receives the typed data and either returns a
//! signature or fails. [`LocalWalletSigner`] is the in-process implementation
//! backed by a private key.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::eip712::{encode_signature_hex, PaymentTypedData};
use crate::X402Error;

/// Failure reported by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The user declined the signature request.
    #[error("user rejected the request: {0}")]
    Rejected(String),

    #[error("wallet error: {0}")]
    Wallet(String),
}

impl From<SignerError> for X402Error {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Rejected(msg) => X402Error::SigningRejected(msg),
            SignerError::Wallet(msg) => X402Error::SignatureError(msg),
        }
    }
}

/// A connected wallet able to sign EIP-712 typed data.
pub trait PaymentSigner: Send + Sync {
    /// Address the signatures recover to.
    fn address(&self) -> Address;

    /// Sign the typed data and return a `0x`-prefixed 65-byte hex signature.
    /// May wait on user interaction for an unbounded time.
    fn sign_typed_data(
        &self,
        typed_data: &PaymentTypedData,
    ) -> impl std::future::Future<Output = Result<String, SignerError>> + Send;
}

/// Signs with a local private key. Never prompts, never rejects.
pub struct LocalWalletSigner {
    signer: PrivateKeySigner,
}

impl LocalWalletSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Parse a hex private key (with or without `0x`).
    pub fn from_private_key(key: &str) -> Result<Self, X402Error> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|_| X402Error::ConfigError("invalid private key".to_string()))?;
        Ok(Self::new(signer))
    }
}

impl std::fmt::Debug for LocalWalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWalletSigner")
            .field("address", &self.signer.address())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PaymentSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_typed_data(&self, typed_data: &PaymentTypedData) -> Result<String, SignerError> {
        let hash = typed_data
            .signing_hash()
            .map_err(|e| SignerError::Wallet(e.to_string()))?;
        let sig = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| SignerError::Wallet(format!("signing failed: {e}")))?;
        Ok(encode_signature_hex(&sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BASE_SEPOLIA_CHAIN_ID, USDC_BASE_SEPOLIA};
    use crate::eip712::build_payment_typed_data;
    use alloy::primitives::{Signature, U256};

    #[tokio::test]
    async fn test_local_signature_recovers_to_address() {
        let wallet = LocalWalletSigner::new(PrivateKeySigner::random());
        let typed = build_payment_typed_data(
            USDC_BASE_SEPOLIA,
            Address::repeat_byte(0x22),
            U256::from(500u64),
            "base-sepolia",
            BASE_SEPOLIA_CHAIN_ID,
            wallet.address(),
            120,
        );

        let sig_hex = wallet.sign_typed_data(&typed).await.unwrap();
        assert_eq!(sig_hex.len(), 132);

        let bytes = alloy::hex::decode(sig_hex.strip_prefix("0x").unwrap()).unwrap();
        let sig = Signature::from_raw(&bytes).unwrap();
        let recovered = sig
            .recover_address_from_prehash(&typed.signing_hash().unwrap())
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn test_debug_redacts_key() {
        let wallet = LocalWalletSigner::new(PrivateKeySigner::random());
        let dbg = format!("{wallet:?}");
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn test_rejects_malformed_key() {
        assert!(matches!(
            LocalWalletSigner::from_private_key("0xnothex"),
            Err(X402Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_signer_errors_map_to_taxonomy() {
        assert!(matches!(
            X402Error::from(SignerError::Rejected("denied".into())),
            X402Error::SigningRejected(_)
        ));
        assert!(matches!(
            X402Error::from(SignerError::Wallet("locked".into())),
            X402Error::SignatureError(_)
        ));
    }
}
