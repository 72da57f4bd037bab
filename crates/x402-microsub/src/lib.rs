//! x402 payment headers and microsub credits.
//!
//! Pays for HTTP requests with ERC-3009 `TransferWithAuthorization`
//! signatures (EIP-712 typed data) carried in an `X-PAYMENT` header, or with
//! a reference to a pre-paid microsub credit so the wallet is not prompted on
//! every call.
//!
//! # Pieces
//!
//! - **Typed data** ([`eip712`]): domain-separated, signable authorization
//! - **Header codec** ([`header`]): JSON + base64 wire format
//! - **Controller** ([`PaymentHeaderController`]): sign a fresh header or use a microsub
//! - **Classifier** ([`classify`]): maps failures to expired / exhausted / invalid
//!
//! The microsub registry lives in the `x402-microsub-client` crate.
//!
//! # Quick example
//!
//! ```no_run
//! use alloy::signers::local::PrivateKeySigner;
//! use x402::{LocalWalletSigner, PaymentConfig, PaymentHeaderController};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let signer: PrivateKeySigner = "0xYOUR_KEY".parse().unwrap();
//! let config = PaymentConfig::from_env().unwrap();
//! let controller = PaymentHeaderController::with_wallet(config, LocalWalletSigner::new(signer));
//!
//! let header = controller
//!     .build_and_sign_payment_header(Some("10000"), false)
//!     .await
//!     .unwrap();
//! # }
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod payment;
pub mod response;
pub mod validation;

// Protocol
pub mod classify;
pub mod eip712;
pub mod header;
pub mod microsub;

// Client-side orchestration
pub mod controller;
pub mod signer;

use alloy::sol;

// ERC-3009 authorization as hashed by the token contract.
// The sol! macro derives SolStruct which provides eip712_signing_hash().
sol! {
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// Re-exports
pub use classify::{
    classify_error, classify_message, classify_status, is_microsub_error, FailureClass,
    MicrosubErrorCheck, MicrosubErrorKind,
};
pub use constants::*;
pub use controller::{
    should_fall_back_after, should_fall_back_to_payment, ControllerState,
    PaymentHeaderController,
};
pub use eip712::{build_payment_typed_data, get_token_domain, PaymentTypedData, TypedDataDomain};
pub use error::X402Error;
pub use header::{decode_payment_header, encode_payment_header, inspect_payment_header};
pub use microsub::{Microsub, NormalizeError, ResourceRef};
pub use payment::*;
pub use response::PaymentMetadata;
pub use signer::{LocalWalletSigner, PaymentSigner, SignerError};
