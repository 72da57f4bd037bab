//! Client side of x402 microsub payments.
//!
//! [`MicrosubRegistry`] keeps the current wallet's pre-paid credits and the
//! user's selection, safe against wallet switches that race an in-flight
//! fetch. [`HttpMicrosubSource`] loads credits from a backend, and the
//! request helpers put the resulting authorization on outgoing requests.
//!
//! # Quick example
//!
//! ```no_run
//! use x402_client::{HttpMicrosubSource, MicrosubRegistry, RegistryOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = HttpMicrosubSource::new("https://api.example.com").unwrap();
//! let registry = MicrosubRegistry::new(
//!     source,
//!     RegistryOptions { auto_select_valid: true, scope: None },
//! );
//!
//! registry
//!     .select_wallet(Some("0x1234567890123456789012345678901234567890".into()))
//!     .await
//!     .unwrap();
//!
//! if let Some(m) = registry.selected() {
//!     println!("using credit {} ({} left)", m.tx_hash, m.queries_remaining);
//! }
//! # }
//! ```

mod http_client;
pub mod registry;

pub use http_client::{
    attach_authorization, extract_payment_metadata, payment_request_body, HttpMicrosubSource,
};
pub use registry::{
    FetchOutcome, MicrosubRegistry, MicrosubSource, ReadyState, RegistryOptions, RegistrySnapshot,
    RegistryStatus, SelectionValidity,
};

// Re-export commonly needed types from core
pub use x402::{
    Microsub, MicrosubErrorKind, PaymentMetadata, RequestAuthorization, X402Error,
    MICROSUB_HEADER, PAYMENT_HEADER,
};
