//! Payment header controller: decides between an existing microsub credit
//! and a freshly signed payment, and produces the `X-PAYMENT` header.

use alloy::primitives::{Address, U256};
use tokio::sync::watch;

use crate::classify::{classify_message, FailureClass};
use crate::constants::PaymentConfig;
use crate::eip712::build_payment_typed_data;
use crate::header::encode_payment_header;
use crate::microsub::Microsub;
use crate::payment::{PaymentHeader, RequestAuthorization};
use crate::signer::PaymentSigner;
use crate::validation::is_valid_amount;
use crate::X402Error;

/// Observable controller status for UIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub is_loading: bool,
    /// User-facing message of the last failed call, cleared when a new call starts.
    pub error: Option<String>,
    in_flight: usize,
}

/// Decrements the in-flight count even when the signing future is dropped.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<ControllerState>,
}

impl<'a> LoadingGuard<'a> {
    fn start(state: &'a watch::Sender<ControllerState>) -> Self {
        state.send_modify(|s| {
            s.in_flight += 1;
            s.is_loading = true;
            s.error = None;
        });
        Self { state }
    }

    fn fail(&self, err: &X402Error) {
        let message = err.user_message();
        self.state.send_modify(|s| s.error = Some(message));
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            s.is_loading = s.in_flight > 0;
        });
    }
}

/// Builds and signs payment headers for one (optionally connected) wallet.
///
/// No caching: every signed header carries a new nonce. Concurrent calls are
/// not de-duplicated; each one prompts the wallet.
pub struct PaymentHeaderController<S: PaymentSigner> {
    config: PaymentConfig,
    wallet: Option<S>,
    state: watch::Sender<ControllerState>,
}

impl<S: PaymentSigner> PaymentHeaderController<S> {
    /// Create a controller with no wallet connected.
    pub fn new(config: PaymentConfig) -> Self {
        let (state, _) = watch::channel(ControllerState::default());
        Self {
            config,
            wallet: None,
            state,
        }
    }

    pub fn with_wallet(config: PaymentConfig, wallet: S) -> Self {
        let mut controller = Self::new(config);
        controller.connect(wallet);
        controller
    }

    pub fn connect(&mut self, wallet: S) {
        tracing::info!(address = %wallet.address(), "wallet connected");
        self.wallet = Some(wallet);
    }

    pub fn disconnect(&mut self) -> Option<S> {
        tracing::info!("wallet disconnected");
        self.wallet.take()
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Sign a fresh payment header, or return `None` when `skip_signing` is
    /// set and the request will reference a microsub instead.
    pub async fn build_and_sign_payment_header(
        &self,
        amount: Option<&str>,
        skip_signing: bool,
    ) -> Result<Option<PaymentHeader>, X402Error> {
        if skip_signing {
            tracing::debug!("skipping signing, request will use a microsub");
            return Ok(None);
        }

        let guard = LoadingGuard::start(&self.state);
        match self.sign(amount).await {
            Ok(header) => Ok(Some(header)),
            Err(e) => {
                tracing::warn!(error = %e, "payment header not produced");
                guard.fail(&e);
                Err(e)
            }
        }
    }

    async fn sign(&self, amount: Option<&str>) -> Result<PaymentHeader, X402Error> {
        let wallet = self.wallet.as_ref().ok_or(X402Error::WalletNotConnected)?;

        let amount = amount.unwrap_or(&self.config.default_amount);
        if !is_valid_amount(amount) {
            return Err(X402Error::InvalidPayment(format!(
                "amount must be a positive integer in token units, got '{amount}'"
            )));
        }
        let value = amount
            .parse::<U256>()
            .map_err(|e| X402Error::InvalidPayment(format!("invalid amount '{amount}': {e}")))?;

        if self.config.recipient_address == Address::ZERO {
            return Err(X402Error::ConfigError(
                "recipient address is not configured".to_string(),
            ));
        }

        let typed = build_payment_typed_data(
            self.config.token_address,
            self.config.recipient_address,
            value,
            &self.config.network,
            self.config.chain_id,
            wallet.address(),
            self.config.valid_duration_secs,
        );

        tracing::info!(
            from = %wallet.address(),
            to = %self.config.recipient_address,
            value = %amount,
            network = %self.config.network,
            "requesting payment signature"
        );

        let signature = wallet.sign_typed_data(&typed).await?;
        let encoded = encode_payment_header(&typed.message, &signature, &self.config.network)?;

        Ok(PaymentHeader {
            encoded,
            authorization: typed.message,
            signature,
        })
    }

    /// Choose how to pay for one request.
    ///
    /// A usable selected microsub is referenced by `tx_hash` without signing;
    /// otherwise a fresh payment is signed.
    pub async fn authorize_request(
        &self,
        selection: Option<&Microsub>,
        amount: Option<&str>,
    ) -> Result<RequestAuthorization, X402Error> {
        if let Some(m) = selection.filter(|m| !m.disabled()) {
            tracing::debug!(tx_hash = %m.tx_hash, remaining = m.queries_remaining, "using microsub");
            return Ok(RequestAuthorization::Microsub {
                tx_hash: m.tx_hash.clone(),
            });
        }

        match self.build_and_sign_payment_header(amount, false).await? {
            Some(header) => Ok(RequestAuthorization::Payment(header)),
            None => Err(X402Error::EncodeError(
                "signing produced no payment header".to_string(),
            )),
        }
    }
}

/// Whether a failed microsub-backed request should be retried with a fresh
/// signed payment.
pub fn should_fall_back_to_payment(failure: FailureClass) -> bool {
    matches!(failure, FailureClass::Microsub(_))
}

/// [`should_fall_back_to_payment`] for a raw failure message.
pub fn should_fall_back_after(message: &str) -> bool {
    should_fall_back_to_payment(classify_message(message))
}
