//! Registry behaviour under wallet switches, plus the microsub-then-payment
//! request flow against a local signer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use x402::{
    decode_payment_header, LocalWalletSigner, PaymentConfig, PaymentHeaderController,
    RequestAuthorization,
};
use x402_client::{
    FetchOutcome, MicrosubErrorKind, MicrosubRegistry, MicrosubSource, ReadyState,
    RegistryOptions, RegistryStatus, X402Error,
};

const W1: &str = "0x1111111111111111111111111111111111111111";
const W2: &str = "0x2222222222222222222222222222222222222222";

/// Per-wallet lists; a wallet with a gate blocks until the gate is opened.
/// Cancellation is deliberately ignored so the registry's own guard is tested.
#[derive(Default)]
struct GatedSource {
    lists: HashMap<String, Vec<Value>>,
    gates: HashMap<String, Arc<Notify>>,
}

impl MicrosubSource for GatedSource {
    async fn fetch_microsubs(
        &self,
        wallet: &str,
        _scope: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Value>, X402Error> {
        if let Some(gate) = self.gates.get(wallet) {
            gate.notified().await;
        }
        Ok(self.lists.get(wallet).cloned().unwrap_or_default())
    }
}

fn credit(tx: &str, valid: bool) -> Value {
    json!({
        "tx_hash": tx,
        "is_valid": valid,
        "is_expired": false,
        "is_exhausted": false,
        "queries_remaining": 10,
        "expires_at": "2099-01-01T00:00:00Z",
        "data_room": { "id": "room-1", "name": "Research" }
    })
}

fn auto_select() -> RegistryOptions {
    RegistryOptions {
        auto_select_valid: true,
        scope: Some("data-room".into()),
    }
}

async fn wait_for_loading<S: MicrosubSource>(reg: &MicrosubRegistry<S>) {
    while reg.snapshot().status != RegistryStatus::Loading {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn wallet_switch_discards_in_flight_fetch() {
    let gate = Arc::new(Notify::new());
    let mut source = GatedSource::default();
    source.lists.insert(W1.into(), vec![credit("0xw1", true)]);
    source.lists.insert(W2.into(), vec![credit("0xw2", true)]);
    source.gates.insert(W1.into(), gate.clone());

    let reg = MicrosubRegistry::new(source, auto_select());
    let first = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.select_wallet(Some(W1.into())).await })
    };
    wait_for_loading(&reg).await;

    let second = reg.select_wallet(Some(W2.into())).await.unwrap();
    assert_eq!(second, FetchOutcome::Applied);

    // Let the first fetch finish after the switch.
    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_ne!(first, FetchOutcome::Applied);

    let snap = reg.snapshot();
    assert_eq!(snap.wallet.as_deref(), Some(W2));
    assert_eq!(snap.microsubs.len(), 1);
    assert_eq!(snap.microsubs[0].tx_hash, "0xw2");
    assert_eq!(snap.selected.unwrap().tx_hash, "0xw2");
}

#[tokio::test]
async fn disconnect_during_fetch_leaves_registry_empty() {
    let gate = Arc::new(Notify::new());
    let mut source = GatedSource::default();
    source.lists.insert(W1.into(), vec![credit("0xw1", true)]);
    source.gates.insert(W1.into(), gate.clone());

    let reg = MicrosubRegistry::new(source, auto_select());
    let pending = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.select_wallet(Some(W1.into())).await })
    };
    wait_for_loading(&reg).await;

    assert_eq!(reg.select_wallet(None).await.unwrap(), FetchOutcome::Idle);
    gate.notify_one();
    assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Cancelled);

    let snap = reg.snapshot();
    assert_eq!(snap.status, RegistryStatus::Empty);
    assert!(snap.microsubs.is_empty());
    assert!(snap.selected.is_none());
}

#[tokio::test]
async fn shutdown_cancels_pending_fetch() {
    let gate = Arc::new(Notify::new());
    let mut source = GatedSource::default();
    source.lists.insert(W1.into(), vec![credit("0xw1", true)]);
    source.gates.insert(W1.into(), gate.clone());

    let reg = MicrosubRegistry::new(source, auto_select());
    let pending = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.select_wallet(Some(W1.into())).await })
    };
    wait_for_loading(&reg).await;

    reg.shutdown();
    assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Cancelled);
    let snap = reg.snapshot();
    assert!(snap.microsubs.is_empty());
    assert_eq!(snap.status, RegistryStatus::Empty);
}

/// A backend that never answers.
struct HangingSource;

impl MicrosubSource for HangingSource {
    async fn fetch_microsubs(
        &self,
        _wallet: &str,
        _scope: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Value>, X402Error> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn dropped_fetch_does_not_stay_loading() {
    let reg = MicrosubRegistry::new(HangingSource, auto_select());
    let mut rx = reg.subscribe();

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), reg.select_wallet(Some(W1.into()))).await;
    assert!(timed_out.is_err());

    let snap = reg.snapshot();
    assert_eq!(snap.status, RegistryStatus::Empty);
    assert_eq!(snap.wallet.as_deref(), Some(W1));
    assert!(!rx.borrow_and_update().is_loading());

    // The wallet is kept, so a later refetch still works against it.
    let timed_out = tokio::time::timeout(Duration::from_millis(50), reg.refetch()).await;
    assert!(timed_out.is_err());
    assert_eq!(reg.snapshot().status, RegistryStatus::Empty);
}

/// Answers once, then never again.
struct AnswersOnce {
    answered: AtomicBool,
}

impl MicrosubSource for AnswersOnce {
    async fn fetch_microsubs(
        &self,
        _wallet: &str,
        _scope: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Value>, X402Error> {
        if self.answered.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(vec![credit("0xaa", true)])
    }
}

#[tokio::test]
async fn dropped_refetch_keeps_loaded_credits() {
    let source = AnswersOnce {
        answered: AtomicBool::new(false),
    };
    let reg = MicrosubRegistry::new(source, auto_select());
    reg.select_wallet(Some(W1.into())).await.unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(50), reg.refetch()).await;
    assert!(timed_out.is_err());

    let snap = reg.snapshot();
    assert_eq!(snap.status, RegistryStatus::Ready(ReadyState::HasValid));
    assert_eq!(snap.selected.unwrap().tx_hash, "0xaa");
}

#[tokio::test]
async fn auto_selects_first_valid_credit() {
    let mut source = GatedSource::default();
    source
        .lists
        .insert(W1.into(), vec![credit("0xbb", false), credit("0xaa", true)]);

    let reg = MicrosubRegistry::new(source, auto_select());
    reg.select_wallet(Some(W1.into())).await.unwrap();

    let selected = reg.selected().unwrap();
    assert_eq!(selected.tx_hash, "0xaa");
    assert_eq!(selected.resource.unwrap().display_name, "Research");
    assert_eq!(selected.wallet_address, W1);
}

#[tokio::test]
async fn same_wallet_refetches_without_clearing_selection() {
    let mut source = GatedSource::default();
    source
        .lists
        .insert(W1.into(), vec![credit("0xaa", true), credit("0xcc", true)]);

    let reg = MicrosubRegistry::new(
        source,
        RegistryOptions {
            auto_select_valid: false,
            scope: None,
        },
    );
    reg.select_wallet(Some(W1.into())).await.unwrap();
    assert!(reg.select_microsub("0xcc"));

    reg.select_wallet(Some(W1.into())).await.unwrap();
    assert_eq!(reg.selected().unwrap().tx_hash, "0xcc");
}

#[tokio::test]
async fn falls_back_to_signed_payment_after_microsub_failure() {
    let mut source = GatedSource::default();
    source.lists.insert(W1.into(), vec![credit("0xaa", true)]);
    let reg = MicrosubRegistry::new(source, auto_select());
    reg.select_wallet(Some(W1.into())).await.unwrap();

    let config = PaymentConfig {
        recipient_address: Address::repeat_byte(0x42),
        ..PaymentConfig::default()
    };
    let controller = PaymentHeaderController::with_wallet(
        config.clone(),
        LocalWalletSigner::new(PrivateKeySigner::random()),
    );

    let auth = controller
        .authorize_request(reg.selected().as_ref(), None)
        .await
        .unwrap();
    assert_eq!(auth.tx_hash(), Some("0xaa"));

    // Backend answers 409: the credit is used up.
    let failure = x402::classify_status(409, "Conflict");
    assert!(x402::should_fall_back_to_payment(failure));
    reg.record_failure("0xaa", failure.kind().unwrap());
    assert_eq!(
        reg.validate_selected_microsub(|_| {}).reason,
        None::<MicrosubErrorKind>
    );
    assert!(reg.selected().is_none());

    let auth = controller
        .authorize_request(reg.selected().as_ref(), None)
        .await
        .unwrap();
    let RequestAuthorization::Payment(header) = auth else {
        panic!("expected a signed payment");
    };
    let decoded = decode_payment_header(&header.encoded).unwrap();
    assert_eq!(decoded.network, config.network);
    assert_eq!(decoded.payload.authorization.value(), config.default_amount);
    assert_eq!(decoded.payload.authorization.to(), config.recipient_address);
}

#[tokio::test]
async fn loading_is_observable() {
    let gate = Arc::new(Notify::new());
    let mut source = GatedSource::default();
    source.lists.insert(W1.into(), vec![credit("0xaa", true)]);
    source.gates.insert(W1.into(), gate.clone());

    let reg = MicrosubRegistry::new(source, auto_select());
    let mut rx = reg.subscribe();
    let pending = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.select_wallet(Some(W1.into())).await })
    };

    rx.wait_for(|s| s.is_loading()).await.unwrap();
    gate.notify_one();
    let ready = rx
        .wait_for(|s| matches!(s.status, RegistryStatus::Ready(_)))
        .await
        .unwrap()
        .clone();
    assert_eq!(ready.selected.unwrap().tx_hash, "0xaa");
    assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Applied);
}
