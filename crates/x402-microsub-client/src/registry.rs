//! Client-side cache of microsub credits for one wallet at a time.
//!
//! States: `Empty → Loading → Ready(HasValid | AllDisabled)`, plus `Error`.
//! Every fetch is tied to a generation number, the wallet it was started
//! for, and a [`CancellationToken`]; a result is committed only if all three
//! still match and the registry has not been shut down. Switching wallets
//! therefore always wins over a fetch started for the previous one.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use x402::microsub::normalize_microsub_list;
use x402::{Microsub, MicrosubErrorKind, PaymentMetadata, X402Error};

/// Remote list of credits for a wallet.
pub trait MicrosubSource: Send + Sync + 'static {
    /// Fetch raw credit records. Implementations should stop work when
    /// `cancel` fires; the registry stops waiting either way.
    fn fetch_microsubs(
        &self,
        wallet: &str,
        scope: Option<&str>,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, X402Error>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Select the first usable credit after each successful fetch.
    pub auto_select_valid: bool,
    /// Only fetch credits of this kind, e.g. `data-room`.
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    HasValid,
    AllDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryStatus {
    Empty,
    Loading,
    Ready(ReadyState),
    Error,
}

/// Point-in-time view of the registry, also published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub wallet: Option<String>,
    pub status: RegistryStatus,
    pub microsubs: Vec<Microsub>,
    pub selected: Option<Microsub>,
    pub error: Option<String>,
}

impl RegistrySnapshot {
    pub fn is_loading(&self) -> bool {
        self.status == RegistryStatus::Loading
    }

    /// Credits that are neither expired, exhausted nor invalid.
    pub fn valid_microsubs(&self) -> Vec<Microsub> {
        self.microsubs
            .iter()
            .filter(|m| !m.disabled())
            .cloned()
            .collect()
    }
}

/// Result of [`MicrosubRegistry::validate_selected_microsub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionValidity {
    pub is_valid: bool,
    pub reason: Option<MicrosubErrorKind>,
}

/// What happened to a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Result committed to the registry.
    Applied,
    /// Finished, but the wallet changed or the registry shut down meanwhile.
    Stale,
    /// Aborted through its cancellation token.
    Cancelled,
    /// No wallet set; nothing to fetch.
    Idle,
}

struct Inner {
    wallet: Option<String>,
    status: RegistryStatus,
    microsubs: Vec<Microsub>,
    selected: Option<String>,
    error: Option<String>,
    generation: u64,
    cancel: Option<CancellationToken>,
    alive: bool,
}

impl Inner {
    fn selected_microsub(&self) -> Option<&Microsub> {
        let tx = self.selected.as_deref()?;
        self.microsubs.iter().find(|m| m.tx_hash == tx)
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            wallet: self.wallet.clone(),
            status: self.status,
            microsubs: self.microsubs.clone(),
            selected: self.selected_microsub().cloned(),
            error: self.error.clone(),
        }
    }

    fn ready_state(&self) -> ReadyState {
        if self.microsubs.iter().any(|m| !m.disabled()) {
            ReadyState::HasValid
        } else {
            ReadyState::AllDisabled
        }
    }

    /// Drop a selection that no longer points at a usable credit, then
    /// auto-select if configured.
    fn reconcile_selection(&mut self, auto_select: bool) {
        if self.selected_microsub().is_some_and(|m| m.disabled())
            || (self.selected.is_some() && self.selected_microsub().is_none())
        {
            self.selected = None;
        }
        if self.selected.is_none() && auto_select {
            self.selected = self
                .microsubs
                .iter()
                .find(|m| !m.disabled())
                .map(|m| m.tx_hash.clone());
        }
    }

    fn start_fetch(&mut self) -> (u64, CancellationToken) {
        if let Some(old) = self.cancel.take() {
            old.cancel();
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        self.status = RegistryStatus::Loading;
        (self.generation, token)
    }
}

struct Shared<S> {
    source: S,
    options: RegistryOptions,
    inner: Mutex<Inner>,
    events: watch::Sender<RegistrySnapshot>,
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(i) => i,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
    }
}

/// Restores a non-loading status if a fetch never reaches `commit`.
struct FetchGuard<'a, S: MicrosubSource> {
    registry: &'a MicrosubRegistry<S>,
    generation: u64,
    token: CancellationToken,
    settled: bool,
}

impl<S: MicrosubSource> Drop for FetchGuard<'_, S> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.abandon_fetch(self.generation, &self.token);
        }
    }
}

/// Microsub registry. Cheap to clone; clones share state.
pub struct MicrosubRegistry<S: MicrosubSource> {
    shared: Arc<Shared<S>>,
}

impl<S: MicrosubSource> Clone for MicrosubRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: MicrosubSource> MicrosubRegistry<S> {
    pub fn new(source: S, options: RegistryOptions) -> Self {
        let inner = Inner {
            wallet: None,
            status: RegistryStatus::Empty,
            microsubs: Vec::new(),
            selected: None,
            error: None,
            generation: 0,
            cancel: None,
            alive: true,
        };
        let (events, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                source,
                options,
                inner: Mutex::new(inner),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("microsub registry mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, inner: &Inner) {
        self.shared.events.send_replace(inner.snapshot());
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.shared.events.subscribe()
    }

    pub fn selected(&self) -> Option<Microsub> {
        self.lock().selected_microsub().cloned()
    }

    pub fn valid_microsubs(&self) -> Vec<Microsub> {
        self.snapshot().valid_microsubs()
    }

    /// Switch to `wallet` (or to no wallet) and load its credits.
    ///
    /// The selection is cleared before anything else, and any fetch still
    /// running for the previous wallet is cancelled. Addresses are compared
    /// case-insensitively.
    pub async fn select_wallet(&self, wallet: Option<String>) -> Result<FetchOutcome, X402Error> {
        let wallet = wallet.map(|w| w.trim().to_ascii_lowercase());
        let same_wallet = {
            let inner = self.lock();
            wallet.is_some() && inner.wallet == wallet
        };
        if same_wallet {
            return self.refetch().await;
        }

        let (generation, token, wallet) = {
            let mut inner = self.lock();
            if !inner.alive {
                return Ok(FetchOutcome::Stale);
            }

            inner.selected = None;
            inner.microsubs.clear();
            inner.error = None;
            inner.wallet = wallet.clone();

            let Some(wallet) = wallet else {
                if let Some(old) = inner.cancel.take() {
                    old.cancel();
                }
                inner.status = RegistryStatus::Empty;
                self.publish(&inner);
                tracing::debug!("microsub registry cleared");
                return Ok(FetchOutcome::Idle);
            };

            let (generation, token) = inner.start_fetch();
            self.publish(&inner);
            (generation, token, wallet)
        };

        tracing::info!(wallet = %wallet, "loading microsubs");
        self.load(generation, wallet, token).await
    }

    /// Reload credits for the current wallet.
    pub async fn refetch(&self) -> Result<FetchOutcome, X402Error> {
        let (generation, token, wallet) = {
            let mut inner = self.lock();
            if !inner.alive {
                return Ok(FetchOutcome::Stale);
            }
            let Some(wallet) = inner.wallet.clone() else {
                return Ok(FetchOutcome::Idle);
            };
            let (generation, token) = inner.start_fetch();
            self.publish(&inner);
            (generation, token, wallet)
        };

        tracing::debug!(wallet = %wallet, "refetching microsubs");
        self.load(generation, wallet, token).await
    }

    async fn load(
        &self,
        generation: u64,
        wallet: String,
        token: CancellationToken,
    ) -> Result<FetchOutcome, X402Error> {
        let mut guard = FetchGuard {
            registry: self,
            generation,
            token: token.clone(),
            settled: false,
        };
        let scope = self.shared.options.scope.as_deref();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(wallet = %wallet, "microsub fetch cancelled");
                return Ok(FetchOutcome::Cancelled);
            }
            r = self.shared.source.fetch_microsubs(&wallet, scope, token.clone()) => r,
        };
        guard.settled = true;
        self.commit(generation, &wallet, result)
    }

    /// Leave `Loading` for a fetch that ended without a result: its future
    /// was dropped, or its token was cancelled by `shutdown`.
    fn abandon_fetch(&self, generation: u64, token: &CancellationToken) {
        token.cancel();
        let mut inner = self.lock();
        if inner.generation != generation || inner.status != RegistryStatus::Loading {
            return;
        }
        inner.cancel = None;
        let status = if inner.microsubs.is_empty() {
            RegistryStatus::Empty
        } else {
            RegistryStatus::Ready(inner.ready_state())
        };
        inner.status = status;
        tracing::debug!(generation, "microsub fetch abandoned");
        self.publish(&inner);
    }

    fn commit(
        &self,
        generation: u64,
        wallet: &str,
        result: Result<Vec<Value>, X402Error>,
    ) -> Result<FetchOutcome, X402Error> {
        let mut inner = self.lock();
        if !inner.alive || inner.generation != generation || inner.wallet.as_deref() != Some(wallet)
        {
            tracing::debug!(wallet = %wallet, generation, "discarding stale microsub fetch");
            return Ok(FetchOutcome::Stale);
        }
        inner.cancel = None;

        match result {
            Ok(raw) => {
                inner.microsubs = normalize_microsub_list(&raw, wallet);
                inner.error = None;
                inner.reconcile_selection(self.shared.options.auto_select_valid);
                let state = inner.ready_state();
                inner.status = RegistryStatus::Ready(state);
                tracing::info!(
                    wallet = %wallet,
                    total = inner.microsubs.len(),
                    selected = ?inner.selected,
                    "microsubs loaded"
                );
                self.publish(&inner);
                Ok(FetchOutcome::Applied)
            }
            Err(e) => {
                tracing::warn!(wallet = %wallet, error = %e, "microsub fetch failed");
                inner.status = RegistryStatus::Error;
                inner.error = Some(e.user_message());
                self.publish(&inner);
                Err(e)
            }
        }
    }

    /// Select a credit by `tx_hash`. Unknown or disabled credits are ignored
    /// and `false` is returned.
    pub fn select_microsub(&self, tx_hash: &str) -> bool {
        let mut inner = self.lock();
        let usable = inner
            .microsubs
            .iter()
            .any(|m| m.tx_hash == tx_hash && !m.disabled());
        if !usable {
            tracing::debug!(tx_hash = %tx_hash, "ignoring selection of unusable microsub");
            return false;
        }
        inner.selected = Some(tx_hash.to_string());
        self.publish(&inner);
        true
    }

    pub fn clear_selection(&self) {
        let mut inner = self.lock();
        if inner.selected.take().is_some() {
            self.publish(&inner);
        }
    }

    /// Check the current selection. An unusable selection reports its
    /// reason (expired > exhausted > invalid) and calls `on_invalid` with it.
    pub fn validate_selected_microsub<F>(&self, on_invalid: F) -> SelectionValidity
    where
        F: FnOnce(MicrosubErrorKind),
    {
        let reason = self
            .lock()
            .selected_microsub()
            .and_then(|m| m.unusable_reason());

        match reason {
            None => SelectionValidity {
                is_valid: true,
                reason: None,
            },
            Some(kind) => {
                on_invalid(kind);
                SelectionValidity {
                    is_valid: false,
                    reason: Some(kind),
                }
            }
        }
    }

    /// Locally mark a credit unusable after a failed use. The next fetch
    /// replaces it with the server's view.
    pub fn record_failure(&self, tx_hash: &str, kind: MicrosubErrorKind) {
        let mut inner = self.lock();
        let Some(m) = inner.microsubs.iter_mut().find(|m| m.tx_hash == tx_hash) else {
            return;
        };
        m.mark_unusable(kind);
        tracing::info!(tx_hash = %tx_hash, reason = %kind, "microsub marked unusable");

        inner.reconcile_selection(self.shared.options.auto_select_valid);
        if matches!(inner.status, RegistryStatus::Ready(_)) {
            let state = inner.ready_state();
            inner.status = RegistryStatus::Ready(state);
        }
        self.publish(&inner);
    }

    /// Fold backend payment metadata into the cache. Returns `true` when the
    /// credit list is out of date and [`refetch`](Self::refetch) should run.
    pub fn apply_payment_metadata(&self, meta: &PaymentMetadata, used_tx_hash: Option<&str>) -> bool {
        let mut inner = self.lock();
        let tx = meta.tx_hash.as_deref().or(used_tx_hash);
        let Some(tx) = tx else {
            return meta.microsub_active;
        };

        let Some(m) = inner.microsubs.iter_mut().find(|m| m.tx_hash == tx) else {
            // A settlement just created a credit we have not seen yet.
            return meta.microsub_active;
        };

        let mut stale = !meta.microsub_active;
        if let Some(remaining) = meta.queries_remaining {
            if remaining != m.queries_remaining {
                m.queries_remaining = remaining;
                stale = true;
            }
            if remaining <= 0 {
                m.mark_unusable(MicrosubErrorKind::Exhausted);
            }
        }
        if let Some(expires_at) = meta.expires_at {
            if m.expires_at != Some(expires_at) {
                m.expires_at = Some(expires_at);
                stale = true;
            }
            if expires_at <= Utc::now() {
                m.mark_unusable(MicrosubErrorKind::Expired);
            }
        }

        inner.reconcile_selection(self.shared.options.auto_select_valid);
        if matches!(inner.status, RegistryStatus::Ready(_)) {
            let state = inner.ready_state();
            inner.status = RegistryStatus::Ready(state);
        }
        self.publish(&inner);
        stale
    }

    /// Tear down: cancel any running fetch and ignore every later result.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.alive = false;
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        tracing::debug!("microsub registry shut down");
    }
}
