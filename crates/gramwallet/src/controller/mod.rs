//! The wallet controller: one long-lived object owning the session, the pending transfer, the
//! channel router and the polling task, with its external collaborators injected.
//!
//! Shared state sits behind short synchronous locks that are never held across an await.
//! Network-bound work runs outside the lock and re-checks the session epoch before applying
//! anything, so a disconnect that lands mid-flight wins.

mod dispatch;
mod onboarding;
mod send;

use crate::{
    config::ControllerConfig,
    errors::WalletError,
    history::normalize_all,
    ledger::{Collaborators, HardwareSigner},
    persist::{PersistedRecord, StateStore},
    poller::PollingScheduler,
    reconciler::{AuthorizedSend, PendingSend, ReconcilerState, SendReconciler},
    router::{ChannelRouter, ConnectionId, Delivery},
    rpc::{
        jsonrpc::{PageEnvelope, PageMessage, PageRequest},
        ui::{UiMessage, UiRequest},
    },
    session::{SessionStore, SignerMode},
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;
use zeroize::Zeroizing;

pub use send::DEPLOY_FEE_ESTIMATE;

/// What a verified password unlocks. Set by the flow that asked for the password.
enum PendingAction {
    Backup,
    SendConfirm(AuthorizedSend),
    ChangePassword { new_password: SecretString },
}

impl PendingAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::SendConfirm(_) => "sendConfirm",
            Self::ChangePassword { .. } => "changePassword",
        }
    }
}

/// A software wallet being onboarded, before a password has been chosen.
struct Draft {
    words: Zeroizing<Vec<String>>,
    address: String,
}

/// Orders overlapping refreshes: only one newer than the last applied refresh may land.
#[derive(Default)]
struct RefreshOrder {
    issued: u64,
    applied: u64,
}

impl RefreshOrder {
    fn issue(&mut self) -> u64 {
        self.issued = self.issued.wrapping_add(1);
        self.issued
    }

    const fn is_fresh(&self, seq: u64) -> bool {
        seq > self.applied
    }
}

#[derive(Default)]
struct CoreState {
    session: SessionStore,
    refreshes: RefreshOrder,
    reconciler: SendReconciler,
    pending_action: Option<PendingAction>,
    draft: Option<Draft>,
    hardware: Option<Arc<dyn HardwareSigner>>,
}

impl CoreState {
    const fn refresh_lands(&self, epoch: u64, seq: u64) -> bool {
        self.session.is_current(epoch) && self.refreshes.is_fresh(seq)
    }
}

struct Inner {
    config: ControllerConfig,
    collab: Collaborators,
    store: StateStore,
    state: Mutex<CoreState>,
    router: Mutex<ChannelRouter>,
    poller: Mutex<PollingScheduler>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a collaborator call under a deadline. Failures are wrapped with `wrap`; running out of
/// time is a `TransportTimeout` naming `what`.
async fn bounded<T>(
    what: &'static str,
    limit: Duration,
    fut: impl Future<Output = eyre::Result<T>>,
    wrap: fn(String) -> WalletError,
) -> Result<T, WalletError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(wrap(format!("{e:#}"))),
        Err(_elapsed) => Err(WalletError::TransportTimeout(what)),
    }
}

impl Controller {
    pub fn new(config: ControllerConfig, collab: Collaborators, store: StateStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                collab,
                store,
                state: Mutex::new(CoreState::default()),
                router: Mutex::new(ChannelRouter::new()),
                poller: Mutex::new(PollingScheduler::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Lock order is state, then router. Closures must not await.
    fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        f(&mut lock(&self.inner.state))
    }

    fn with_router<R>(&self, f: impl FnOnce(&mut ChannelRouter) -> R) -> R {
        f(&mut lock(&self.inner.router))
    }

    fn send_ui(&self, msg: UiMessage) -> Delivery {
        self.with_router(|r| r.send_to_ui(msg, false))
    }

    fn send_ui_queued(&self, msg: UiMessage, queue: bool) -> Delivery {
        self.with_router(|r| r.send_to_ui(msg, queue))
    }

    fn broadcast_accounts(&self, address: Option<&str>) {
        let accounts: Vec<&str> = address.into_iter().collect();
        self.with_router(|r| r.send_to_page("ton_accounts", json!(accounts)));
    }

    /// Close whatever modal is up and tell the user.
    fn alert(&self, message: &str) {
        self.with_router(|r| {
            r.send_to_ui(UiMessage::close_popup(), false);
            r.send_to_ui(UiMessage::alert(message), true);
        });
    }

    fn record(&self) -> PersistedRecord {
        self.inner.store.record()
    }

    /// Restore the session from persisted state. An incomplete record wipes the store and
    /// leaves the controller on the start screen.
    pub fn boot(&self) -> eyre::Result<()> {
        let rec = self.record();
        if !rec.is_complete() {
            self.inner.store.clear()?;
            self.send_ui(UiMessage::show_screen("start"));
            tracing::info!("no stored wallet");
            return Ok(());
        }
        if rec.is_ledger {
            self.send_ui(UiMessage::set_is_ledger(true));
        }
        self.show_main()?;
        Ok(())
    }

    /// Enter the main screen: make sure a session exists, start polling and announce the
    /// account to the page client.
    pub fn show_main(&self) -> Result<(), WalletError> {
        let rec = self.record();
        let (address, public_key) = self.with_state(|s| {
            if s.session.current().is_none() && !s.session.initialize_from_persisted(&rec) {
                return Err(WalletError::NotInitialized);
            }
            let cur = s.session.current().ok_or(WalletError::NotInitialized)?;
            Ok((cur.address.clone(), cur.public_key_hex()))
        })?;

        self.with_router(|r| {
            r.send_to_ui(
                UiMessage::new("showScreen", json!({ "name": "main", "myAddress": address })),
                false,
            );
            r.send_to_ui(UiMessage::set_password_hash(rec.pwd_hash.as_deref()), false);
            r.send_to_ui(UiMessage::set_public_key(public_key.as_deref()), false);
        });

        self.start_polling();
        self.spawn_refresh();
        self.broadcast_accounts(Some(&address));
        tracing::info!(address = %address, "session active");
        Ok(())
    }

    fn start_polling(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.poll_interval();
        lock(&self.inner.poller).start(period, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = (Self { inner }).refresh().await {
                    tracing::warn!(error = %e, "balance refresh failed");
                }
            }
        });
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller).is_running()
    }

    fn spawn_refresh(&self) {
        let ctl = self.clone();
        tokio::spawn(async move {
            if let Err(e) = ctl.refresh().await {
                tracing::warn!(error = %e, "balance refresh failed");
            }
        });
    }

    /// Poll the provider once and fold the observation into the session.
    ///
    /// History is only fetched when the balance moved. A completion is dropped when the session
    /// was reset (or replaced) since it started, or when a later refresh already landed.
    pub async fn refresh(&self) -> eyre::Result<()> {
        let Some((epoch, seq, address)) = self.with_state(|s| {
            let epoch = s.session.epoch();
            let address = s.session.current()?.address.clone();
            Some((epoch, s.refreshes.issue(), address))
        }) else {
            return Ok(());
        };

        let info = self.inner.collab.provider.wallet_info(&address).await?;
        let changed = self.with_state(|s| {
            s.refresh_lands(epoch, seq)
                .then(|| s.session.balance_changed(info.balance))
        });
        let Some(changed) = changed else {
            tracing::debug!(epoch, seq, "discarding stale refresh");
            return Ok(());
        };

        let transactions = if changed {
            let raw = self
                .inner
                .collab
                .provider
                .transactions(&address, self.inner.config.transactions_page_size)
                .await?;
            normalize_all(&raw)?
        } else {
            Vec::new()
        };

        let applied = self.with_state(|s| {
            if !s.refresh_lands(epoch, seq) {
                return None;
            }
            s.refreshes.applied = seq;
            let deferred = if info.is_contract_initialized() && s.session.mark_contract_initialized()
            {
                s.reconciler.take_deferred()
            } else {
                None
            };
            let update = s.session.apply_balance_update(info.balance, transactions);
            let confirmation = s.reconciler.observe(&update.new_transactions);
            let txs = s
                .session
                .current()
                .map(|c| c.transactions.clone())
                .unwrap_or_default();
            Some((deferred, confirmation, txs))
        });
        let Some((deferred, confirmation, txs)) = applied else {
            tracing::debug!(epoch, seq, "discarding stale refresh");
            return Ok(());
        };
        tracing::debug!(epoch, seq, changed, balance = %info.balance, "refreshed");

        self.with_router(|r| {
            if let Some(c) = &confirmation {
                r.send_to_ui(
                    UiMessage::new("showPopup", json!({ "name": "done", "message": c.message() })),
                    false,
                );
            }
            r.send_to_ui(
                UiMessage::new(
                    "setBalance",
                    json!({ "balance": info.balance.to_string(), "txs": txs }),
                ),
                false,
            );
        });
        if let Some(c) = confirmation {
            self.with_state(|s| s.reconciler.acknowledge());
            tracing::info!(to = %c.to, amount = %c.amount, "transfer confirmed");
        }
        if let Some(query) = deferred {
            tracing::info!("wallet contract active, submitting deferred transfer");
            send::submit_deferred(self, epoch, query).await;
        }
        Ok(())
    }

    /// Forget the wallet: stop polling, wipe session and storage, return to the start screen.
    pub fn disconnect(&self) -> eyre::Result<()> {
        lock(&self.inner.poller).stop();
        self.with_state(|s| {
            s.session.reset();
            s.reconciler.reset();
            s.pending_action = None;
            s.draft = None;
            s.hardware = None;
        });
        self.inner.store.clear()?;
        self.with_router(|r| {
            r.clear_queue();
            r.send_to_ui(UiMessage::show_screen("start"), false);
        });
        self.broadcast_accounts(None);
        tracing::info!("wallet disconnected");
        Ok(())
    }

    fn ui_snapshot(s: &CoreState, rec: &PersistedRecord) -> Vec<UiMessage> {
        let Some(address) = rec.address.as_deref().filter(|_| rec.is_complete()) else {
            return vec![UiMessage::show_screen("start")];
        };
        let mut out = vec![UiMessage::new(
            "showScreen",
            json!({ "name": "main", "myAddress": address }),
        )];
        if rec.is_ledger {
            out.push(UiMessage::set_is_ledger(true));
        }
        if let Some(cur) = s.session.current() {
            if let Some(balance) = cur.balance {
                out.push(UiMessage::new(
                    "setBalance",
                    json!({ "balance": balance.to_string(), "txs": cur.transactions }),
                ));
            }
        }
        out.push(UiMessage::set_password_hash(rec.pwd_hash.as_deref()));
        let public_key = s
            .session
            .current()
            .and_then(|c| c.public_key_hex())
            .or_else(|| rec.public_key.clone());
        out.push(UiMessage::set_public_key(public_key.as_deref()));
        out
    }

    /// Attach a UI connection: full snapshot, then the queued messages.
    pub fn connect_ui(&self, tx: UnboundedSender<UiMessage>) -> ConnectionId {
        let rec = self.record();
        self.with_state(|s| {
            let snapshot = Self::ui_snapshot(s, &rec);
            self.with_router(|r| r.connect_ui(tx, snapshot))
        })
    }

    pub fn disconnect_ui(&self, id: ConnectionId) {
        if self.with_router(|r| r.disconnect_ui(id)) {
            tracing::debug!(conn = id, "ui detached");
        }
    }

    /// Attach an in-process view that receives UI messages directly.
    pub fn attach_embedded_view(&self, tx: UnboundedSender<UiMessage>) {
        let rec = self.record();
        self.with_state(|s| {
            let snapshot = Self::ui_snapshot(s, &rec);
            self.with_router(|r| r.attach_embedded_view(tx, snapshot));
        });
    }

    pub fn connect_page(&self, tx: UnboundedSender<PageEnvelope>) -> ConnectionId {
        let address = self.with_state(|s| s.session.current().map(|c| c.address.clone()));
        let id = self.with_router(|r| r.connect_page(tx));
        self.broadcast_accounts(address.as_deref());
        id
    }

    pub fn disconnect_page(&self, id: ConnectionId) {
        if self.with_router(|r| r.disconnect_page(id)) {
            tracing::debug!(conn = id, "page client detached");
        }
    }

    /// Answer one page-client request. Every message carrying an id gets exactly one response;
    /// messages without an id are ignored.
    pub fn handle_page_message(&self, msg: PageMessage) -> Option<PageEnvelope> {
        let id = msg.id?;
        let request = match PageRequest::parse(&msg.method, &msg.params) {
            Ok(r) => r,
            Err(e) => return Some(PageEnvelope::err(id, &msg.method, e)),
        };
        let result = match request {
            PageRequest::RequestAccounts => {
                let address = self.with_state(|s| s.session.current().map(|c| c.address.clone()));
                json!(address.into_iter().collect::<Vec<_>>())
            }
            PageRequest::GetBalance => {
                let balance = self.with_state(|s| s.session.current().and_then(|c| c.balance));
                Value::String(balance.map(|b| b.to_string()).unwrap_or_default())
            }
            PageRequest::SendTransaction(p) => {
                let need_queue = !self.with_router(|r| r.is_ui_connected());
                if need_queue {
                    self.inner.collab.launcher.open_popup();
                }
                let ctl = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = send::on_send(&ctl, &p.value, &p.to, p.data, need_queue).await {
                        tracing::debug!(error = %e, "page transfer request rejected");
                    }
                });
                Value::Bool(true)
            }
        };
        Some(PageEnvelope::ok(id, &msg.method, result))
    }

    /// Handle one UI request. Failures are already reported to the UI where the user needs to
    /// know; the error is returned for logging.
    pub async fn handle_ui_request(&self, request: UiRequest) -> eyre::Result<()> {
        dispatch::handle(self, request).await
    }

    pub fn balance(&self) -> Option<u128> {
        self.with_state(|s| s.session.current().and_then(|c| c.balance))
    }

    pub fn address(&self) -> Option<String> {
        self.with_state(|s| s.session.current().map(|c| c.address.clone()))
    }

    pub fn signer_mode(&self) -> Option<SignerMode> {
        self.with_state(|s| s.session.current().map(|c| c.signer_mode))
    }

    pub fn pending_send(&self) -> Option<PendingSend> {
        self.with_state(|s| s.reconciler.pending().cloned())
    }

    pub fn send_state(&self) -> ReconcilerState {
        self.with_state(|s| s.reconciler.state())
    }
}
