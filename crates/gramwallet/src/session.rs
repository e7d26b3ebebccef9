//! The live wallet identity and its cached chain view.
//!
//! `SessionStore` is a plain state container: it never performs I/O and never schedules
//! anything. Callers hold it behind the controller's lock, so each transition is observed
//! atomically by other tasks.

use crate::{
    history::WalletTransaction,
    persist::{PersistedRecord, LEDGER_SENTINEL},
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    Software,
    Hardware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub address: String,
    pub public_key: Option<[u8; 32]>,
    pub signer_mode: SignerMode,
    pub wallet_version: Option<String>,
    /// `None` until the first successful poll.
    pub balance: Option<u128>,
    /// Newest first.
    pub transactions: Vec<WalletTransaction>,
    pub contract_initialized: bool,
    /// Date (ms) of the newest transaction seen so far.
    pub last_tx_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInit {
    Active(WalletSession),
    Uninitialized,
}

fn decode_public_key(hex_key: &str) -> Option<[u8; 32]> {
    hex::decode(hex_key).ok().and_then(|b| b.try_into().ok())
}

impl WalletSession {
    pub const fn new(address: String, signer_mode: SignerMode) -> Self {
        Self {
            address,
            public_key: None,
            signer_mode,
            wallet_version: None,
            balance: None,
            transactions: Vec::new(),
            contract_initialized: false,
            last_tx_time: 0,
        }
    }

    /// Build a session from persisted keys. Fails closed: a record missing the address, the
    /// vault or the password fingerprint yields `Uninitialized`.
    pub fn from_persisted(rec: &PersistedRecord) -> SessionInit {
        let (Some(address), Some(words), Some(_)) = (&rec.address, &rec.words, &rec.pwd_hash)
        else {
            return SessionInit::Uninitialized;
        };
        let signer_mode = if rec.is_ledger || words == LEDGER_SENTINEL {
            SignerMode::Hardware
        } else {
            SignerMode::Software
        };
        let mut s = Self::new(address.clone(), signer_mode);
        if signer_mode == SignerMode::Hardware {
            s.public_key = rec.public_key.as_deref().and_then(decode_public_key);
        }
        s.wallet_version.clone_from(&rec.wallet_version);
        SessionInit::Active(s)
    }

    pub fn public_key_hex(&self) -> Option<String> {
        self.public_key.map(hex::encode)
    }
}

/// Result of applying a poll observation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BalanceUpdate {
    pub changed: bool,
    /// Transactions newer than anything seen before this update, newest first.
    pub new_transactions: Vec<WalletTransaction>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<WalletSession>,
    epoch: u64,
}

impl SessionStore {
    pub const fn new() -> Self {
        Self {
            session: None,
            epoch: 0,
        }
    }

    /// Load from persisted keys. Returns whether a session became active.
    pub fn initialize_from_persisted(&mut self, rec: &PersistedRecord) -> bool {
        match WalletSession::from_persisted(rec) {
            SessionInit::Active(s) => {
                self.start(s);
                true
            }
            SessionInit::Uninitialized => {
                self.reset();
                false
            }
        }
    }

    /// Install a new session and return its epoch.
    pub fn start(&mut self, session: WalletSession) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.session = Some(session);
        self.epoch
    }

    pub const fn current(&self) -> Option<&WalletSession> {
        self.session.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut WalletSession> {
        self.session.as_mut()
    }

    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether work started under `epoch` may still mutate the session.
    pub const fn is_current(&self, epoch: u64) -> bool {
        self.session.is_some() && self.epoch == epoch
    }

    /// Balance comparison is on integers. An unknown previous balance always counts as changed.
    pub fn balance_changed(&self, balance: u128) -> bool {
        self.session
            .as_ref()
            .is_none_or(|s| s.balance != Some(balance))
    }

    /// Replace balance and transaction cache together.
    ///
    /// An empty fetched history leaves the previous cache in place.
    pub fn apply_balance_update(
        &mut self,
        balance: u128,
        transactions: Vec<WalletTransaction>,
    ) -> BalanceUpdate {
        let Some(s) = self.session.as_mut() else {
            return BalanceUpdate::default();
        };
        let changed = s.balance != Some(balance);
        s.balance = Some(balance);

        let mut update = BalanceUpdate {
            changed,
            new_transactions: Vec::new(),
        };
        if let Some(newest) = transactions.first() {
            let since = s.last_tx_time;
            s.last_tx_time = since.max(newest.date);
            update.new_transactions = transactions
                .iter()
                .filter(|t| t.date > since)
                .cloned()
                .collect();
            s.transactions = transactions;
        }
        update
    }

    /// One-way transition. Returns `true` only on the call that flips the flag.
    pub fn mark_contract_initialized(&mut self) -> bool {
        match self.session.as_mut() {
            Some(s) if !s.contract_initialized => {
                s.contract_initialized = true;
                true
            }
            _ => false,
        }
    }

    /// Drop the session. Work started under earlier epochs is discarded from now on.
    pub fn reset(&mut self) {
        self.session = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: i128, to: &str, date: i64) -> WalletTransaction {
        WalletTransaction {
            amount,
            from_addr: "EQme".into(),
            to_addr: to.into(),
            fee: 0,
            storage_fee: 0,
            other_fee: 0,
            comment: String::new(),
            date,
        }
    }

    fn complete_record() -> PersistedRecord {
        PersistedRecord {
            address: Some("EQaddr".into()),
            words: Some("vault".into()),
            pwd_hash: Some("fp".into()),
            wallet_version: Some("v3R2".into()),
            ..PersistedRecord::default()
        }
    }

    #[test]
    fn fails_closed_on_missing_keys() {
        let mut rec = complete_record();
        rec.pwd_hash = None;
        assert_eq!(WalletSession::from_persisted(&rec), SessionInit::Uninitialized);
        let mut rec = complete_record();
        rec.words = None;
        assert_eq!(WalletSession::from_persisted(&rec), SessionInit::Uninitialized);
    }

    #[test]
    fn hardware_mode_restores_public_key() -> eyre::Result<()> {
        let mut rec = complete_record();
        rec.is_ledger = true;
        rec.words = Some(LEDGER_SENTINEL.into());
        rec.public_key = Some("11".repeat(32));
        let SessionInit::Active(s) = WalletSession::from_persisted(&rec) else {
            eyre::bail!("expected active session");
        };
        assert_eq!(s.signer_mode, SignerMode::Hardware);
        assert_eq!(s.public_key, Some([0x11; 32]));
        assert_eq!(s.wallet_version.as_deref(), Some("v3R2"));
        Ok(())
    }

    #[test]
    fn balance_update_is_integer_compared_and_atomic() {
        let mut store = SessionStore::new();
        assert!(store.initialize_from_persisted(&complete_record()));
        assert!(store.balance_changed(0));

        let u = store.apply_balance_update(100, vec![tx(100, "EQme", 2_000), tx(5, "EQme", 1_000)]);
        assert!(u.changed);
        assert_eq!(u.new_transactions.len(), 2);
        assert!(!store.balance_changed(100));

        let u = store.apply_balance_update(100, vec![tx(100, "EQme", 2_000)]);
        assert!(!u.changed);
        assert!(u.new_transactions.is_empty());

        let u = store.apply_balance_update(40, vec![tx(-60, "EQx", 3_000), tx(100, "EQme", 2_000)]);
        assert!(u.changed);
        assert_eq!(u.new_transactions, vec![tx(-60, "EQx", 3_000)]);
        let s = store.current().map(|s| (s.balance, s.transactions.len()));
        assert_eq!(s, Some((Some(40), 2)));
    }

    #[test]
    fn empty_history_keeps_previous_cache() {
        let mut store = SessionStore::new();
        store.initialize_from_persisted(&complete_record());
        store.apply_balance_update(1, vec![tx(1, "EQme", 10)]);
        store.apply_balance_update(2, vec![]);
        let s = store.current().map(|s| (s.balance, s.transactions.len()));
        assert_eq!(s, Some((Some(2), 1)));
    }

    #[test]
    fn older_history_never_rewinds_the_watermark() {
        let mut store = SessionStore::new();
        store.initialize_from_persisted(&complete_record());
        store.apply_balance_update(40, vec![tx(-60, "EQx", 3_000)]);
        store.apply_balance_update(100, vec![tx(100, "EQme", 2_000)]);
        assert_eq!(store.current().map(|s| s.last_tx_time), Some(3_000));

        // The earlier transfer must not come back as new.
        let u = store.apply_balance_update(40, vec![tx(-60, "EQx", 3_000)]);
        assert!(u.new_transactions.is_empty());
    }

    #[test]
    fn contract_initialization_is_one_way() {
        let mut store = SessionStore::new();
        store.initialize_from_persisted(&complete_record());
        assert!(store.mark_contract_initialized());
        assert!(!store.mark_contract_initialized());
        assert_eq!(store.current().map(|s| s.contract_initialized), Some(true));
    }

    #[test]
    fn reset_invalidates_epoch() {
        let mut store = SessionStore::new();
        store.initialize_from_persisted(&complete_record());
        let epoch = store.epoch();
        assert!(store.is_current(epoch));
        store.reset();
        assert!(!store.is_current(epoch));
        assert!(store.current().is_none());
        assert!(store.apply_balance_update(5, vec![]) == BalanceUpdate::default());
    }
}
