//! Persisted wallet state: a flat string-to-string map mirroring the keys the UI and older
//! clients expect. Every mutation is written through to disk atomically.

use eyre::Context as _;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

pub const KEY_ADDRESS: &str = "address";
pub const KEY_PUBLIC_KEY: &str = "publicKey";
pub const KEY_WORDS: &str = "words";
pub const KEY_PWD_HASH: &str = "pwdHash";
pub const KEY_WALLET_VERSION: &str = "walletVersion";
pub const KEY_IS_LEDGER: &str = "isLedger";
pub const KEY_LEDGER_TRANSPORT: &str = "ledgerTransportType";
pub const KEY_VAULT_SALT: &str = "vaultSalt";

/// Stored in place of the vault and password fingerprint in hardware-signer mode.
pub const LEDGER_SENTINEL: &str = "ledger";

#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    map: Mutex<BTreeMap<String, String>>,
}

impl StateStore {
    pub fn open(path: &Path) -> eyre::Result<Self> {
        let map = if path.exists() {
            let s = fs::read_to_string(path).context("read state.json")?;
            serde_json::from_str(&s).context("parse state.json")?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            map: Mutex::new(map),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            map: Mutex::new(BTreeMap::new()),
        }
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> eyre::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let s = serde_json::to_string_pretty(map).context("serialize state.json")?;
        crate::fsutil::write_private_atomic(path, &s).context("write state.json")
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) -> eyre::Result<()> {
        self.set_many(&[(key, value)])
    }

    pub fn set_many(&self, entries: &[(&str, &str)]) -> eyre::Result<()> {
        let updates: Vec<_> = entries.iter().map(|(k, v)| (*k, Some(*v))).collect();
        self.apply(&updates)
    }

    pub fn remove(&self, key: &str) -> eyre::Result<()> {
        self.apply(&[(key, None)])
    }

    /// Set (`Some`) or remove (`None`) several keys in one write. Memory changes only once the
    /// file is replaced.
    pub fn apply(&self, updates: &[(&str, Option<&str>)]) -> eyre::Result<()> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = map.clone();
        for (k, v) in updates {
            match v {
                Some(v) => next.insert((*k).to_owned(), (*v).to_owned()),
                None => next.remove(*k),
            };
        }
        if next == *map {
            return Ok(());
        }
        self.flush(&next)?;
        *map = next;
        Ok(())
    }

    pub fn clear(&self) -> eyre::Result<()> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let empty = BTreeMap::new();
        self.flush(&empty)?;
        *map = empty;
        Ok(())
    }

    pub fn record(&self) -> PersistedRecord {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        PersistedRecord::from_map(&map)
    }
}

/// Typed view of the persisted keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedRecord {
    pub address: Option<String>,
    pub public_key: Option<String>,
    pub words: Option<String>,
    pub pwd_hash: Option<String>,
    pub wallet_version: Option<String>,
    pub is_ledger: bool,
    pub ledger_transport: Option<String>,
    pub vault_salt: Option<String>,
}

impl PersistedRecord {
    fn from_map(map: &BTreeMap<String, String>) -> Self {
        let get = |k: &str| map.get(k).filter(|v| !v.is_empty()).cloned();
        Self {
            address: get(KEY_ADDRESS),
            public_key: get(KEY_PUBLIC_KEY),
            words: get(KEY_WORDS),
            pwd_hash: get(KEY_PWD_HASH),
            wallet_version: get(KEY_WALLET_VERSION),
            is_ledger: map.get(KEY_IS_LEDGER).is_some_and(|v| v == "true"),
            ledger_transport: get(KEY_LEDGER_TRANSPORT),
            vault_salt: get(KEY_VAULT_SALT),
        }
    }

    /// All of address, vault and password fingerprint are present.
    pub const fn is_complete(&self) -> bool {
        self.address.is_some() && self.words.is_some() && self.pwd_hash.is_some()
    }
}
