//! Mock collaborators and helpers shared by the controller and daemon tests.

use crate::{
    address::Address,
    config::ControllerConfig,
    controller::Controller,
    history::RawTransaction,
    ledger::{
        BroadcastOutcome, Collaborators, ContractRef, FeeEstimate, HardwareAccount,
        HardwareConnector, HardwareSigner, KeyPair, PopupLauncher, Provider, SignedQuery,
        SoftwareSigner, TransferParams, TransportType, WalletInfo, ACCOUNT_STATE_ACTIVE,
    },
    persist::{StateStore, KEY_ADDRESS, KEY_IS_LEDGER, KEY_PWD_HASH, KEY_WALLET_VERSION, KEY_WORDS},
    rpc::ui::UiMessage,
    vault::{fingerprint, KeyDerivation, SecretVault},
};
use async_trait::async_trait;
use secrecy::SecretString;
use sha2::{Digest as _, Sha256};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};
use zeroize::Zeroizing;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) const PASSWORD: &str = "correct horse";
pub(crate) const WORDS: &str = "w1,w2,w3";

fn account_key(addr: &str) -> String {
    Address::parse(addr).map_or_else(|_e| addr.to_owned(), |a| a.to_raw())
}

pub(crate) fn me() -> String {
    Address::new(0, [1; 32]).canonical()
}

pub(crate) fn dest() -> String {
    Address::new(0, [2; 32]).canonical()
}

#[derive(Default)]
pub(crate) struct MockProvider {
    pub(crate) wallets: Mutex<HashMap<String, WalletInfo>>,
    pub(crate) transactions: Mutex<Vec<RawTransaction>>,
    pub(crate) broadcasts: Mutex<Vec<SignedQuery>>,
    pub(crate) reject_broadcast: Mutex<Option<String>>,
    pub(crate) gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) info_calls: AtomicUsize,
    pub(crate) tx_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn set_wallet(&self, addr: &str, balance: u128, seqno: Option<u32>) {
        let account_state = if seqno.is_some() {
            ACCOUNT_STATE_ACTIVE
        } else {
            "uninitialized"
        };
        lock(&self.wallets).insert(
            account_key(addr),
            WalletInfo {
                balance,
                account_state: account_state.into(),
                seqno,
            },
        );
    }

    pub(crate) fn set_transactions(&self, txs: Vec<RawTransaction>) {
        *lock(&self.transactions) = txs;
    }

    pub(crate) fn broadcast_bodies(&self) -> Vec<String> {
        lock(&self.broadcasts)
            .iter()
            .map(|q| q.body_b64.clone())
            .collect()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn wallet_info(&self, address: &str) -> eyre::Result<WalletInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        // Answer with the state at call time, delivered once the gate opens.
        let known = lock(&self.wallets).get(&account_key(address)).cloned();
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(known.unwrap_or_else(|| WalletInfo {
            balance: 0,
            account_state: "uninitialized".into(),
            seqno: None,
        }))
    }

    async fn transactions(&self, _address: &str, _limit: u32) -> eyre::Result<Vec<RawTransaction>> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.transactions).clone())
    }

    async fn estimate_fee(&self, _query: &SignedQuery) -> eyre::Result<FeeEstimate> {
        Ok(FeeEstimate {
            in_fwd_fee: 1,
            storage_fee: 2,
            gas_fee: 3,
            fwd_fee: 4,
        })
    }

    async fn broadcast(&self, query: &SignedQuery) -> eyre::Result<BroadcastOutcome> {
        lock(&self.broadcasts).push(query.clone());
        let rejection = lock(&self.reject_broadcast).clone();
        Ok(match rejection {
            Some(reason) => BroadcastOutcome::Rejected(reason),
            None => BroadcastOutcome::Accepted,
        })
    }
}

fn query(contract: &ContractRef, body: String) -> SignedQuery {
    SignedQuery {
        address: contract.address.clone(),
        body_b64: body,
        state_init: None,
        message_boc_b64: String::new(),
    }
}

#[derive(Default)]
pub(crate) struct MockSigner {
    pub(crate) calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SoftwareSigner for MockSigner {
    async fn generate_mnemonic(&self) -> eyre::Result<Vec<String>> {
        Ok((1..=24).map(|i| format!("w{i}")).collect())
    }

    async fn key_pair(&self, words: &[String]) -> eyre::Result<KeyPair> {
        let digest = Sha256::digest(words.join(" ").as_bytes());
        let mut public_key = [0_u8; 32];
        public_key.copy_from_slice(&digest);
        Ok(KeyPair {
            public_key,
            secret_seed: Zeroizing::new(public_key),
        })
    }

    fn versions(&self) -> Vec<String> {
        vec!["v2R2".into(), "v3R2".into(), "v4R2".into()]
    }

    fn default_version(&self) -> String {
        "v3R2".into()
    }

    async fn address_for(&self, version: &str, public_key: &[u8; 32]) -> eyre::Result<String> {
        let mut h = Sha256::new();
        h.update(version.as_bytes());
        h.update(public_key);
        let mut hash = [0_u8; 32];
        hash.copy_from_slice(&h.finalize());
        Ok(Address::new(0, hash).canonical())
    }

    async fn transfer(
        &self,
        contract: &ContractRef,
        key_pair: Option<&KeyPair>,
        params: &TransferParams,
    ) -> eyre::Result<SignedQuery> {
        let kind = if key_pair.is_some() { "transfer" } else { "unsigned" };
        lock(&self.calls).push(kind.to_owned());
        Ok(query(
            contract,
            format!("{kind}:{}:{}:{}", params.to, params.amount, params.seqno),
        ))
    }

    async fn deploy(&self, contract: &ContractRef, _key_pair: &KeyPair) -> eyre::Result<SignedQuery> {
        lock(&self.calls).push("deploy".to_owned());
        Ok(query(contract, "deploy".into()))
    }
}

pub(crate) struct MockLedger;

pub(crate) fn ledger_account() -> HardwareAccount {
    HardwareAccount {
        address: Address::new(0, [7; 32]).canonical(),
        public_key: [7; 32],
        version: "v3R2".into(),
    }
}

#[async_trait]
impl HardwareSigner for MockLedger {
    async fn app_configuration(&self) -> eyre::Result<String> {
        Ok("2.0.0".into())
    }

    async fn account(&self, _index: u32, _show_on_device: bool) -> eyre::Result<HardwareAccount> {
        Ok(ledger_account())
    }

    async fn transfer(
        &self,
        _index: u32,
        contract: &ContractRef,
        params: &TransferParams,
    ) -> eyre::Result<SignedQuery> {
        Ok(query(
            contract,
            format!("hw-transfer:{}:{}", params.amount, params.seqno),
        ))
    }

    async fn deploy(&self, _index: u32, contract: &ContractRef) -> eyre::Result<SignedQuery> {
        Ok(query(contract, "hw-deploy".into()))
    }
}

#[derive(Default)]
pub(crate) struct MockConnector {
    pub(crate) fail: Mutex<bool>,
    pub(crate) connects: AtomicUsize,
}

#[async_trait]
impl HardwareConnector for MockConnector {
    async fn connect(&self, _transport: TransportType) -> eyre::Result<Arc<dyn HardwareSigner>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail) {
            eyre::bail!("device not found");
        }
        Ok(Arc::new(MockLedger))
    }
}

#[derive(Default)]
pub(crate) struct MockLauncher {
    pub(crate) opened: AtomicUsize,
}

impl PopupLauncher for MockLauncher {
    fn open_popup(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct Harness {
    pub(crate) ctl: Controller,
    pub(crate) provider: Arc<MockProvider>,
    pub(crate) signer: Arc<MockSigner>,
    pub(crate) connector: Arc<MockConnector>,
    pub(crate) launcher: Arc<MockLauncher>,
}

pub(crate) fn harness(store: StateStore) -> Harness {
    let provider = Arc::new(MockProvider::default());
    let signer = Arc::new(MockSigner::default());
    let connector = Arc::new(MockConnector::default());
    let launcher = Arc::new(MockLauncher::default());
    let collab = Collaborators {
        provider: Arc::clone(&provider) as Arc<dyn Provider>,
        signer: Arc::clone(&signer) as Arc<dyn SoftwareSigner>,
        hardware: Arc::clone(&connector) as Arc<dyn HardwareConnector>,
        launcher: Arc::clone(&launcher) as Arc<dyn PopupLauncher>,
    };
    Harness {
        ctl: Controller::new(ControllerConfig::default(), collab, store),
        provider,
        signer,
        connector,
        launcher,
    }
}

fn secret(s: &str) -> SecretString {
    SecretString::new(s.into())
}

pub(crate) fn software_store() -> eyre::Result<StateStore> {
    let store = StateStore::in_memory();
    let vault = SecretVault::new(KeyDerivation::Sha256).encrypt(WORDS, &secret(PASSWORD))?;
    let vault = vault.to_string();
    let pwd_hash = fingerprint(PASSWORD);
    let address = me();
    store.set_many(&[
        (KEY_ADDRESS, address.as_str()),
        (KEY_WORDS, vault.as_str()),
        (KEY_PWD_HASH, pwd_hash.as_str()),
        (KEY_IS_LEDGER, "false"),
        (KEY_WALLET_VERSION, "v3R2"),
    ])?;
    Ok(store)
}

/// Let spawned tasks run until everything is parked. The paused clock only advances once
/// the runtime is idle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<UiMessage>) -> Vec<UiMessage> {
    let mut out = Vec::new();
    while let Ok(m) = rx.try_recv() {
        out.push(m);
    }
    out
}
