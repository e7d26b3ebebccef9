use super::{bounded, Controller, Draft, PendingAction};
use crate::{
    config::ControllerConfig,
    errors::WalletError,
    ledger::{HardwareSigner, TransportType, HARDWARE_ACCOUNT},
    persist::{
        PersistedRecord, KEY_ADDRESS, KEY_IS_LEDGER, KEY_LEDGER_TRANSPORT, KEY_PUBLIC_KEY,
        KEY_PWD_HASH, KEY_VAULT_SALT, KEY_WALLET_VERSION, KEY_WORDS, LEDGER_SENTINEL,
    },
    rpc::ui::UiMessage,
    vault::{fingerprint, random_salt16, EncryptedVault, KdfMode, KeyDerivation, SecretVault},
};
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::json;
use std::sync::Arc;
use zeroize::Zeroizing;

const WORD_SEPARATOR: &str = ",";

/// Vault for newly sealed words, per the configured key derivation.
fn fresh_vault(cfg: &ControllerConfig) -> SecretVault {
    match cfg.vault_kdf {
        KdfMode::Sha256 => SecretVault::new(KeyDerivation::Sha256),
        KdfMode::Argon2id => SecretVault::new(KeyDerivation::Argon2id {
            salt: random_salt16(),
        }),
    }
}

/// Vault able to open what is stored: a persisted salt means Argon2id.
fn stored_vault(rec: &PersistedRecord) -> Result<SecretVault, WalletError> {
    let kdf = match rec.vault_salt.as_deref() {
        Some(salt) => {
            KeyDerivation::from_salt_b64(salt).map_err(|_e| WalletError::Authentication)?
        }
        None => KeyDerivation::Sha256,
    };
    Ok(SecretVault::new(kdf))
}

struct Sealed {
    vault: EncryptedVault,
    pwd_hash: String,
    salt: Option<String>,
}

fn seal_words(
    cfg: &ControllerConfig,
    words: &[String],
    password: &SecretString,
) -> eyre::Result<Sealed> {
    let vault = fresh_vault(cfg);
    let plaintext = Zeroizing::new(words.join(WORD_SEPARATOR));
    Ok(Sealed {
        vault: vault.encrypt(&plaintext, password).context("seal words")?,
        pwd_hash: fingerprint(password.expose_secret()),
        salt: vault.kdf().salt_b64(),
    })
}

/// Vault, fingerprint and salt go out in one write so the stored key derivation always matches
/// the stored vault.
fn persist_sealed(ctl: &Controller, sealed: &Sealed, extra: &[(&str, &str)]) -> eyre::Result<()> {
    let vault = sealed.vault.to_string();
    let mut updates = vec![
        (KEY_WORDS, Some(vault.as_str())),
        (KEY_PWD_HASH, Some(sealed.pwd_hash.as_str())),
        (KEY_VAULT_SALT, sealed.salt.as_deref()),
    ];
    updates.extend(extra.iter().map(|(k, v)| (*k, Some(*v))));
    ctl.inner.store.apply(&updates)
}

/// Decrypt the stored recovery words.
pub(super) fn load_words(
    ctl: &Controller,
    password: &SecretString,
) -> Result<Zeroizing<Vec<String>>, WalletError> {
    let rec = ctl.record();
    let stored = rec.words.as_deref().ok_or(WalletError::NotInitialized)?;
    if stored == LEDGER_SENTINEL {
        return Err(WalletError::NotInitialized);
    }
    let vault = EncryptedVault::parse(stored)?;
    let plaintext = stored_vault(&rec)?.decrypt(&vault, password)?;
    Ok(Zeroizing::new(
        plaintext.split(WORD_SEPARATOR).map(str::to_owned).collect(),
    ))
}

pub(super) fn verify_password(ctl: &Controller, password: &SecretString) -> Result<(), WalletError> {
    let stored = ctl.record().pwd_hash;
    if stored.as_deref() == Some(fingerprint(password.expose_secret()).as_str()) {
        Ok(())
    } else {
        Err(WalletError::Authentication)
    }
}

pub(super) async fn show_created(ctl: &Controller) -> eyre::Result<()> {
    ctl.with_router(|r| {
        r.send_to_ui(UiMessage::show_screen("created"), false);
        r.send_to_ui(UiMessage::disable_created(true), false);
    });
    let signer = &ctl.inner.collab.signer;
    let words = Zeroizing::new(signer.generate_mnemonic().await.context("generate mnemonic")?);
    let key_pair = signer.key_pair(&words).await.context("derive key pair")?;
    let version = signer.default_version();
    let address = signer
        .address_for(&version, &key_pair.public_key)
        .await
        .context("derive address")?;
    ctl.inner.store.set(KEY_WALLET_VERSION, &version)?;
    ctl.with_state(|s| s.draft = Some(Draft { words, address }));
    ctl.send_ui(UiMessage::disable_created(false));
    tracing::info!(version = %version, "new wallet generated");
    Ok(())
}

pub(super) fn create_private_key(ctl: &Controller) -> eyre::Result<()> {
    let words = ctl
        .with_state(|s| s.draft.as_ref().map(|d| d.words.clone()))
        .ok_or(WalletError::NotInitialized)?;
    show_backup(ctl, &words);
    Ok(())
}

fn show_backup(ctl: &Controller, words: &[String]) {
    ctl.send_ui(UiMessage::new(
        "showScreen",
        json!({ "name": "backup", "words": words }),
    ));
}

/// Restore from recovery words. Every known contract version is probed and the one holding
/// the largest positive balance wins; with no funded version the default is used.
pub(super) async fn import(ctl: &Controller, words: Vec<String>) -> eyre::Result<()> {
    let words = Zeroizing::new(words);
    if words.is_empty() {
        return Err(WalletError::Validation("empty recovery phrase".into()).into());
    }
    let signer = &ctl.inner.collab.signer;
    let provider = &ctl.inner.collab.provider;
    let key_pair = signer.key_pair(&words).await.context("derive key pair")?;

    let mut best: Option<(u128, String, String)> = None;
    for version in signer.versions() {
        let address = signer
            .address_for(&version, &key_pair.public_key)
            .await
            .context("derive address")?;
        let balance = match provider.wallet_info(&address).await {
            Ok(info) => info.balance,
            Err(e) => {
                tracing::warn!(version = %version, error = %e, "balance probe failed");
                0
            }
        };
        tracing::debug!(version = %version, address = %address, balance = %balance, "probed");
        if balance > 0 && best.as_ref().is_none_or(|(b, _, _)| balance >= *b) {
            best = Some((balance, version, address));
        }
    }

    let (version, address) = match best {
        Some((_, version, address)) => (version, address),
        None => {
            let version = signer.default_version();
            let address = signer
                .address_for(&version, &key_pair.public_key)
                .await
                .context("derive address")?;
            (version, address)
        }
    };
    ctl.inner.store.set(KEY_WALLET_VERSION, &version)?;
    ctl.with_state(|s| s.draft = Some(Draft { words, address }));
    ctl.send_ui(UiMessage::show_screen("createPassword"));
    tracing::info!(version = %version, "wallet imported");
    Ok(())
}

pub(super) fn password_created(ctl: &Controller, password: &SecretString) -> eyre::Result<()> {
    let (words, address) = ctl
        .with_state(|s| s.draft.as_ref().map(|d| (d.words.clone(), d.address.clone())))
        .ok_or(WalletError::NotInitialized)?;
    let sealed = seal_words(&ctl.inner.config, &words, password)?;
    persist_sealed(
        ctl,
        &sealed,
        &[(KEY_IS_LEDGER, "false"), (KEY_ADDRESS, address.as_str())],
    )?;
    ctl.with_state(|s| s.draft = None);
    ctl.with_router(|r| {
        r.send_to_ui(UiMessage::set_is_ledger(false), false);
        r.send_to_ui(UiMessage::set_password_hash(Some(&sealed.pwd_hash)), false);
        r.send_to_ui(UiMessage::show_screen("readyToGo"), false);
    });
    Ok(())
}

pub(super) fn backup_done(ctl: &Controller) {
    let screen = if ctl.record().words.is_some() {
        "main"
    } else {
        "createPassword"
    };
    ctl.send_ui(UiMessage::show_screen(screen));
}

pub(super) fn request_backup(ctl: &Controller) {
    ctl.with_state(|s| s.pending_action = Some(PendingAction::Backup));
    ctl.send_ui(UiMessage::show_popup("enterPassword"));
}

/// A wrong password leaves everything as it was, including the pending action.
pub(super) fn on_enter_password(ctl: &Controller, password: &SecretString) -> eyre::Result<()> {
    verify_password(ctl, password)?;
    let Some(action) = ctl.with_state(|s| s.pending_action.take()) else {
        tracing::debug!("password entered with nothing pending");
        return Ok(());
    };
    tracing::debug!(action = action.name(), "password verified");
    run_password_action(ctl, action, password)
}

pub(super) fn on_change_password(
    ctl: &Controller,
    old_password: &SecretString,
    new_password: SecretString,
) -> eyre::Result<()> {
    verify_password(ctl, old_password)?;
    run_password_action(ctl, PendingAction::ChangePassword { new_password }, old_password)
}

fn run_password_action(
    ctl: &Controller,
    action: PendingAction,
    password: &SecretString,
) -> eyre::Result<()> {
    match action {
        PendingAction::Backup => {
            let words = load_words(ctl, password)?;
            show_backup(ctl, &words);
            Ok(())
        }
        PendingAction::SendConfirm(send) => super::send::confirm(ctl, send, password),
        PendingAction::ChangePassword { new_password } => {
            let words = load_words(ctl, password)?;
            let sealed = seal_words(&ctl.inner.config, &words, &new_password)?;
            persist_sealed(ctl, &sealed, &[])?;
            ctl.with_router(|r| {
                r.send_to_ui(UiMessage::set_password_hash(Some(&sealed.pwd_hash)), false);
                r.send_to_ui(UiMessage::close_popup(), false);
            });
            tracing::info!("password changed");
            Ok(())
        }
    }
}

async fn connect_hardware(
    ctl: &Controller,
    transport: TransportType,
) -> Result<Arc<dyn HardwareSigner>, WalletError> {
    let limit = ctl.inner.config.signer_timeout();
    let hw = bounded(
        "hardware connect",
        limit,
        ctl.inner.collab.hardware.connect(transport),
        WalletError::Transport,
    )
    .await?;
    let app = bounded(
        "hardware app configuration",
        limit,
        hw.app_configuration(),
        WalletError::Transport,
    )
    .await?;
    tracing::debug!(transport = transport.as_str(), app = %app, "hardware signer connected");
    Ok(hw)
}

/// The connected hardware signer, reconnecting over the stored transport if needed.
pub(super) async fn ensure_hardware(
    ctl: &Controller,
) -> Result<Arc<dyn HardwareSigner>, WalletError> {
    if let Some(hw) = ctl.with_state(|s| s.hardware.clone()) {
        return Ok(hw);
    }
    let transport = match ctl.record().ledger_transport {
        Some(t) => t.parse()?,
        None => TransportType::default(),
    };
    let hw = connect_hardware(ctl, transport).await?;
    ctl.with_state(|s| s.hardware = Some(Arc::clone(&hw)));
    Ok(hw)
}

pub(super) async fn import_ledger(ctl: &Controller, transport: Option<&str>) -> eyre::Result<()> {
    let transport: TransportType = transport.unwrap_or_default().parse()?;
    let hw = connect_hardware(ctl, transport).await?;
    let account = bounded(
        "hardware account",
        ctl.inner.config.signer_timeout(),
        hw.account(HARDWARE_ACCOUNT, false),
        WalletError::Transport,
    )
    .await?;
    let public_key = hex::encode(account.public_key);
    ctl.inner.store.set_many(&[
        (KEY_WALLET_VERSION, account.version.as_str()),
        (KEY_ADDRESS, account.address.as_str()),
        (KEY_IS_LEDGER, "true"),
        (KEY_LEDGER_TRANSPORT, transport.as_str()),
        (KEY_PWD_HASH, LEDGER_SENTINEL),
        (KEY_WORDS, LEDGER_SENTINEL),
        (KEY_PUBLIC_KEY, public_key.as_str()),
    ])?;
    ctl.with_state(|s| s.hardware = Some(hw));
    ctl.with_router(|r| {
        r.send_to_ui(UiMessage::set_is_ledger(true), false);
        r.send_to_ui(UiMessage::show_screen("readyToGo"), false);
    });
    tracing::info!(address = %account.address, "hardware wallet imported");
    Ok(())
}

pub(super) async fn show_address_on_device(ctl: &Controller) -> eyre::Result<()> {
    if ctl.signer_mode() != Some(crate::session::SignerMode::Hardware) {
        return Err(WalletError::HardwareUnavailable.into());
    }
    let hw = ensure_hardware(ctl).await?;
    let account = bounded(
        "hardware account",
        ctl.inner.config.signer_timeout(),
        hw.account(HARDWARE_ACCOUNT, true),
        WalletError::Transport,
    )
    .await?;
    let public_key = hex::encode(account.public_key);
    ctl.send_ui(UiMessage::set_public_key(Some(&public_key)));
    Ok(())
}
