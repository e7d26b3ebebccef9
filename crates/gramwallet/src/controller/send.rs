//! Outbound transfers: local guards, fee preview, signing, deploy-then-transfer and failure
//! reporting. Confirmation itself happens in `Controller::refresh`.

use super::{bounded, onboarding, Controller, CoreState, PendingAction};
use crate::{
    address::{Address, FriendlyFormat},
    amount::parse_nano,
    errors::WalletError,
    ledger::{
        BroadcastOutcome, ContractRef, HardwareSigner, KeyPair, SignedQuery, TransferParams,
        HARDWARE_ACCOUNT, TRANSFER_SEND_MODE,
    },
    reconciler::{AuthorizedSend, SubmitPhase},
    rpc::ui::UiMessage,
    session::SignerMode,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Fee shown while the sender contract is not deployed yet (deployment plus first transfer).
pub const DEPLOY_FEE_ESTIMATE: u128 = 10_966_001;

const ALERT_SENDING: &str = "Error sending";
const ALERT_DEPLOY: &str = "Deploy contract error";
const ALERT_BROADCAST: &str = "Send error";

struct SendFailure {
    alert: &'static str,
    error: WalletError,
}

impl SendFailure {
    const fn sending(error: WalletError) -> Self {
        Self {
            alert: ALERT_SENDING,
            error,
        }
    }
}

fn contract_of(s: &CoreState, default_version: String) -> Option<(ContractRef, SignerMode)> {
    let cur = s.session.current()?;
    Some((
        ContractRef {
            version: cur.wallet_version.clone().unwrap_or(default_version),
            address: cur.address.clone(),
            public_key: cur.public_key,
        },
        cur.signer_mode,
    ))
}

/// `onSend` and `ton_sendTransaction`. Guard failures are returned without touching the UI.
pub(super) async fn on_send(
    ctl: &Controller,
    amount: &str,
    to: &str,
    comment: Option<String>,
    need_queue: bool,
) -> eyre::Result<()> {
    let amount = parse_nano(amount).map_err(|e| WalletError::Validation(e.to_string()))?;
    let (send, mode) = ctl.with_state(|s| {
        let cur = s.session.current().ok_or(WalletError::NotInitialized)?;
        let mode = cur.signer_mode;
        let send = s.reconciler.authorize(amount, to, comment, cur.balance)?;
        Ok::<_, WalletError>((send, mode))
    })?;

    match mode {
        SignerMode::Hardware => {
            ctl.with_state(|s| s.reconciler.begin_signing(&send))?;
            ctl.send_ui_queued(UiMessage::show_popup("processing"), need_queue);
            spawn_submit(ctl, send, None);
        }
        SignerMode::Software => {
            let fee = estimate_fee(ctl, &send).await;
            let popup = UiMessage::new(
                "showPopup",
                json!({
                    "name": "sendConfirm",
                    "amount": send.amount.to_string(),
                    "toAddress": send.to,
                    "fee": fee.to_string(),
                }),
            );
            ctl.with_state(|s| s.pending_action = Some(PendingAction::SendConfirm(send)));
            ctl.send_ui_queued(popup, need_queue);
        }
    }
    Ok(())
}

/// Fee preview for the confirmation popup. Never fails: estimation errors show as zero.
pub(super) async fn estimate_fee(ctl: &Controller, send: &AuthorizedSend) -> u128 {
    let signer = &ctl.inner.collab.signer;
    let provider = &ctl.inner.collab.provider;
    let Some((initialized, contract)) = ctl.with_state(|s| {
        let initialized = s.session.current()?.contract_initialized;
        contract_of(s, signer.default_version()).map(|(c, _)| (initialized, c))
    }) else {
        return 0;
    };
    if !initialized {
        return DEPLOY_FEE_ESTIMATE;
    }

    let estimate = async {
        let info = provider.wallet_info(&contract.address).await?;
        let params = TransferParams {
            to: send.to.clone(),
            amount: send.amount,
            seqno: info.next_seqno(),
            comment: send.comment.clone(),
            send_mode: TRANSFER_SEND_MODE,
        };
        let unsigned = signer.transfer(&contract, None, &params).await?;
        Ok::<_, eyre::Report>(provider.estimate_fee(&unsigned).await?.total())
    };
    match estimate.await {
        Ok(fee) => fee,
        Err(e) => {
            tracing::warn!(error = %e, "fee estimation failed");
            0
        }
    }
}

/// The password for a pending confirmation checked out: unlock the words and start signing.
pub(super) fn confirm(
    ctl: &Controller,
    send: AuthorizedSend,
    password: &SecretString,
) -> eyre::Result<()> {
    let words = onboarding::load_words(ctl, password)?;
    ctl.with_state(|s| s.reconciler.begin_signing(&send))?;
    ctl.send_ui(UiMessage::show_popup("processing"));
    spawn_submit(ctl, send, Some(words));
    Ok(())
}

fn spawn_submit(ctl: &Controller, send: AuthorizedSend, words: Option<Zeroizing<Vec<String>>>) {
    let ctl = ctl.clone();
    tokio::spawn(async move { submit(&ctl, &send, words).await });
}

/// Sign and submit. Any failure marks the transfer failed and alerts, unless the session this
/// transfer belonged to is gone.
async fn submit(ctl: &Controller, send: &AuthorizedSend, words: Option<Zeroizing<Vec<String>>>) {
    let Some(epoch) = ctl.with_state(|s| s.session.current().map(|_| s.session.epoch())) else {
        return;
    };
    let Err(failure) = try_submit(ctl, epoch, send, words).await else {
        return;
    };
    tracing::warn!(error = %failure.error, to = %send.to, "transfer failed");
    let live = ctl.with_state(|s| {
        let live = s.session.is_current(epoch);
        if live {
            s.reconciler.fail();
        }
        live
    });
    if live {
        ctl.alert(failure.alert);
    }
}

enum ActiveSigner {
    Software(KeyPair),
    Hardware(Arc<dyn HardwareSigner>),
}

impl ActiveSigner {
    async fn transfer(
        &self,
        ctl: &Controller,
        contract: &ContractRef,
        params: &TransferParams,
    ) -> Result<SignedQuery, WalletError> {
        let limit = ctl.inner.config.signer_timeout();
        match self {
            Self::Software(kp) => {
                bounded(
                    "signing",
                    limit,
                    ctl.inner.collab.signer.transfer(contract, Some(kp), params),
                    WalletError::Transport,
                )
                .await
            }
            Self::Hardware(hw) => {
                bounded(
                    "hardware signing",
                    limit,
                    hw.transfer(HARDWARE_ACCOUNT, contract, params),
                    WalletError::Transport,
                )
                .await
            }
        }
    }

    async fn deploy(
        &self,
        ctl: &Controller,
        contract: &ContractRef,
    ) -> Result<SignedQuery, WalletError> {
        let limit = ctl.inner.config.signer_timeout();
        match self {
            Self::Software(kp) => {
                bounded(
                    "signing",
                    limit,
                    ctl.inner.collab.signer.deploy(contract, kp),
                    WalletError::Transport,
                )
                .await
            }
            Self::Hardware(hw) => {
                bounded(
                    "hardware signing",
                    limit,
                    hw.deploy(HARDWARE_ACCOUNT, contract),
                    WalletError::Transport,
                )
                .await
            }
        }
    }
}

async fn try_submit(
    ctl: &Controller,
    epoch: u64,
    send: &AuthorizedSend,
    words: Option<Zeroizing<Vec<String>>>,
) -> Result<(), SendFailure> {
    let provider = &ctl.inner.collab.provider;
    let signer = &ctl.inner.collab.signer;
    let lookup_limit = ctl.inner.config.broadcast_timeout();

    let dest = bounded(
        "destination lookup",
        lookup_limit,
        provider.wallet_info(&send.to),
        WalletError::Broadcast,
    )
    .await
    .map_err(SendFailure::sending)?;
    let to = if dest.is_contract_initialized() {
        send.to.clone()
    } else {
        Address::parse(&send.to)
            .map_err(|e| SendFailure::sending(WalletError::Validation(e.to_string())))?
            .to_friendly(FriendlyFormat::NON_BOUNCEABLE)
    };

    let (mut contract, mode) = ctl
        .with_state(|s| contract_of(s, signer.default_version()))
        .ok_or_else(|| SendFailure::sending(WalletError::NotInitialized))?;
    let sender = bounded(
        "wallet lookup",
        lookup_limit,
        provider.wallet_info(&contract.address),
        WalletError::Broadcast,
    )
    .await
    .map_err(SendFailure::sending)?;

    let active = match mode {
        SignerMode::Software => {
            let words = words.ok_or_else(|| SendFailure::sending(WalletError::NotInitialized))?;
            let kp = signer
                .key_pair(&words)
                .await
                .map_err(|e| SendFailure::sending(WalletError::Transport(format!("{e:#}"))))?;
            contract.public_key = Some(kp.public_key);
            ActiveSigner::Software(kp)
        }
        SignerMode::Hardware => ActiveSigner::Hardware(
            onboarding::ensure_hardware(ctl)
                .await
                .map_err(SendFailure::sending)?,
        ),
    };

    let params = TransferParams {
        to: to.clone(),
        amount: send.amount,
        seqno: sender.next_seqno(),
        comment: send.comment.clone(),
        send_mode: TRANSFER_SEND_MODE,
    };
    let transfer = active
        .transfer(ctl, &contract, &params)
        .await
        .map_err(SendFailure::sending)?;

    let initialized = sender.is_contract_initialized();
    let phase = if initialized {
        SubmitPhase::AwaitingConfirmation
    } else {
        SubmitPhase::AwaitingContractInit
    };
    let proceed = ctl.with_state(|s| {
        if !s.session.is_current(epoch) {
            return false;
        }
        s.reconciler.signed(to, transfer.clone());
        s.reconciler.submitted(phase);
        true
    });
    if !proceed {
        tracing::debug!(epoch, "session ended during signing, dropping transfer");
        return Ok(());
    }

    if initialized {
        broadcast(ctl, &transfer).await.map_err(|error| SendFailure {
            alert: ALERT_BROADCAST,
            error,
        })
    } else {
        tracing::info!(address = %contract.address, "deploying wallet contract");
        let deploy = active
            .deploy(ctl, &contract)
            .await
            .map_err(SendFailure::sending)?;
        broadcast(ctl, &deploy).await.map_err(|error| SendFailure {
            alert: ALERT_DEPLOY,
            error,
        })
    }
}

async fn broadcast(ctl: &Controller, query: &SignedQuery) -> Result<(), WalletError> {
    let outcome = bounded(
        "broadcast",
        ctl.inner.config.broadcast_timeout(),
        ctl.inner.collab.provider.broadcast(query),
        WalletError::Broadcast,
    )
    .await?;
    match outcome {
        BroadcastOutcome::Accepted => Ok(()),
        BroadcastOutcome::Rejected(reason) => Err(WalletError::Broadcast(reason)),
    }
}

/// Submit the transfer that was waiting for the sender contract to deploy.
pub(super) async fn submit_deferred(ctl: &Controller, epoch: u64, query: SignedQuery) {
    let Err(error) = broadcast(ctl, &query).await else {
        return;
    };
    tracing::warn!(error = %error, "deferred transfer failed");
    let live = ctl.with_state(|s| {
        let live = s.session.is_current(epoch);
        if live {
            s.reconciler.fail();
        }
        live
    });
    if live {
        ctl.alert(ALERT_BROADCAST);
    }
}
