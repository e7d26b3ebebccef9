use super::{onboarding, send, Controller};
use crate::{
    errors::WalletError,
    rpc::ui::{UiMessage, UiRequest},
};
use secrecy::SecretString;

/// Surface a failed request the way its kind demands. Guard and password failures stay silent.
fn report(ctl: &Controller, method: &str, e: &eyre::Report) {
    match e.downcast_ref::<WalletError>() {
        Some(w) if w.is_user_visible() => {
            tracing::warn!(method, error = %w, "request failed");
            ctl.alert(&w.to_string());
        }
        Some(WalletError::UnknownTransportType(t)) => {
            tracing::error!(method, transport = %t, "unknown hardware transport type");
        }
        Some(w @ (WalletError::Validation(_) | WalletError::Authentication)) => {
            tracing::debug!(method, error = %w, "request rejected");
        }
        Some(w) => tracing::info!(method, error = %w, "request rejected"),
        None => tracing::warn!(method, error = %e, "request failed"),
    }
}

/// Run `fut` in the background, reporting its failure.
fn spawn_reported<F>(ctl: &Controller, method: &'static str, fut: F)
where
    F: std::future::Future<Output = eyre::Result<()>> + Send + 'static,
{
    let ctl = ctl.clone();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            report(&ctl, method, &e);
        }
    });
}

pub(super) async fn handle(ctl: &Controller, request: UiRequest) -> eyre::Result<()> {
    let method = request.method();
    tracing::debug!(method, "ui request");
    let result = match request {
        UiRequest::ShowScreen(screen) => match screen.name.as_str() {
            "created" => onboarding::show_created(ctl).await,
            "import" => {
                ctl.send_ui(UiMessage::show_screen("import"));
                Ok(())
            }
            "importLedger" => {
                onboarding::import_ledger(ctl, screen.transport_type.as_deref()).await
            }
            other => {
                tracing::debug!(screen = other, "ignoring screen request");
                Ok(())
            }
        },
        UiRequest::Import { words } => onboarding::import(ctl, words).await,
        UiRequest::CreatePrivateKey => onboarding::create_private_key(ctl),
        UiRequest::PasswordCreated { password } => {
            onboarding::password_created(ctl, &SecretString::new(password.into()))
        }
        UiRequest::OnEnterPassword { password } => {
            onboarding::on_enter_password(ctl, &SecretString::new(password.into()))
        }
        UiRequest::OnChangePassword {
            old_password,
            new_password,
        } => onboarding::on_change_password(
            ctl,
            &SecretString::new(old_password.into()),
            SecretString::new(new_password.into()),
        ),
        UiRequest::OnSend {
            amount,
            to_address,
            comment,
        } => send::on_send(ctl, &amount, &to_address, comment, false).await,
        UiRequest::OnBackupDone => {
            onboarding::backup_done(ctl);
            Ok(())
        }
        UiRequest::ShowMain => ctl.show_main().map_err(eyre::Report::from),
        UiRequest::OnBackupWalletClick => {
            onboarding::request_backup(ctl);
            Ok(())
        }
        UiRequest::Disconnect => ctl.disconnect(),
        UiRequest::OnClosePopup => {
            ctl.with_state(|s| {
                s.pending_action = None;
                s.reconciler.dismiss();
            });
            Ok(())
        }
        UiRequest::Update => {
            ctl.spawn_refresh();
            Ok(())
        }
        UiRequest::ShowAddressOnDevice => {
            let bg = ctl.clone();
            spawn_reported(ctl, method, async move {
                onboarding::show_address_on_device(&bg).await
            });
            Ok(())
        }
    };
    if let Err(e) = &result {
        report(ctl, method, e);
    }
    result
}
