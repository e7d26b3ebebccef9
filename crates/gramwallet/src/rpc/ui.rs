//! Messages exchanged with the UI surface.
//!
//! Controller to UI is fire-and-forget `{method, params}`. UI to controller uses the same
//! shape, decoded into [`UiRequest`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl UiMessage {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            method: method.to_owned(),
            params,
        }
    }

    pub fn show_screen(name: &str) -> Self {
        Self::new("showScreen", json!({ "name": name }))
    }

    pub fn show_popup(name: &str) -> Self {
        Self::new("showPopup", json!({ "name": name }))
    }

    pub fn close_popup() -> Self {
        Self::new("closePopup", Value::Null)
    }

    pub fn alert(message: &str) -> Self {
        Self::new("showAlert", json!({ "message": message }))
    }

    pub fn set_password_hash(hash: Option<&str>) -> Self {
        Self::new("setPasswordHash", json!(hash))
    }

    pub fn set_public_key(hex_key: Option<&str>) -> Self {
        Self::new("setPublicKey", json!(hex_key))
    }

    pub fn set_is_ledger(is_ledger: bool) -> Self {
        Self::new("setIsLedger", json!(is_ledger))
    }

    pub fn disable_created(disabled: bool) -> Self {
        Self::new("disableCreated", json!(disabled))
    }
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRequest {
    pub name: String,
    #[serde(default)]
    pub transport_type: Option<String>,
}

/// Requests the UI sends to the controller. Carries passwords: no `Debug`, log
/// [`UiRequest::method`] instead.
#[derive(Clone, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum UiRequest {
    ShowScreen(ScreenRequest),
    Import {
        words: Vec<String>,
    },
    CreatePrivateKey,
    PasswordCreated {
        password: String,
    },
    OnEnterPassword {
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    OnChangePassword {
        old_password: String,
        new_password: String,
    },
    #[serde(rename_all = "camelCase")]
    OnSend {
        amount: String,
        to_address: String,
        #[serde(default)]
        comment: Option<String>,
    },
    OnBackupDone,
    ShowMain,
    OnBackupWalletClick,
    Disconnect,
    OnClosePopup,
    Update,
    ShowAddressOnDevice,
}

impl UiRequest {
    pub const fn method(&self) -> &'static str {
        match self {
            Self::ShowScreen(_) => "showScreen",
            Self::Import { .. } => "import",
            Self::CreatePrivateKey => "createPrivateKey",
            Self::PasswordCreated { .. } => "passwordCreated",
            Self::OnEnterPassword { .. } => "onEnterPassword",
            Self::OnChangePassword { .. } => "onChangePassword",
            Self::OnSend { .. } => "onSend",
            Self::OnBackupDone => "onBackupDone",
            Self::ShowMain => "showMain",
            Self::OnBackupWalletClick => "onBackupWalletClick",
            Self::Disconnect => "disconnect",
            Self::OnClosePopup => "onClosePopup",
            Self::Update => "update",
            Self::ShowAddressOnDevice => "showAddressOnDevice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_requests_with_and_without_params() -> eyre::Result<()> {
        let r: UiRequest = serde_json::from_str(r#"{"method":"update"}"#)?;
        assert_eq!(r.method(), "update");

        let r: UiRequest = serde_json::from_str(
            r#"{"method":"onSend","params":{"amount":"100","toAddress":"EQx","comment":"hi"}}"#,
        )?;
        let UiRequest::OnSend {
            amount,
            to_address,
            comment,
        } = r
        else {
            eyre::bail!("expected onSend");
        };
        assert_eq!(amount, "100");
        assert_eq!(to_address, "EQx");
        assert_eq!(comment.as_deref(), Some("hi"));

        let r: UiRequest = serde_json::from_str(
            r#"{"method":"showScreen","params":{"name":"importLedger","transportType":"ble"}}"#,
        )?;
        let UiRequest::ShowScreen(s) = r else {
            eyre::bail!("expected showScreen");
        };
        assert_eq!(s.transport_type.as_deref(), Some("ble"));
        Ok(())
    }

    #[test]
    fn unknown_method_fails_to_decode() {
        assert!(serde_json::from_str::<UiRequest>(r#"{"method":"selfDestruct"}"#).is_err());
    }

    #[test]
    fn close_popup_has_no_params() -> eyre::Result<()> {
        let s = serde_json::to_string(&UiMessage::close_popup())?;
        assert_eq!(s, r#"{"method":"closePopup"}"#);
        Ok(())
    }
}
