//! JSON-RPC envelope spoken with the page-embedded client.

use crate::errors::{RpcError, RPC_INVALID_PARAMS, RPC_METHOD_NOT_FOUND};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_TYPE: &str = "gramWalletAPI";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: PageMessage,
}

impl PageEnvelope {
    fn wrap(message: PageMessage) -> Self {
        Self {
            kind: ENVELOPE_TYPE.to_owned(),
            message,
        }
    }

    /// Unsolicited broadcast (no id).
    pub fn notification(method: &str, params: Value) -> Self {
        Self::wrap(PageMessage {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.to_owned(),
            params,
            result: None,
            error: None,
        })
    }

    pub fn ok(id: Value, method: &str, result: Value) -> Self {
        Self::wrap(PageMessage {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.to_owned(),
            params: Value::Null,
            result: Some(result),
            error: None,
        })
    }

    pub fn err(id: Value, method: &str, error: RpcError) -> Self {
        Self::wrap(PageMessage {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.to_owned(),
            params: Value::Null,
            result: None,
            error: Some(error),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTransactionParams {
    pub value: String,
    pub to: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    RequestAccounts,
    GetBalance,
    SendTransaction(SendTransactionParams),
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PageRequest {
    pub fn parse(method: &str, params: &Value) -> Result<Self, RpcError> {
        match method {
            "ton_requestAccounts" => Ok(Self::RequestAccounts),
            "ton_getBalance" => Ok(Self::GetBalance),
            "ton_sendTransaction" => {
                let p = params
                    .get(0)
                    .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMS, "missing params[0]"))?;
                let value = p
                    .get("value")
                    .and_then(scalar_to_string)
                    .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMS, "missing value"))?;
                let to = p
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMS, "missing to"))?
                    .to_owned();
                let data = p.get("data").and_then(Value::as_str).map(str::to_owned);
                Ok(Self::SendTransaction(SendTransactionParams { value, to, data }))
            }
            other => Err(RpcError::new(
                RPC_METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_transaction() -> eyre::Result<()> {
        let req = PageRequest::parse(
            "ton_sendTransaction",
            &json!([{ "value": 1500, "to": "EQdest", "data": "memo" }]),
        )
        .map_err(|e| eyre::eyre!(e.message))?;
        assert_eq!(
            req,
            PageRequest::SendTransaction(SendTransactionParams {
                value: "1500".into(),
                to: "EQdest".into(),
                data: Some("memo".into()),
            })
        );
        Ok(())
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let e = PageRequest::parse("eth_chainId", &Value::Null).err();
        assert_eq!(e.map(|e| e.code), Some(RPC_METHOD_NOT_FOUND));
    }

    #[test]
    fn response_echoes_id_and_method() -> eyre::Result<()> {
        let env = PageEnvelope::ok(json!(7), "ton_getBalance", json!("42"));
        let v = serde_json::to_value(&env)?;
        assert_eq!(v["type"], ENVELOPE_TYPE);
        assert_eq!(v["message"]["id"], 7);
        assert_eq!(v["message"]["method"], "ton_getBalance");
        assert_eq!(v["message"]["result"], "42");
        assert!(v["message"].get("error").is_none());
        Ok(())
    }
}
