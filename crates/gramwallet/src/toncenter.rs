//! `Provider` over the toncenter v2 JSON-RPC HTTP API, with failover across the configured
//! endpoints.

use crate::{
    amount::parse_nano,
    config::ControllerConfig,
    history::RawTransaction,
    ledger::{BroadcastOutcome, FeeEstimate, Provider, SignedQuery, WalletInfo},
    retry::{across_endpoints, Backoff},
};
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const API_KEY_HEADER: &str = "X-API-Key";

fn allow_insecure_http() -> bool {
    std::env::var("GRAMWALLET_ALLOW_INSECURE_HTTP")
        .ok()
        .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
}

fn host_prefix_ok(s: &str, prefix: &str) -> bool {
    if !s.starts_with(prefix) {
        return false;
    }
    matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
}

/// HTTPS anywhere, plain HTTP only on loopback unless explicitly allowed.
pub fn endpoint_is_allowed(url: &str) -> bool {
    let s = url.trim();
    s.starts_with("https://")
        || host_prefix_ok(s, "http://127.0.0.1")
        || host_prefix_ok(s, "http://localhost")
        || host_prefix_ok(s, "http://[::1]")
        || allow_insecure_http()
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

impl Reply {
    fn failure(&self) -> String {
        let msg = self.error.as_deref().unwrap_or("unknown error");
        match self.code {
            Some(c) => format!("{msg} (code {c})"),
            None => msg.to_owned(),
        }
    }
}

fn nano_of(v: &Value) -> eyre::Result<u128> {
    match v {
        Value::String(s) => parse_nano(s),
        Value::Number(n) => parse_nano(&n.to_string()),
        Value::Null => Ok(0),
        other => eyre::bail!("unexpected amount: {other}"),
    }
}

#[derive(Debug, Deserialize)]
struct WalletInformation {
    #[serde(default)]
    balance: Value,
    #[serde(default)]
    account_state: String,
    #[serde(default)]
    seqno: Option<u32>,
}

impl TryFrom<WalletInformation> for WalletInfo {
    type Error = eyre::Report;

    fn try_from(w: WalletInformation) -> eyre::Result<Self> {
        Ok(Self {
            balance: nano_of(&w.balance).context("wallet balance")?,
            account_state: w.account_state,
            seqno: w.seqno,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SourceFees {
    #[serde(default)]
    in_fwd_fee: Value,
    #[serde(default)]
    storage_fee: Value,
    #[serde(default)]
    gas_fee: Value,
    #[serde(default)]
    fwd_fee: Value,
}

#[derive(Debug, Deserialize)]
struct Fees {
    source_fees: SourceFees,
}

impl TryFrom<Fees> for FeeEstimate {
    type Error = eyre::Report;

    fn try_from(f: Fees) -> eyre::Result<Self> {
        let s = f.source_fees;
        Ok(Self {
            in_fwd_fee: nano_of(&s.in_fwd_fee)?,
            storage_fee: nano_of(&s.storage_fee)?,
            gas_fee: nano_of(&s.gas_fee)?,
            fwd_fee: nano_of(&s.fwd_fee)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ToncenterProvider {
    client: Client,
    endpoints: Vec<String>,
    api_key: Option<String>,
    backoff: Backoff,
}

impl ToncenterProvider {
    pub fn new(cfg: &ControllerConfig) -> eyre::Result<Self> {
        let endpoints: Vec<String> = cfg
            .provider_endpoints()
            .into_iter()
            .filter(|u| {
                let ok = endpoint_is_allowed(u);
                if !ok {
                    tracing::warn!(endpoint = %u, "ignoring insecure provider endpoint");
                }
                ok
            })
            .collect();
        if endpoints.is_empty() {
            eyre::bail!("no usable provider endpoints");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.provider.request_timeout_ms.max(1)))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoints,
            api_key: cfg.provider.api_key.clone(),
            backoff: Backoff::default(),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// One request to one endpoint. Any parsed reply is returned, including `ok: false`.
    async fn post(&self, endpoint: &str, method: &str, params: &Value) -> eyre::Result<Reply> {
        let mut req = self.client.post(endpoint).json(&json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }));
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("toncenter {method} request"))?;
        let status = resp.status();
        resp.json::<Reply>()
            .await
            .with_context(|| format!("toncenter {method} reply (http {status})"))
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> eyre::Result<T> {
        let params = &params;
        let reply = across_endpoints(
            &self.endpoints,
            &self.backoff,
            |endpoint| {
                let endpoint = endpoint.to_owned();
                async move {
                    let reply = self.post(&endpoint, method, params).await?;
                    if !reply.ok {
                        eyre::bail!("toncenter {method}: {}", reply.failure());
                    }
                    Ok(reply)
                }
            },
            method,
        )
        .await?;
        serde_json::from_value(reply.result).with_context(|| format!("decode {method} result"))
    }
}

#[async_trait]
impl Provider for ToncenterProvider {
    async fn wallet_info(&self, address: &str) -> eyre::Result<WalletInfo> {
        let w: WalletInformation = self
            .call("getWalletInformation", json!({ "address": address }))
            .await?;
        w.try_into()
    }

    async fn transactions(&self, address: &str, limit: u32) -> eyre::Result<Vec<RawTransaction>> {
        self.call(
            "getTransactions",
            json!({ "address": address, "limit": limit }),
        )
        .await
    }

    async fn estimate_fee(&self, query: &SignedQuery) -> eyre::Result<FeeEstimate> {
        let (init_code, init_data) = query
            .state_init
            .as_ref()
            .map(|s| (s.code_b64.as_str(), s.data_b64.as_str()))
            .unwrap_or_default();
        let fees: Fees = self
            .call(
                "estimateFee",
                json!({
                    "address": query.address,
                    "body": query.body_b64,
                    "init_code": init_code,
                    "init_data": init_data,
                    "ignore_chksig": true,
                }),
            )
            .await?;
        fees.try_into()
    }

    /// The first endpoint that answers decides; a rejection is not retried elsewhere.
    async fn broadcast(&self, query: &SignedQuery) -> eyre::Result<BroadcastOutcome> {
        let params = json!({ "boc": query.message_boc_b64 });
        let params = &params;
        let reply = across_endpoints(
            &self.endpoints,
            &Backoff::single_pass(),
            |endpoint| {
                let endpoint = endpoint.to_owned();
                async move { self.post(&endpoint, "sendBoc", params).await }
            },
            "sendBoc",
        )
        .await?;
        if reply.ok {
            Ok(BroadcastOutcome::Accepted)
        } else {
            Ok(BroadcastOutcome::Rejected(reply.failure()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ACCOUNT_STATE_ACTIVE;

    #[test]
    fn wallet_information_accepts_string_balance() -> eyre::Result<()> {
        let w: WalletInformation = serde_json::from_value(json!({
            "wallet": true,
            "balance": "1500000000",
            "account_state": "active",
            "wallet_type": "wallet v3 r2",
            "seqno": 12,
        }))?;
        let info = WalletInfo::try_from(w)?;
        assert_eq!(info.balance, 1_500_000_000);
        assert_eq!(info.account_state, ACCOUNT_STATE_ACTIVE);
        assert_eq!(info.seqno, Some(12));
        Ok(())
    }

    #[test]
    fn uninitialized_wallet_has_no_seqno() -> eyre::Result<()> {
        let w: WalletInformation = serde_json::from_value(json!({
            "wallet": false,
            "balance": 0,
            "account_state": "uninitialized",
        }))?;
        let info = WalletInfo::try_from(w)?;
        assert!(!info.is_contract_initialized());
        assert_eq!(info.balance, 0);
        Ok(())
    }

    #[test]
    fn fees_sum_source_components() -> eyre::Result<()> {
        let f: Fees = serde_json::from_value(json!({
            "@type": "query.fees",
            "source_fees": { "in_fwd_fee": 1000, "storage_fee": 20, "gas_fee": 3000, "fwd_fee": 400 },
            "destination_fees": [],
        }))?;
        assert_eq!(FeeEstimate::try_from(f)?.total(), 4420);
        Ok(())
    }

    #[test]
    fn failed_reply_carries_code() -> eyre::Result<()> {
        let r: Reply = serde_json::from_value(json!({
            "ok": false,
            "error": "LITE_SERVER_UNKNOWN: cannot apply external message",
            "code": 500,
        }))?;
        assert!(!r.ok);
        assert_eq!(
            r.failure(),
            "LITE_SERVER_UNKNOWN: cannot apply external message (code 500)"
        );
        Ok(())
    }

    #[test]
    fn transactions_decode_into_raw_form() -> eyre::Result<()> {
        let txs: Vec<RawTransaction> = serde_json::from_value(json!([{
            "@type": "raw.transaction",
            "utime": 1_700_000_000,
            "fee": "1000",
            "storage_fee": "1",
            "other_fee": "999",
            "in_msg": { "source": "", "destination": "", "value": "0" },
            "out_msgs": [{ "source": "EQa", "destination": "EQb", "value": "42",
                           "msg_data": { "@type": "msg.dataText", "text": "aGk=" } }],
        }]))?;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs.first().map(|t| t.out_msgs.len()), Some(1));
        Ok(())
    }

    #[test]
    fn plain_http_only_on_loopback() {
        assert!(endpoint_is_allowed("https://toncenter.com/api/v2/jsonRPC"));
        assert!(endpoint_is_allowed("http://127.0.0.1:8081/jsonRPC"));
        assert!(!endpoint_is_allowed("http://localhost.evil.example/jsonRPC"));
    }

    #[test]
    fn keeps_allowed_endpoints_in_order() -> eyre::Result<()> {
        let mut cfg = ControllerConfig::default();
        cfg.provider.fallback_urls_mainnet = vec!["http://127.0.0.1:9/jsonRPC".into()];
        let p = ToncenterProvider::new(&cfg)?;
        assert_eq!(p.endpoints().len(), 2);
        assert_eq!(
            p.endpoints().first().map(String::as_str),
            Some(crate::config::TONCENTER_MAINNET_URL)
        );
        Ok(())
    }
}
