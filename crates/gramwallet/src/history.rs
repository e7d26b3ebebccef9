use crate::amount::parse_nano;
use base64::Engine as _;
use eyre::Context as _;
use serde::{Deserialize, Serialize, Serializer};

const MSG_DATA_TEXT: &str = "msg.dataText";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessageData {
    #[serde(rename = "@type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub msg_data: Option<RawMessageData>,
}

/// A transaction as the ledger provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub utime: i64,
    #[serde(default)]
    pub fee: String,
    #[serde(default)]
    pub storage_fee: String,
    #[serde(default)]
    pub other_fee: String,
    #[serde(default)]
    pub in_msg: RawMessage,
    #[serde(default)]
    pub out_msgs: Vec<RawMessage>,
}

fn as_string<S: Serializer, T: ToString>(v: &T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

/// A wallet-relative transaction, newest first in the session cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    /// Net effect on this wallet: incoming value minus all outgoing values.
    #[serde(serialize_with = "as_string")]
    pub amount: i128,
    #[serde(rename = "from_addr")]
    pub from_addr: String,
    #[serde(rename = "to_addr")]
    pub to_addr: String,
    #[serde(serialize_with = "as_string")]
    pub fee: u128,
    #[serde(serialize_with = "as_string")]
    pub storage_fee: u128,
    #[serde(serialize_with = "as_string")]
    pub other_fee: u128,
    pub comment: String,
    /// Milliseconds since the epoch.
    pub date: i64,
}

fn parse_fee(s: &str) -> eyre::Result<u128> {
    if s.trim().is_empty() {
        return Ok(0);
    }
    parse_nano(s)
}

fn comment_of(msg: &RawMessage) -> String {
    let Some(data) = &msg.msg_data else {
        return String::new();
    };
    if data.kind != MSG_DATA_TEXT {
        return String::new();
    }
    data.text
        .as_deref()
        .and_then(|t| base64::engine::general_purpose::STANDARD.decode(t).ok())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

fn signed(v: u128) -> eyre::Result<i128> {
    i128::try_from(v).map_err(|_e| eyre::eyre!("amount out of range"))
}

/// Turn a single provider transaction into the wallet view.
///
/// Returns `None` for contract deployment (neither an inbound transfer nor an outbound
/// message) and for transactions with no counterparty.
pub fn normalize(t: &RawTransaction) -> eyre::Result<Option<WalletTransaction>> {
    let in_value = if t.in_msg.value.trim().is_empty() {
        0
    } else {
        parse_nano(&t.in_msg.value).context("in_msg value")?
    };
    let mut amount = signed(in_value)?;
    for out in &t.out_msgs {
        let v = parse_nano(&out.value).context("out_msg value")?;
        amount = amount
            .checked_sub(signed(v)?)
            .ok_or_else(|| eyre::eyre!("amount underflow"))?;
    }

    let (from_addr, to_addr, comment) = if !t.in_msg.source.is_empty() {
        (
            t.in_msg.source.clone(),
            t.in_msg.destination.clone(),
            comment_of(&t.in_msg),
        )
    } else if let Some(first) = t.out_msgs.first() {
        // Multiple outgoing messages are reported under the first one.
        (
            first.source.clone(),
            first.destination.clone(),
            comment_of(first),
        )
    } else {
        return Ok(None);
    };

    if to_addr.is_empty() {
        return Ok(None);
    }

    Ok(Some(WalletTransaction {
        amount,
        from_addr,
        to_addr,
        fee: parse_fee(&t.fee)?,
        storage_fee: parse_fee(&t.storage_fee)?,
        other_fee: parse_fee(&t.other_fee)?,
        comment,
        date: t.utime.saturating_mul(1000),
    }))
}

pub fn normalize_all(raw: &[RawTransaction]) -> eyre::Result<Vec<WalletTransaction>> {
    let mut out = Vec::with_capacity(raw.len());
    for t in raw {
        if let Some(tx) = normalize(t)? {
            out.push(tx);
        }
    }
    Ok(out)
}
