//! Narrow contracts for the external collaborators the controller drives: the ledger RPC
//! provider, the software signer (mnemonic handling and wallet-contract construction), the
//! hardware signer and the platform hook that opens the UI surface.

use crate::{errors::WalletError, history::RawTransaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use zeroize::Zeroizing;

/// Account state string reported for a deployed contract.
pub const ACCOUNT_STATE_ACTIVE: &str = "active";

/// Outbound transfer send mode: pay fees separately, ignore action-phase errors.
pub const TRANSFER_SEND_MODE: u8 = 3;

/// Hardware account index used for the single wallet this controller manages.
pub const HARDWARE_ACCOUNT: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInfo {
    pub balance: u128,
    pub account_state: String,
    pub seqno: Option<u32>,
}

impl WalletInfo {
    /// A contract counts as initialized only when it is active and reports a non-zero seqno.
    pub fn is_contract_initialized(&self) -> bool {
        self.account_state == ACCOUNT_STATE_ACTIVE && self.seqno.is_some_and(|s| s != 0)
    }

    /// Sequence number for the next signed message. An undeployed contract uses 1.
    pub fn next_seqno(&self) -> u32 {
        match self.seqno {
            Some(s) if s != 0 => s,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInit {
    pub code_b64: String,
    pub data_b64: String,
}

/// A signed external message, opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedQuery {
    /// Wallet contract the message is addressed to.
    pub address: String,
    pub body_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_init: Option<StateInit>,
    /// Fully serialized external message ready for broadcast.
    pub message_boc_b64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeEstimate {
    pub in_fwd_fee: u128,
    pub storage_fee: u128,
    pub gas_fee: u128,
    pub fwd_fee: u128,
}

impl FeeEstimate {
    pub const fn total(&self) -> u128 {
        self.in_fwd_fee
            .saturating_add(self.storage_fee)
            .saturating_add(self.gas_fee)
            .saturating_add(self.fwd_fee)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Accepted,
    Rejected(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn wallet_info(&self, address: &str) -> eyre::Result<WalletInfo>;
    async fn transactions(&self, address: &str, limit: u32) -> eyre::Result<Vec<RawTransaction>>;
    async fn estimate_fee(&self, query: &SignedQuery) -> eyre::Result<FeeEstimate>;
    async fn broadcast(&self, query: &SignedQuery) -> eyre::Result<BroadcastOutcome>;
}

pub struct KeyPair {
    pub public_key: [u8; 32],
    pub secret_seed: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Which deployed wallet contract the session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRef {
    pub version: String,
    pub address: String,
    pub public_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferParams {
    pub to: String,
    pub amount: u128,
    pub seqno: u32,
    pub comment: Option<String>,
    pub send_mode: u8,
}

#[async_trait]
pub trait SoftwareSigner: Send + Sync {
    async fn generate_mnemonic(&self) -> eyre::Result<Vec<String>>;
    async fn key_pair(&self, words: &[String]) -> eyre::Result<KeyPair>;

    /// All wallet contract versions, oldest first.
    fn versions(&self) -> Vec<String>;
    fn default_version(&self) -> String;
    async fn address_for(&self, version: &str, public_key: &[u8; 32]) -> eyre::Result<String>;

    /// Build a transfer. Without a key pair the message is unsigned (fee estimation only).
    async fn transfer(
        &self,
        contract: &ContractRef,
        key_pair: Option<&KeyPair>,
        params: &TransferParams,
    ) -> eyre::Result<SignedQuery>;

    async fn deploy(&self, contract: &ContractRef, key_pair: &KeyPair) -> eyre::Result<SignedQuery>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Hid,
    Ble,
}

impl TransportType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hid => "hid",
            Self::Ble => "ble",
        }
    }
}

impl FromStr for TransportType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hid" => Ok(Self::Hid),
            "ble" => Ok(Self::Ble),
            other => Err(WalletError::UnknownTransportType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareAccount {
    pub address: String,
    pub public_key: [u8; 32],
    pub version: String,
}

#[async_trait]
pub trait HardwareSigner: Send + Sync {
    async fn app_configuration(&self) -> eyre::Result<String>;
    async fn account(&self, index: u32, show_on_device: bool) -> eyre::Result<HardwareAccount>;
    async fn transfer(
        &self,
        index: u32,
        contract: &ContractRef,
        params: &TransferParams,
    ) -> eyre::Result<SignedQuery>;
    async fn deploy(&self, index: u32, contract: &ContractRef) -> eyre::Result<SignedQuery>;
}

#[async_trait]
pub trait HardwareConnector: Send + Sync {
    async fn connect(&self, transport: TransportType) -> eyre::Result<Arc<dyn HardwareSigner>>;
}

/// Platform hook that spawns the UI surface when a page client needs it.
pub trait PopupLauncher: Send + Sync {
    fn open_popup(&self);
}

/// The external collaborators injected into a controller.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn Provider>,
    pub signer: Arc<dyn SoftwareSigner>,
    pub hardware: Arc<dyn HardwareConnector>,
    pub launcher: Arc<dyn PopupLauncher>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeployed_contract_uses_seqno_one() {
        let fresh = WalletInfo {
            balance: 10,
            account_state: "uninitialized".into(),
            seqno: None,
        };
        assert!(!fresh.is_contract_initialized());
        assert_eq!(fresh.next_seqno(), 1);

        let zero = WalletInfo {
            seqno: Some(0),
            account_state: ACCOUNT_STATE_ACTIVE.into(),
            ..fresh.clone()
        };
        assert!(!zero.is_contract_initialized());
        assert_eq!(zero.next_seqno(), 1);

        let live = WalletInfo {
            seqno: Some(7),
            account_state: ACCOUNT_STATE_ACTIVE.into(),
            ..fresh
        };
        assert!(live.is_contract_initialized());
        assert_eq!(live.next_seqno(), 7);
    }

    #[test]
    fn transport_types() {
        assert_eq!("ble".parse::<TransportType>(), Ok(TransportType::Ble));
        assert_eq!(
            "usb".parse::<TransportType>(),
            Err(WalletError::UnknownTransportType("usb".into()))
        );
    }

    #[test]
    fn fee_total_sums_components() {
        let f = FeeEstimate {
            in_fwd_fee: 1,
            storage_fee: 2,
            gas_fee: 3,
            fwd_fee: 4,
        };
        assert_eq!(f.total(), 10);
    }
}
