use crate::vault::KdfMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TONCENTER_MAINNET_URL: &str = "https://toncenter.com/api/v2/jsonRPC";
pub const TONCENTER_TESTNET_URL: &str = "https://testnet.toncenter.com/api/v2/jsonRPC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

pub fn parse_network_mode(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "prod" | "production" => Some(NetworkMode::Mainnet),
        "testnet" | "test" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// JSON-RPC endpoint of the ledger HTTP API (mainnet).
    pub mainnet_url: String,
    /// JSON-RPC endpoint of the ledger HTTP API (testnet).
    pub testnet_url: String,
    /// Additional endpoints tried in order when the primary fails.
    pub fallback_urls_mainnet: Vec<String>,
    pub fallback_urls_testnet: Vec<String>,
    /// Optional API key sent as `X-API-Key`. Keyless access is rate limited.
    pub api_key: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mainnet_url: TONCENTER_MAINNET_URL.into(),
            testnet_url: TONCENTER_TESTNET_URL.into(),
            fallback_urls_mainnet: Vec::new(),
            fallback_urls_testnet: Vec::new(),
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub network_mode: NetworkMode,
    pub provider: ProviderConfig,

    /// Balance polling period while a session is active.
    pub poll_interval_seconds: u64,
    /// How many transactions to request per history refresh.
    pub transactions_page_size: u32,

    /// Upper bound on a single signing call (hardware confirmation included).
    pub signer_timeout_seconds: u64,
    /// Upper bound on a single broadcast call.
    pub broadcast_timeout_seconds: u64,

    /// Key derivation for newly written vaults. Existing vaults keep the scheme they were
    /// written with (a persisted `vaultSalt` means Argon2id).
    pub vault_kdf: KdfMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            network_mode: NetworkMode::Mainnet,
            provider: ProviderConfig::default(),
            poll_interval_seconds: 5,
            transactions_page_size: 20,
            signer_timeout_seconds: 60,
            broadcast_timeout_seconds: 20,
            vault_kdf: KdfMode::Sha256,
        }
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub const fn signer_timeout(&self) -> Duration {
        Duration::from_secs(self.signer_timeout_seconds)
    }

    pub const fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_seconds)
    }

    /// Provider endpoints for the active network, primary first.
    pub fn provider_endpoints(&self) -> Vec<String> {
        let (primary, fallbacks) = match self.network_mode {
            NetworkMode::Mainnet => (
                &self.provider.mainnet_url,
                &self.provider.fallback_urls_mainnet,
            ),
            NetworkMode::Testnet => (
                &self.provider.testnet_url,
                &self.provider.fallback_urls_testnet,
            ),
        };
        let mut out = vec![primary.clone()];
        out.extend(fallbacks.iter().filter(|u| *u != primary).cloned());
        out
    }
}
