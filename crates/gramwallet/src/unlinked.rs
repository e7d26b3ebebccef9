//! Stand-ins for the collaborators the daemon binary cannot provide on its own. Wallet contract
//! code and device transports live in the host; until one is linked, every signing path fails
//! loudly and the read-only surface (balance, history, page accounts) keeps working.

use crate::ledger::{
    ContractRef, HardwareConnector, HardwareSigner, KeyPair, PopupLauncher, SignedQuery,
    SoftwareSigner, TransferParams, TransportType,
};
use async_trait::async_trait;
use std::sync::Arc;

const WALLET_VERSIONS: [&str; 8] = [
    "simpleR1", "simpleR2", "simpleR3", "v2R1", "v2R2", "v3R1", "v3R2", "v4R2",
];
const DEFAULT_VERSION: &str = "v3R1";

#[derive(Debug, Default, Clone, Copy)]
pub struct UnlinkedSigner;

#[async_trait]
impl SoftwareSigner for UnlinkedSigner {
    async fn generate_mnemonic(&self) -> eyre::Result<Vec<String>> {
        eyre::bail!("no contract backend linked: cannot generate a mnemonic")
    }

    async fn key_pair(&self, _words: &[String]) -> eyre::Result<KeyPair> {
        eyre::bail!("no contract backend linked: cannot derive keys")
    }

    fn versions(&self) -> Vec<String> {
        WALLET_VERSIONS.iter().map(|v| (*v).to_owned()).collect()
    }

    fn default_version(&self) -> String {
        DEFAULT_VERSION.to_owned()
    }

    async fn address_for(&self, version: &str, _public_key: &[u8; 32]) -> eyre::Result<String> {
        eyre::bail!("no contract backend linked: cannot derive {version} address")
    }

    async fn transfer(
        &self,
        contract: &ContractRef,
        _key_pair: Option<&KeyPair>,
        _params: &TransferParams,
    ) -> eyre::Result<SignedQuery> {
        eyre::bail!(
            "no contract backend linked: cannot build {} transfer",
            contract.version
        )
    }

    async fn deploy(&self, contract: &ContractRef, _key_pair: &KeyPair) -> eyre::Result<SignedQuery> {
        eyre::bail!(
            "no contract backend linked: cannot build {} deploy",
            contract.version
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnlinkedHardware;

#[async_trait]
impl HardwareConnector for UnlinkedHardware {
    async fn connect(&self, transport: TransportType) -> eyre::Result<Arc<dyn HardwareSigner>> {
        eyre::bail!("no {} transport linked", transport.as_str())
    }
}

/// Logs the request; the UI host is expected to watch for it and attach.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLauncher;

impl PopupLauncher for LogLauncher {
    fn open_popup(&self) {
        tracing::info!(target: "gramwallet::ui", "ui surface requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TRANSFER_SEND_MODE;

    #[test]
    fn default_version_is_listed() {
        let s = UnlinkedSigner;
        assert!(s.versions().contains(&s.default_version()), "default not in list");
        assert_eq!(s.versions().last().map(String::as_str), Some("v4R2"));
    }

    #[tokio::test]
    async fn signing_paths_fail_with_a_reason() -> eyre::Result<()> {
        let s = UnlinkedSigner;
        let contract = ContractRef {
            version: "v3R2".to_owned(),
            address: "EQx".to_owned(),
            public_key: None,
        };
        let params = TransferParams {
            to: "EQy".to_owned(),
            amount: 1,
            seqno: 1,
            comment: None,
            send_mode: TRANSFER_SEND_MODE,
        };
        let err = s.transfer(&contract, None, &params).await.err();
        assert!(
            err.is_some_and(|e| e.to_string().contains("v3R2 transfer")),
            "transfer should name the contract"
        );
        assert!(s.generate_mnemonic().await.is_err(), "mnemonic should fail");

        let hw = UnlinkedHardware.connect(TransportType::Ble).await.err();
        assert_eq!(hw.map(|e| e.to_string()).as_deref(), Some("no ble transport linked"));
        Ok(())
    }
}
