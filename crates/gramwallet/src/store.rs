use crate::{
    config::{parse_network_mode, ControllerConfig},
    paths::WalletPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides (network, provider endpoint, polling cadence).
fn apply_env_overrides(cfg: &mut ControllerConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("GRAMWALLET_NETWORK", |v| {
        if let Some(m) = parse_network_mode(v) {
            cfg.network_mode = m;
        }
    });
    apply_env("GRAMWALLET_PROVIDER_URL", |v| match cfg.network_mode {
        crate::config::NetworkMode::Mainnet => v.clone_into(&mut cfg.provider.mainnet_url),
        crate::config::NetworkMode::Testnet => v.clone_into(&mut cfg.provider.testnet_url),
    });
    apply_env("GRAMWALLET_API_KEY", |v| {
        cfg.provider.api_key = Some(v.to_owned());
    });
    apply_env("GRAMWALLET_POLL_INTERVAL_SECONDS", |v| {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.poll_interval_seconds = n;
            }
        }
    });
}

impl ConfigStore {
    pub fn new(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub const fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn load_or_init_default(&self) -> eyre::Result<ControllerConfig> {
        if !self.path.exists() {
            let mut cfg = ControllerConfig::default();
            self.save(&cfg)?;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: ControllerConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &ControllerConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_private_atomic(&self.path, &s).context("write config.toml")?;
        Ok(())
    }
}
