use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "GRAMWALLET_DATA_DIR";
pub const CONFIG_DIR_ENV: &str = "GRAMWALLET_CONFIG_DIR";

#[derive(Debug, Clone)]
pub struct WalletPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl WalletPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) =
            (std::env::var(DATA_DIR_ENV), std::env::var(CONFIG_DIR_ENV))
        {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // Linux: ~/.config/gramwallet, macOS: ~/Library/Application Support/gramwallet
        let proj =
            ProjectDirs::from("", "", "gramwallet").context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("gramwallet.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join("gramwallet.sock")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("gramwallet-daemon.lock")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
