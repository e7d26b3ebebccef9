use crate::{
    config::ControllerConfig,
    paths::{WalletPaths, CONFIG_DIR_ENV, DATA_DIR_ENV},
    persist::StateStore,
};
use eyre::Context as _;
use serde_json::json;
use std::{fs, path::Path, path::PathBuf};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(not(unix))]
use tokio::net::TcpStream;

#[cfg(unix)]
fn daemon_transport_label(paths: &WalletPaths) -> (String, String) {
    (
        "unix_socket".to_owned(),
        paths.socket_path().to_string_lossy().into_owned(),
    )
}

#[cfg(not(unix))]
fn daemon_transport_label(_paths: &WalletPaths) -> (String, String) {
    (
        "tcp_loopback".to_owned(),
        crate::rpc::server::LOOPBACK_ADDR.to_owned(),
    )
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

async fn probe_daemon_running(paths: &WalletPaths) -> (bool, Option<String>) {
    // Connect only; a hello frame would register a channel with the controller.
    let timeout = std::time::Duration::from_millis(250);

    #[cfg(unix)]
    let fut = UnixStream::connect(paths.socket_path());
    #[cfg(not(unix))]
    let fut = {
        let _: &WalletPaths = paths;
        TcpStream::connect(crate::rpc::server::LOOPBACK_ADDR)
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(_s)) => (true, None),
        Ok(Err(e)) => (false, Some(format!("connect failed: {e}"))),
        Err(_elapsed) => (false, Some("connect timed out".to_owned())),
    }
}

fn try_parse_config(path: &Path) -> eyre::Result<ControllerConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ControllerConfig = toml::from_str(&s).context("parse config.toml")?;
    Ok(cfg)
}

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    network_mode: Option<String>,
    endpoint_count: usize,
    api_key_set: bool,
    vault_kdf: Option<String>,
    poll_interval_seconds: Option<u64>,
}

struct WalletReport {
    state_path: PathBuf,
    state_exists: bool,
    readable: bool,
    initialized: bool,
    is_ledger: bool,
    address: Option<String>,
    wallet_version: Option<String>,
}

struct DaemonReport {
    lock_path: PathBuf,
    lock_exists: bool,
    transport: String,
    address: String,
    reachable: bool,
    note: Option<String>,
}

struct DoctorReport {
    version: &'static str,
    paths: WalletPaths,
    config: ConfigReport,
    wallet: WalletReport,
    daemon: DaemonReport,
    env: serde_json::Value,
}

fn collect_config(paths: &WalletPaths) -> ConfigReport {
    let path = paths.config_file();
    let exists = path.exists();
    let (parse_ok, error, cfg) = if exists {
        match try_parse_config(&path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };
    ConfigReport {
        path,
        exists,
        parse_ok,
        error,
        network_mode: cfg
            .as_ref()
            .map(|c| format!("{:?}", c.network_mode).to_lowercase()),
        endpoint_count: cfg.as_ref().map_or(0, |c| c.provider_endpoints().len()),
        api_key_set: cfg.as_ref().is_some_and(|c| c.provider.api_key.is_some()),
        vault_kdf: cfg
            .as_ref()
            .map(|c| format!("{:?}", c.vault_kdf).to_lowercase()),
        poll_interval_seconds: cfg.as_ref().map(|c| c.poll_interval_seconds),
    }
}

/// Only public facts about the stored wallet; the vault and fingerprint are never read out.
fn collect_wallet(paths: &WalletPaths) -> WalletReport {
    let state_path = paths.state_file();
    let state_exists = state_path.exists();
    let rec = if state_exists {
        StateStore::open(&state_path).ok().map(|s| s.record())
    } else {
        None
    };
    WalletReport {
        state_path,
        state_exists,
        readable: rec.is_some(),
        initialized: rec.as_ref().is_some_and(crate::persist::PersistedRecord::is_complete),
        is_ledger: rec.as_ref().is_some_and(|r| r.is_ledger),
        address: rec.as_ref().and_then(|r| r.address.clone()),
        wallet_version: rec.and_then(|r| r.wallet_version),
    }
}

async fn collect(paths: &WalletPaths) -> DoctorReport {
    let (transport, address) = daemon_transport_label(paths);
    let lock_path = paths.lock_path();
    let lock_exists = lock_path.exists();
    let (reachable, note) = probe_daemon_running(paths).await;

    let env = json!({
      CONFIG_DIR_ENV: env_opt(CONFIG_DIR_ENV),
      DATA_DIR_ENV: env_opt(DATA_DIR_ENV),
      "GRAMWALLET_NETWORK": env_opt("GRAMWALLET_NETWORK"),
      "GRAMWALLET_PROVIDER_URL": env_opt("GRAMWALLET_PROVIDER_URL"),
      "GRAMWALLET_POLL_INTERVAL_SECONDS": env_opt("GRAMWALLET_POLL_INTERVAL_SECONDS"),
      "GRAMWALLET_API_KEY_set": std::env::var("GRAMWALLET_API_KEY").is_ok(),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: paths.clone(),
        config: collect_config(paths),
        wallet: collect_wallet(paths),
        daemon: DaemonReport {
            lock_path,
            lock_exists,
            transport,
            address,
            reachable,
            note,
        },
        env,
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(&json!({
      "ok": true,
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "parse_ok": r.config.parse_ok,
        "error": r.config.error,
        "network_mode": r.config.network_mode,
        "provider": {
          "endpoint_count": r.config.endpoint_count,
          "api_key_set": r.config.api_key_set,
        },
        "vault_kdf": r.config.vault_kdf,
        "poll_interval_seconds": r.config.poll_interval_seconds,
      },
      "wallet": {
        "state_path": r.wallet.state_path,
        "state_exists": r.wallet.state_exists,
        "readable": r.wallet.readable,
        "initialized": r.wallet.initialized,
        "is_ledger": r.wallet.is_ledger,
        "address": r.wallet.address,
        "wallet_version": r.wallet.wallet_version,
      },
      "daemon": {
        "lock_path": r.daemon.lock_path,
        "lock_exists": r.daemon.lock_exists,
        "transport": r.daemon.transport,
        "address": r.daemon.address,
        "reachable": r.daemon.reachable,
        "note": r.daemon.note,
      },
      "env": r.env,
    }))
    .context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "gramwallet doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (created on first `serve`)").context("write config")?;
    } else if r.config.parse_ok {
        writeln!(
            out,
            "  status: ok (network: {}, endpoints: {}, api_key_set: {}, vault_kdf: {})",
            r.config.network_mode.as_deref().unwrap_or("?"),
            r.config.endpoint_count,
            r.config.api_key_set,
            r.config.vault_kdf.as_deref().unwrap_or("?"),
        )
        .context("write config")?;
    } else {
        writeln!(out, "  status: parse failed").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Wallet:").context("write wallet header")?;
    writeln!(out, "  state.json: {}", r.wallet.state_path.display()).context("write wallet")?;
    if !r.wallet.state_exists {
        writeln!(out, "  status: no wallet yet").context("write wallet")?;
    } else if !r.wallet.readable {
        writeln!(out, "  status: unreadable").context("write wallet")?;
    } else {
        writeln!(out, "  initialized: {}", r.wallet.initialized).context("write wallet")?;
        writeln!(out, "  hardware: {}", r.wallet.is_ledger).context("write wallet")?;
        if let Some(a) = &r.wallet.address {
            writeln!(out, "  address: {a}").context("write wallet")?;
        }
        if let Some(v) = &r.wallet.wallet_version {
            writeln!(out, "  contract: {v}").context("write wallet")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Daemon:").context("write daemon header")?;
    writeln!(out, "  lock_path: {}", r.daemon.lock_path.display()).context("write daemon")?;
    writeln!(out, "  lock_exists: {}", r.daemon.lock_exists).context("write daemon")?;
    writeln!(out, "  transport: {}", r.daemon.transport).context("write daemon")?;
    writeln!(out, "  address: {}", r.daemon.address).context("write daemon")?;
    writeln!(out, "  reachable: {}", r.daemon.reachable).context("write daemon")?;
    if let Some(note) = &r.daemon.note {
        writeln!(out, "  note: {note}").context("write daemon")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Env (redacted):").context("write env header")?;
    for key in [CONFIG_DIR_ENV, DATA_DIR_ENV, "GRAMWALLET_NETWORK"] {
        writeln!(
            out,
            "  {key}: {:?}",
            r.env.get(key).and_then(serde_json::Value::as_str)
        )
        .context("write env")?;
    }
    writeln!(
        out,
        "  GRAMWALLET_API_KEY_set: {}",
        r.env
            .get("GRAMWALLET_API_KEY_set")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    )
    .context("write env")?;
    Ok(())
}

pub async fn run(paths: &WalletPaths, as_json: bool) -> eyre::Result<()> {
    let report = collect(paths).await;
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)
    } else {
        print_human(&mut out, &report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{KEY_ADDRESS, KEY_PWD_HASH, KEY_WORDS};

    #[tokio::test]
    async fn report_never_contains_vault_material() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = WalletPaths::at(dir.path().join("cfg"), dir.path().join("data"));
        paths.ensure_private_dirs()?;
        let store = StateStore::open(&paths.state_file())?;
        store.set_many(&[
            (KEY_ADDRESS, "EQaddr"),
            (KEY_WORDS, "00112233445566778899aabbSECRETVAULT"),
            (KEY_PWD_HASH, "FINGERPRINT"),
        ])?;

        let report = collect(&paths).await;
        assert!(report.wallet.initialized);
        assert!(!report.daemon.reachable);

        let mut buf = Vec::new();
        print_json(&mut buf, &report)?;
        print_human(&mut buf, &report)?;
        let text = String::from_utf8(buf)?;
        assert!(text.contains("EQaddr"));
        assert!(!text.contains("SECRETVAULT"));
        assert!(!text.contains("FINGERPRINT"));
        Ok(())
    }

    #[tokio::test]
    async fn broken_config_is_reported_not_fatal() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = WalletPaths::at(dir.path().join("cfg"), dir.path().join("data"));
        paths.ensure_private_dirs()?;
        fs::write(paths.config_file(), "network_mode = [")?;
        let report = collect(&paths).await;
        assert!(report.config.exists);
        assert!(!report.config.parse_ok);
        assert!(report.config.error.is_some());
        Ok(())
    }
}
