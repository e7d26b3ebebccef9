use std::process::Command;

use eyre::Context as _;

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("gramwallet");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(exe)
        .env("GRAMWALLET_CONFIG_DIR", cfg_dir.path())
        .env("GRAMWALLET_DATA_DIR", data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run gramwallet doctor --json")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some());
    assert_eq!(
        v.pointer("/wallet/state_exists")
            .and_then(serde_json::Value::as_bool),
        Some(false)
    );
    assert_eq!(
        v.pointer("/daemon/reachable")
            .and_then(serde_json::Value::as_bool),
        Some(false)
    );
    Ok(())
}

#[test]
fn doctor_reports_stored_wallet_without_secrets() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("gramwallet");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    std::fs::write(
        data_dir.path().join("state.json"),
        serde_json::to_string(&serde_json::json!({
            "address": "EQstoredaddress",
            "words": "a1b2c3SEALEDVAULT",
            "pwdHash": "PASSWORDFINGERPRINT",
            "walletVersion": "v3R2",
            "isLedger": "false",
        }))?,
    )?;

    let out = Command::new(exe)
        .env("GRAMWALLET_CONFIG_DIR", cfg_dir.path())
        .env("GRAMWALLET_DATA_DIR", data_dir.path())
        .args(["doctor"])
        .output()
        .context("run gramwallet doctor")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let text = String::from_utf8(out.stdout)?;
    assert!(text.contains("EQstoredaddress"), "address missing: {text}");
    assert!(text.contains("contract: v3R2"), "version missing: {text}");
    assert!(!text.contains("SEALEDVAULT"), "vault leaked: {text}");
    assert!(!text.contains("PASSWORDFINGERPRINT"), "fingerprint leaked: {text}");
    Ok(())
}
