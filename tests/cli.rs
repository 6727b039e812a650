//! Command line tests against the built binary
use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn reviewgate() -> Command {
    let mut cmd = Command::cargo_bin("reviewgate").unwrap();
    for var in [
        "REVIEWGATE_DB_URL",
        "REVIEWGATE_HOST",
        "REVIEWGATE_PORT",
        "REVIEWGATE_ALLOWLIST",
        "REVIEWGATE_HASH_SALT",
        "REVIEWGATE_RATE_MAX",
        "REVIEWGATE_RATE_WINDOW_MS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn env_example_lists_configuration() {
    reviewgate()
        .arg("env-example")
        .assert()
        .success()
        .stdout(contains("REVIEWGATE_RATE_MAX=20"))
        .stdout(contains("REVIEWGATE_RATE_WINDOW_MS=3600000"))
        .stdout(contains("REVIEWGATE_ALLOWLIST"));
}

#[test]
fn validate_env_rejects_malformed_allowlist() {
    reviewgate()
        .arg("validate-env")
        .env("REVIEWGATE_ALLOWLIST", "10.0.0.0-not-an-ip")
        .assert()
        .failure()
        .stderr(contains("critical error"));
}

#[test]
fn validate_env_accepts_defaults() {
    reviewgate()
        .arg("validate-env")
        .env("REVIEWGATE_HASH_SALT", "pepper")
        .assert()
        .success()
        .stdout(contains("CRITICAL").not());
}

#[test]
fn reports_on_fresh_database() {
    let dir = std::env::temp_dir().join(format!("reviewgate-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let db_url = format!("sqlite://{}", dir.join("reports.db").display());

    reviewgate()
        .args(["reports", "--summary"])
        .env("REVIEWGATE_DB_URL", &db_url)
        .assert()
        .success()
        .stdout(contains("Tracked identities: 0"))
        .stdout(contains("No abuse reports recorded"));

    reviewgate()
        .args(["migrate", "status"])
        .env("REVIEWGATE_DB_URL", &db_url)
        .assert()
        .success()
        .stdout(contains("Pending migrations: []"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_command_fails() {
    reviewgate().arg("add-route").assert().failure();
}
