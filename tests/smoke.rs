//! Smoke tests -- verify the binary runs and its flags parse.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("linkspeed")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Measure download and upload bandwidth"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("linkspeed")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("linkspeed"));
}

#[test]
fn test_help_lists_every_flag() {
    let output = Command::cargo_bin("linkspeed")
        .unwrap()
        .arg("-h")
        .output()
        .unwrap();
    assert!(output.status.success());

    let help = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--server",
        "--upsize",
        "--downtimes",
        "--randomize",
        "--config",
        "--json",
        "--timeout",
    ] {
        assert!(help.contains(flag), "missing {flag} in help");
    }
}

#[test]
fn test_unknown_flag_is_a_usage_error() {
    Command::cargo_bin("linkspeed")
        .unwrap()
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicates::str::contains("--bogus"));
}

#[test]
fn test_non_numeric_upsize_rejected() {
    Command::cargo_bin("linkspeed")
        .unwrap()
        .args(["--upsize", "lots"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_config_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    Command::cargo_bin("linkspeed")
        .unwrap()
        .arg("--config")
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicates::str::contains("failed to read config file"));
}

#[test]
fn test_invalid_server_url_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("linkspeed")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("LINKSPEED_CONFIG")
        .args(["--server", "ftp://example.net/upload.php"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("invalid --server URL"))
        .stdout(predicates::str::is_empty());
}

#[test]
fn test_unloadable_env_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("broken.toml");
    std::fs::write(&bad, "[selection\ncandidates = ").unwrap();

    Command::cargo_bin("linkspeed")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env("LINKSPEED_CONFIG", &bad)
        .args(["--server", "ftp://example.net/upload.php"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("could not be loaded"));
}

#[test]
fn test_oversized_upload_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("linkspeed")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("LINKSPEED_CONFIG")
        .args([
            "--server",
            "http://127.0.0.1:9/speedtest/upload.php",
            "--upsize",
            "18446744073709551615",
        ])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("exceeds"));
}

#[test]
fn test_excessive_download_passes_rejected() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("linkspeed")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("LINKSPEED_CONFIG")
        .args([
            "--server",
            "http://127.0.0.1:9/speedtest/upload.php",
            "--downtimes",
            "4000000000",
        ])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("invalid download configuration"));
}
