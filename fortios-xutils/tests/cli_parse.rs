use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn cli() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fortios-xutils"));
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn parse_writes_device_layout() {
    let out = tempfile::tempdir().expect("tempdir");
    cli()
        .arg("parse")
        .arg(fixture("fixtures/fortigate-01.txt"))
        .arg("--outdir")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("hostname=fw-01"));

    let device = out.path().join("fw-01");
    for name in [
        "all.json",
        "metadata.json",
        "system_global.json",
        "system_interface.json",
        "firewall_address.json",
        "firewall_addrgrp.json",
        "firewall_policy.json",
    ] {
        assert!(device.join(name).is_file(), "missing {name}");
    }

    let metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(device.join("metadata.json")).expect("read"))
            .expect("json");
    assert_eq!(metadata["hostname"], "fw-01");
    assert_eq!(metadata["vdoms"][0], "root");
    assert_eq!(
        metadata["config_version"],
        "FGT60F-7.2.5-FW-build1517-230606:opmode=0:vdom=0:user=admin"
    );

    let policies: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(device.join("firewall_policy.json")).expect("read"))
            .expect("json");
    assert_eq!(policies[0]["edit"], "10");
    assert_eq!(policies[0]["srcaddr"][1], "iprange_192.168.2.1..10");
}

#[test]
fn parse_section_option_limits_files() {
    let out = tempfile::tempdir().expect("tempdir");
    cli()
        .arg("parse")
        .arg(fixture("fixtures/fortigate-02.txt"))
        .arg("--outdir")
        .arg(out.path())
        .arg("--section")
        .arg("firewall policy")
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hostname\": \"fw-02\""));

    let device = out.path().join("fw-02");
    assert!(device.join("firewall_policy.json").is_file());
    assert!(!device.join("system_interface.json").exists());
}

#[test]
fn parse_snapshot_feeds_policy_search() {
    let out = tempfile::tempdir().expect("tempdir");
    cli()
        .arg("parse")
        .arg(fixture("fixtures/fortigate-01.txt"))
        .arg("--outdir")
        .arg(out.path())
        .arg("--snapshot")
        .assert()
        .success();

    let snapshot = out.path().join("fw-01").join("dataset.gz");
    assert!(snapshot.is_file());
    cli()
        .arg("policy-search")
        .arg(&snapshot)
        .arg("--ip")
        .arg("192.168.2.3")
        .assert()
        .success()
        .stdout(predicate::str::contains("policy 10 accept"));
}

#[test]
fn parse_reports_broken_input() {
    let out = tempfile::tempdir().expect("tempdir");
    cli()
        .arg("parse")
        .arg(fixture("fixtures/broken/underflow.txt"))
        .arg("--outdir")
        .arg(out.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse"))
        .stderr(predicate::str::contains(":4:"));
}

#[test]
fn inspect_prints_block_tree() {
    cli()
        .arg("inspect")
        .arg(fixture("fixtures/fortigate-01.txt"))
        .arg("--section")
        .arg("firewall policy")
        .arg("--depth")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("#config-version=FGT60F"))
        .stdout(predicate::str::contains("config firewall policy"))
        .stdout(predicate::str::contains("  edit 10 (8 set)"));
}

#[test]
fn inspect_unknown_section_fails() {
    cli()
        .arg("inspect")
        .arg(fixture("fixtures/fortigate-01.txt"))
        .arg("--section")
        .arg("router static")
        .assert()
        .failure()
        .stderr(predicate::str::contains("section 'router static' not found"));
}

#[test]
fn bad_settings_file_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = dir.path().join("settings.toml");
    fs::write(&settings, "[paths\nmax_hops = 3\n").expect("write");

    cli()
        .arg("--settings")
        .arg(&settings)
        .arg("inspect")
        .arg(fixture("fixtures/fortigate-02.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load settings"));
}
