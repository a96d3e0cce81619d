use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn cli() -> Command {
    Command::cargo_bin("proco-cli").unwrap()
}

#[test]
fn keygen_prints_a_usable_key_pair() {
    let output = cli().arg("keygen").output().unwrap();
    assert!(output.status.success());
    let key: Value = serde_json::from_slice(&output.stdout).unwrap();
    let address = key["address"].as_str().unwrap();
    let secret = key["secret"].as_str().unwrap();
    assert_eq!(address.len(), 66);
    assert_eq!(secret.len(), 64);
    assert!(address.starts_with("02") || address.starts_with("03"));
}

#[test]
fn send_with_bad_secret_fails_before_any_request() {
    cli()
        .args(["--node", "http://127.0.0.1:9", "send", "--secret", "zz", "--to", "bob", "--amount", "1"])
        .env_remove("PROCO_SECRET_KEY")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid sender key"));
}

#[test]
fn help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("keygen"))
        .stdout(predicate::str::contains("add-peer"))
        .stdout(predicate::str::contains("validate"));
}
