use assert_cmd::Command;

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("wallet-cli").unwrap();
    cmd.env_remove("WALLET_CONFIG")
        .env_remove("WALLET_SECRET")
        .env_remove("WALLET_PASSWORD")
        .env_remove("ALLOW_PLAINTEXT_MNEMONIC")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_derive_from_stdin() {
    let output = cli()
        .args(["derive", "--chain", "ethereum", "--chain", "bfmeta"])
        .write_stdin(format!("{}\n", ABANDON))
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "ethereum\tevm\t0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    assert!(lines[1].starts_with("bfmeta\tbioforest\tb"));
}

#[test]
fn test_derive_rejects_bad_mnemonic() {
    cli()
        .arg("derive")
        .env("WALLET_SECRET", "definitely not a mnemonic")
        .assert()
        .failure();
}

#[test]
fn test_encrypt_then_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("secret.json");

    cli()
        .args(["encrypt", "--output"])
        .arg(&blob)
        .env("WALLET_SECRET", ABANDON)
        .env("WALLET_PASSWORD", "correct horse")
        .assert()
        .success();

    let json = std::fs::read_to_string(&blob).unwrap();
    assert!(json.contains("\"iterations\""));
    assert!(!json.contains("abandon"));

    let output = cli()
        .args(["decrypt", "--input"])
        .arg(&blob)
        .env("WALLET_PASSWORD", "correct horse")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), "ok");

    cli()
        .args(["decrypt", "--input"])
        .arg(&blob)
        .env("WALLET_PASSWORD", "wrong password")
        .assert()
        .failure();
}

#[test]
fn test_validate_address() {
    cli()
        .args(["validate-address", "--chain", "ethereum", "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"])
        .assert()
        .success()
        .stdout("valid\n");

    cli()
        .args(["validate-address", "--chain", "ethereum", "0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed"])
        .assert()
        .failure()
        .stdout("invalid\n");
}

#[test]
fn test_generate_mnemonic_hidden_by_default() {
    let output = cli().args(["generate-mnemonic", "--show"]).output().unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    let output = cli()
        .args(["generate-mnemonic", "--words", "24", "--show"])
        .env("ALLOW_PLAINTEXT_MNEMONIC", "1")
        .output()
        .unwrap();
    assert!(output.status.success());
    let phrase = String::from_utf8(output.stdout).unwrap();
    assert_eq!(phrase.split_whitespace().count(), 24);
}
