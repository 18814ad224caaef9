use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use multi_chain_wallet::cli::{Cli, Commands};
use multi_chain_wallet::core::config::WalletConfig;
use multi_chain_wallet::core::derivation::derive_addresses;
use multi_chain_wallet::core::domain::KeyType;
use multi_chain_wallet::core::mnemonic::{generate_mnemonic, parse_mnemonic, WordCount};
use multi_chain_wallet::core::validation::is_valid_address;
use multi_chain_wallet::security::encryption::{decrypt_secret, encrypt_secret, EncryptedBlob};
use multi_chain_wallet::security::secret::WalletSecret;
use tracing_subscriber::EnvFilter;

const SECRET_ENV: &str = "WALLET_SECRET";
const PASSWORD_ENV: &str = "WALLET_PASSWORD";
const ALLOW_PLAINTEXT_ENV: &str = "ALLOW_PLAINTEXT_MNEMONIC";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = match &cli.config {
        Some(path) => WalletConfig::from_toml_file(path)?,
        None => WalletConfig::load()?,
    };

    match cli.command {
        Commands::GenerateMnemonic { words, output, show } => {
            let mnemonic = generate_mnemonic(WordCount::try_from(words)?)?;
            if let Some(path) = output.as_deref() {
                let password = read_env_secret(PASSWORD_ENV)?;
                let blob = encrypt_secret(&mnemonic, password.expose(), config.security.pbkdf2_iterations)?;
                write_blob(path, &blob)?;
                tracing::info!(path = %path.display(), words, "Encrypted mnemonic written");
            }
            if show {
                print_plaintext(&mnemonic)?;
            } else if output.is_none() {
                tracing::warn!(
                    mnemonic = "<hidden>",
                    "Mnemonic generated but not saved. Pass --output, or --show with {}=1",
                    ALLOW_PLAINTEXT_ENV
                );
            }
        }
        Commands::Derive { arbitrary, chains } => {
            let secret = read_secret()?;
            let key_type = if arbitrary {
                KeyType::Arbitrary
            } else {
                parse_mnemonic(secret.expose())?;
                KeyType::Mnemonic
            };
            let configs: Vec<_> = config
                .chains
                .iter()
                .filter(|c| chains.is_empty() || chains.contains(&c.id))
                .cloned()
                .collect();
            if configs.is_empty() {
                bail!("no configured chain matches {:?}", chains);
            }
            for derived in derive_addresses(&secret, key_type, &configs)? {
                println!("{}\t{}\t{}", derived.chain_id, derived.kind, derived.address);
            }
        }
        Commands::Encrypt { output } => {
            let secret = read_secret()?;
            let password = read_env_secret(PASSWORD_ENV)?;
            let blob = encrypt_secret(&secret, password.expose(), config.security.pbkdf2_iterations)?;
            match output.as_deref() {
                Some(path) => {
                    write_blob(path, &blob)?;
                    tracing::info!(path = %path.display(), "Encrypted secret written");
                }
                None => println!("{}", blob.to_json()?),
            }
        }
        Commands::Decrypt { input, show } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let blob = EncryptedBlob::from_json(&json)?;
            let password = read_env_secret(PASSWORD_ENV)?;
            let secret = decrypt_secret(&blob, password.expose())?;
            if show {
                print_plaintext(&secret)?;
            } else {
                println!("ok");
            }
        }
        Commands::ValidateAddress { chain, address } => {
            let chain_config = config
                .chain(&chain)
                .with_context(|| format!("unknown chain: {}", chain))?;
            if is_valid_address(&address, chain_config.kind, chain_config.prefix.as_deref()) {
                println!("valid");
            } else {
                println!("invalid");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

fn read_env_secret(var: &str) -> anyhow::Result<WalletSecret> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(WalletSecret::new(value)),
        _ => bail!("{} is not set", var),
    }
}

/// `$WALLET_SECRET`, or the first line of stdin.
fn read_secret() -> anyhow::Result<WalletSecret> {
    if let Ok(secret) = read_env_secret(SECRET_ENV) {
        return Ok(secret);
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("failed to read secret from stdin")?;
    let secret = WalletSecret::new(line.trim_end_matches(['\r', '\n']));
    if secret.is_empty() {
        bail!("no secret given on stdin or in {}", SECRET_ENV);
    }
    Ok(secret)
}

fn print_plaintext(secret: &WalletSecret) -> anyhow::Result<()> {
    if std::env::var(ALLOW_PLAINTEXT_ENV).ok().as_deref() != Some("1") {
        tracing::error!("Refusing to print secret: set {}=1 to allow plaintext output", ALLOW_PLAINTEXT_ENV);
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", secret.expose())?;
    tracing::info!(secret = "<shown>", "Secret displayed to stdout");
    Ok(())
}

fn write_blob(path: &Path, blob: &EncryptedBlob) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
    std::fs::write(path, blob.to_json()?).with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path, perms) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to set 0o600 permissions");
            }
        }
    }
    Ok(())
}
