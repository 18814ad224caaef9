use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-chain wallet CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "wallet-cli", about = "Multi-chain wallet key tools", disable_help_subcommand = true)]
pub struct Cli {
    /// Config file; falls back to $WALLET_CONFIG, then built-in defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate a BIP39 mnemonic and write it encrypted to --output
    GenerateMnemonic {
        #[arg(long, default_value_t = 12)]
        words: usize,
        /// Encrypted blob destination (password from $WALLET_PASSWORD)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the phrase; also requires ALLOW_PLAINTEXT_MNEMONIC=1
        #[arg(long)]
        show: bool,
    },
    /// Derive addresses for the configured chains. Secret from
    /// $WALLET_SECRET or stdin.
    Derive {
        /// Treat the secret as an arbitrary BioForest string
        #[arg(long)]
        arbitrary: bool,
        /// Only these chain ids
        #[arg(long = "chain")]
        chains: Vec<String>,
    },
    /// Encrypt a secret (from $WALLET_SECRET or stdin) with $WALLET_PASSWORD
    Encrypt {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check that an encrypted blob opens with $WALLET_PASSWORD
    Decrypt {
        #[arg(long)]
        input: PathBuf,
        /// Print the secret; also requires ALLOW_PLAINTEXT_MNEMONIC=1
        #[arg(long)]
        show: bool,
    },
    /// Check an address against a configured chain
    ValidateAddress {
        #[arg(long)]
        chain: String,
        address: String,
    },
}
