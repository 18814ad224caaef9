//! UTXO selection for P2WPKH spends.

use std::str::FromStr;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::WalletError;

/// Outputs below this are not worth creating; the change goes to the fee.
pub const DUST_THRESHOLD: u64 = 546;

// P2WPKH virtual sizes
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;
const OVERHEAD_VBYTES: u64 = 11;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Satoshi
    pub value: u64,
    #[serde(default)]
    pub confirmed: bool,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64, confirmed: bool) -> Self {
        Self { txid: txid.into(), vout, value, confirmed }
    }

    pub fn txid(&self) -> Result<Txid, WalletError> {
        Txid::from_str(&self.txid)
            .map_err(|e| WalletError::ValidationError(format!("Invalid transaction ID: {}", e)))
    }
}

/// Result of a selection: inputs, fee and change (0 when folded into fee).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    pub change: u64,
}

pub struct UtxoSelector;

impl UtxoSelector {
    /// Fee for `inputs` inputs and `outputs` outputs at `fee_rate` sat/vB.
    pub fn estimate_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
        let vbytes = INPUT_VBYTES
            .saturating_mul(inputs as u64)
            .saturating_add(OUTPUT_VBYTES.saturating_mul(outputs as u64))
            .saturating_add(OVERHEAD_VBYTES);
        vbytes.saturating_mul(fee_rate)
    }

    /// Largest-first greedy selection covering `target` plus fee.
    ///
    /// Confirmed outputs are preferred; unconfirmed ones are only used when
    /// the confirmed set is not enough.
    pub fn select(utxos: &[Utxo], target: u64, fee_rate: u64) -> Result<Selection, WalletError> {
        if target == 0 {
            return Err(WalletError::InvalidAmount("amount must be greater than zero".into()));
        }
        if utxos.is_empty() {
            return Err(WalletError::InsufficientFunds("no spendable outputs".into()));
        }

        let mut sorted = utxos.to_vec();
        sorted.sort_by(|a, b| b.confirmed.cmp(&a.confirmed).then(b.value.cmp(&a.value)));

        let exceeds = || {
            WalletError::InsufficientFunds(format!("{} sat plus fee exceeds any spendable total", target))
        };

        let mut selected = Vec::new();
        let mut total = 0u64;
        for utxo in sorted {
            total = total
                .checked_add(utxo.value)
                .ok_or_else(|| WalletError::ValidationError("UTXO sum overflow".into()))?;
            selected.push(utxo);

            let fee_with_change = Self::estimate_fee(selected.len(), 2, fee_rate);
            let needed = target.checked_add(fee_with_change).ok_or_else(exceeds)?;
            if total >= needed {
                let change = total - needed;
                if change >= DUST_THRESHOLD {
                    debug!(inputs = selected.len(), fee = fee_with_change, change, "UTXO selection");
                    return Ok(Selection { inputs: selected, fee: fee_with_change, change });
                }
            }
            let fee_no_change = Self::estimate_fee(selected.len(), 1, fee_rate);
            let needed = target.checked_add(fee_no_change).ok_or_else(exceeds)?;
            if total >= needed {
                // Leftover below dust is absorbed by the fee.
                let fee = total - target;
                debug!(inputs = selected.len(), fee, "UTXO selection without change");
                return Ok(Selection { inputs: selected, fee, change: 0 });
            }
        }

        Err(WalletError::InsufficientFunds(format!(
            "need {} sat plus fee, have {} sat",
            target, total
        )))
    }
}
