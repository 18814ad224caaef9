//! P2WPKH transaction assembly and signing.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::address::Address;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use tracing::debug;

use super::utxo::{Utxo, DUST_THRESHOLD};
use crate::core::domain::PrivateKey;
use crate::core::errors::WalletError;

/// Key plus the script it controls.
pub struct P2wpkhSigner {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
    script_pubkey: ScriptBuf,
    address: String,
}

impl P2wpkhSigner {
    pub fn new(private_key: &PrivateKey, network: Network) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let secret_key = private_key
            .with_secret(|k| SecretKey::from_slice(k))
            .map_err(|e| WalletError::SigningFailed(format!("Invalid private key: {}", e)))?;
        let public_key = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret_key));
        let address = Address::p2wpkh(&public_key, network)
            .map_err(|e| WalletError::SigningFailed(format!("SegWit address failed: {}", e)))?;
        Ok(Self {
            secp,
            secret_key,
            public_key,
            script_pubkey: address.script_pubkey(),
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

fn recipient_script(to: &str, network: Network) -> Result<ScriptBuf, WalletError> {
    let address = Address::from_str(to)
        .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", to, e)))?
        .require_network(network)
        .map_err(|e| WalletError::InvalidAddress(format!("network mismatch: {}", e)))?;
    Ok(address.script_pubkey())
}

/// Builds and signs a version-2 transaction spending `inputs` (all owned by
/// `signer`) to `to`, returning change to the signer's own address.
pub fn build_signed(
    signer: &P2wpkhSigner,
    inputs: &[Utxo],
    to: &str,
    amount: u64,
    change: u64,
    network: Network,
) -> Result<Transaction, WalletError> {
    if amount == 0 {
        return Err(WalletError::InvalidAmount("amount must be greater than zero".into()));
    }
    if inputs.is_empty() {
        return Err(WalletError::InsufficientFunds("no inputs selected".into()));
    }

    let mut txins = Vec::with_capacity(inputs.len());
    for utxo in inputs {
        txins.push(TxIn {
            previous_output: OutPoint { txid: utxo.txid()?, vout: utxo.vout },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        });
    }

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: recipient_script(to, network)?,
    }];
    if change >= DUST_THRESHOLD {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: signer.script_pubkey.clone(),
        });
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: txins,
        output: outputs,
    };

    let mut witnesses = Vec::with_capacity(inputs.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (i, utxo) in inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &signer.script_pubkey,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| WalletError::SigningFailed(format!("SegWit sighash failed: {}", e)))?;
            let message = Message::from_digest(*sighash.as_byte_array());
            let signature = signer.secp.sign_ecdsa(&message, &signer.secret_key);

            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);
            witnesses.push(Witness::from_slice(&[sig_bytes, signer.public_key.to_bytes()]));
        }
    }
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    debug!(txid = %tx.txid(), inputs = tx.input.len(), outputs = tx.output.len(), "Signed SegWit transaction");
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::{deserialize, serialize};
    use bitcoin::secp256k1::ecdsa::Signature;

    const TO: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    fn signer() -> P2wpkhSigner {
        P2wpkhSigner::new(&PrivateKey::new([7u8; 32]), Network::Bitcoin).unwrap()
    }

    fn inputs() -> Vec<Utxo> {
        vec![
            Utxo::new(format!("{:064x}", 1), 0, 40_000, true),
            Utxo::new(format!("{:064x}", 2), 3, 25_000, true),
        ]
    }

    #[test]
    fn test_build_signed_layout() {
        let signer = signer();
        let tx = build_signed(&signer, &inputs(), TO, 50_000, 10_000, Network::Bitcoin).unwrap();
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, Amount::from_sat(50_000));
        assert_eq!(tx.output[1].script_pubkey, signer.script_pubkey);
        for input in &tx.input {
            assert_eq!(input.witness.len(), 2);
            assert!(input.script_sig.is_empty());
        }

        let bytes = serialize(&tx);
        let decoded: Transaction = deserialize(&bytes).unwrap();
        assert_eq!(decoded.txid(), tx.txid());
    }

    #[test]
    fn test_dust_change_is_dropped() {
        let tx = build_signed(&signer(), &inputs(), TO, 60_000, 100, Network::Bitcoin).unwrap();
        assert_eq!(tx.output.len(), 1);
    }

    #[test]
    fn test_signatures_verify() {
        let signer = signer();
        let utxos = inputs();
        let tx = build_signed(&signer, &utxos, TO, 50_000, 10_000, Network::Bitcoin).unwrap();

        let mut cache = SighashCache::new(&tx);
        for (i, utxo) in utxos.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(i, &signer.script_pubkey, Amount::from_sat(utxo.value), EcdsaSighashType::All)
                .unwrap();
            let items = tx.input[i].witness.to_vec();
            let der = &items[0][..items[0].len() - 1];
            assert_eq!(*items[0].last().unwrap(), 0x01);
            let sig = Signature::from_der(der).unwrap();
            let msg = Message::from_digest(*sighash.as_byte_array());
            assert!(signer.secp.verify_ecdsa(&msg, &sig, &signer.public_key.inner).is_ok());
        }
    }

    #[test]
    fn test_rejects_bad_recipient_and_zero_amount() {
        let signer = signer();
        assert!(matches!(
            build_signed(&signer, &inputs(), "not-an-address", 1_000, 0, Network::Bitcoin),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(
            build_signed(&signer, &inputs(), TO, 0, 0, Network::Bitcoin),
            Err(WalletError::InvalidAmount(_))
        ));
        let testnet = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
        assert!(build_signed(&signer, &inputs(), testnet, 1_000, 0, Network::Bitcoin).is_err());
    }

    #[test]
    fn test_signer_address_is_native_segwit() {
        assert!(signer().address().starts_with("bc1q"));
    }
}
