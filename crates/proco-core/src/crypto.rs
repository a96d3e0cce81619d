//! secp256k1 signing and verification for transfers.
//!
//! A transaction's `sender` is the hex-encoded compressed public key, and the
//! signature covers SHA-256 of [`Transaction::signing_bytes`]. `r` and `s` are
//! the two 32-byte halves of the compact signature, hex-encoded.

use crate::{constants::SIGNATURE_PART_SIZE, sha256, Signature, Transaction, TxError};
use once_cell::sync::Lazy;
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};

static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Seam for transaction admission checks.
pub trait TxVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> Result<(), TxError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Verifier;

impl TxVerifier for Secp256k1Verifier {
    fn verify(&self, tx: &Transaction) -> Result<(), TxError> {
        verify_transaction(tx)
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&*SECP256K1_CONTEXT, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, TxError> {
        let bytes =
            hex::decode(secret_hex.trim()).map_err(|e| TxError::InvalidKey(e.to_string()))?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|e| TxError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The address other parties use: the compressed public key in hex.
    pub fn address(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let digest = Message::from_digest(sha256(message));
        let compact = SECP256K1_CONTEXT
            .sign_ecdsa(&digest, &self.secret_key)
            .serialize_compact();
        Signature {
            r: hex::encode(&compact[..SIGNATURE_PART_SIZE]),
            s: hex::encode(&compact[SIGNATURE_PART_SIZE..]),
        }
    }

    /// Builds and signs a transfer from this key to `recipient`.
    pub fn transfer(&self, recipient: impl Into<String>, amount: u64) -> Transaction {
        let mut tx = Transaction {
            sender: self.address(),
            recipient: recipient.into(),
            amount,
            signature: Signature::default(),
        };
        tx.signature = self.sign(&tx.signing_bytes());
        tx
    }
}

fn decode_part(name: &str, part: &str) -> Result<[u8; SIGNATURE_PART_SIZE], TxError> {
    let bytes = hex::decode(part).map_err(|e| TxError::MalformedSignature(format!("{name}: {e}")))?;
    if bytes.len() > SIGNATURE_PART_SIZE {
        return Err(TxError::MalformedSignature(format!(
            "{name} is {} bytes, at most {SIGNATURE_PART_SIZE} allowed",
            bytes.len()
        )));
    }
    // Big-endian integers may arrive without their leading zero bytes.
    let mut out = [0u8; SIGNATURE_PART_SIZE];
    out[SIGNATURE_PART_SIZE - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

pub fn verify_transaction(tx: &Transaction) -> Result<(), TxError> {
    let key_bytes = hex::decode(&tx.sender).map_err(|e| TxError::InvalidKey(e.to_string()))?;
    let public_key =
        PublicKey::from_slice(&key_bytes).map_err(|e| TxError::InvalidKey(e.to_string()))?;

    let mut compact = [0u8; SIGNATURE_PART_SIZE * 2];
    compact[..SIGNATURE_PART_SIZE].copy_from_slice(&decode_part("r", &tx.signature.r)?);
    compact[SIGNATURE_PART_SIZE..].copy_from_slice(&decode_part("s", &tx.signature.s)?);
    let mut signature = ecdsa::Signature::from_compact(&compact)
        .map_err(|e| TxError::MalformedSignature(e.to_string()))?;
    signature.normalize_s();

    let digest = Message::from_digest(sha256(&tx.signing_bytes()));
    SECP256K1_CONTEXT
        .verify_ecdsa(&digest, &signature, &public_key)
        .map_err(|_| TxError::BadSignature(tx.sender.clone()))
}
