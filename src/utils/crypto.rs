use blake2::{digest::consts::U32, Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::types::{AccountId, Balance, ServiceError, ServiceResult};

type Blake2b256 = Blake2b<U32>;

pub const SIGNATURE_LENGTH: usize = 64;

/// receiver (32) || nonce (8, BE) || session_id (4, BE) || amount (16, LE)
pub const VOUCHER_MESSAGE_LENGTH: usize = 32 + 8 + 4 + 16;

/// Canonical voucher bytes. `amount` is the only little-endian field; the layout must
/// stay bit-exact for vouchers signed by existing wallets to verify.
pub fn encode_voucher(receiver: &AccountId, nonce: u64, session_id: u32, amount: Balance) -> Vec<u8> {
    let mut message = Vec::with_capacity(VOUCHER_MESSAGE_LENGTH);
    message.extend_from_slice(receiver.as_bytes());
    message.extend_from_slice(&nonce.to_be_bytes());
    message.extend_from_slice(&session_id.to_be_bytes());
    message.extend_from_slice(&amount.to_le_bytes());
    message
}

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let digest = Blake2b256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The 32-byte digest a voucher signature is made over.
pub fn voucher_hash(receiver: &AccountId, nonce: u64, session_id: u32, amount: Balance) -> [u8; 32] {
    blake2_256(&encode_voucher(receiver, nonce, session_id, amount))
}

pub fn sign_voucher(
    sender_key: &SigningKey,
    receiver: &AccountId,
    nonce: u64,
    session_id: u32,
    amount: Balance,
) -> Vec<u8> {
    let hash = voucher_hash(receiver, nonce, session_id, amount);
    sender_key.sign(&hash).to_bytes().to_vec()
}

/// Never fails: malformed keys and signatures simply do not verify.
pub fn verify_signature(signer: &AccountId, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(signer.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

pub fn verify_voucher(
    sender: &AccountId,
    receiver: &AccountId,
    nonce: u64,
    session_id: u32,
    amount: Balance,
    signature: &[u8],
) -> bool {
    let hash = voucher_hash(receiver, nonce, session_id, amount);
    verify_signature(sender, &hash, signature)
}

/// Bytes a caller signs to authenticate an API request.
pub fn create_request_message(timestamp: u64, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + body.len());
    message.extend_from_slice(&timestamp.to_be_bytes());
    message.extend_from_slice(body);
    message
}

pub fn sign_request(key: &SigningKey, timestamp: u64, body: &[u8]) -> Vec<u8> {
    key.sign(&create_request_message(timestamp, body))
        .to_bytes()
        .to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeypair {
    pub public_key: String,
    pub secret_key: String,
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn save_signing_key(path: &Path, key: &SigningKey) -> ServiceResult<()> {
    let stored = StoredKeypair {
        public_key: hex::encode(key.verifying_key().to_bytes()),
        secret_key: hex::encode(key.to_bytes()),
    };
    let encoded = toml::to_string_pretty(&stored)
        .map_err(|err| ServiceError::Config(format!("failed to encode keypair: {err}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encoded)?;
    Ok(())
}

pub fn load_signing_key(path: &Path) -> ServiceResult<SigningKey> {
    let raw = fs::read_to_string(path)?;
    let stored: StoredKeypair = toml::from_str(&raw)
        .map_err(|err| ServiceError::Config(format!("failed to decode keypair: {err}")))?;
    let mut secret = [0u8; 32];
    hex::decode_to_slice(&stored.secret_key, &mut secret)
        .map_err(|err| ServiceError::Crypto(format!("invalid secret key encoding: {err}")))?;
    let key = SigningKey::from_bytes(&secret);
    if hex::encode(key.verifying_key().to_bytes()) != stored.public_key.trim_start_matches("0x") {
        return Err(ServiceError::Crypto(
            "public key does not match secret key".to_string(),
        ));
    }
    Ok(key)
}
