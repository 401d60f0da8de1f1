use ed25519_dalek::SigningKey;

use super::manager::ChannelManager;
use crate::ledger::InMemoryLedger;
use crate::types::{AccountId, Balance};

pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn alice_key() -> SigningKey {
    key(1)
}

pub fn bob_key() -> SigningKey {
    key(2)
}

pub fn charlie_key() -> SigningKey {
    key(3)
}

pub fn alice() -> AccountId {
    AccountId::from(&alice_key())
}

pub fn bob() -> AccountId {
    AccountId::from(&bob_key())
}

pub fn charlie() -> AccountId {
    AccountId::from(&charlie_key())
}

pub fn dave() -> AccountId {
    AccountId::from(&key(4))
}

pub fn manager_with(balances: &[(AccountId, Balance)]) -> ChannelManager<InMemoryLedger> {
    ChannelManager::new(InMemoryLedger::with_balances(balances.iter().copied()))
}
