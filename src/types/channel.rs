use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::utils::crypto::sign_voucher;

/// Smallest currency unit of the ledger.
pub type Balance = u128;
pub type BlockNumber = u64;

/// An account is identified by its ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub const LENGTH: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<&VerifyingKey> for AccountId {
    fn from(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl From<&SigningKey> for AccountId {
    fn from(key: &SigningKey) -> Self {
        Self(key.verifying_key().to_bytes())
    }
}

impl FromStr for AccountId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps log lines readable
        write!(f, "0x{}..", &self.to_hex()[..8])
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Storage key of a channel: one channel per ordered (sender, receiver) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub sender: AccountId,
    pub receiver: AccountId,
}

impl ChannelKey {
    pub fn new(sender: AccountId, receiver: AccountId) -> Self {
        Self { sender, receiver }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub balance: Balance,
    pub nonce: u64,
    pub opened_at: BlockNumber,
    pub expires_at: BlockNumber,
}

impl Channel {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.sender, self.receiver)
    }

    pub fn is_expired(&self, height: BlockNumber) -> bool {
        height >= self.expires_at
    }
}

/// Off-chain payment authorization handed from sender to receiver.
///
/// The signature covers `(receiver, nonce, session_id, amount)`, so a voucher is only
/// redeemable by the receiver it names, within the channel generation it was made for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub session_id: u32,
    pub amount: Balance,
    #[serde(with = "crate::utils::serde_hex")]
    pub signature: Vec<u8>,
}

impl Voucher {
    pub fn sign(
        sender_key: &SigningKey,
        receiver: &AccountId,
        nonce: u64,
        session_id: u32,
        amount: Balance,
    ) -> Self {
        Self {
            session_id,
            amount,
            signature: sign_voucher(sender_key, receiver, nonce, session_id, amount),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub session_id: u32,
    pub amount: Balance,
    pub remaining: Balance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedChannelInfo {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub nonce: u64,
    pub refunded: Balance,
    pub closed_at: BlockNumber,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverStats {
    pub receiver: AccountId,
    pub total_claimed: Balance,
    pub clients: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum ChannelEvent {
    ChannelOpened {
        sender: AccountId,
        receiver: AccountId,
        balance: Balance,
        nonce: u64,
        opened_at: BlockNumber,
        expires_at: BlockNumber,
    },
    BalanceAdded {
        sender: AccountId,
        receiver: AccountId,
        amount: Balance,
        at: BlockNumber,
    },
    PaymentClaimed {
        sender: AccountId,
        receiver: AccountId,
        session_id: u32,
        amount: Balance,
    },
    ChannelClosed {
        sender: AccountId,
        receiver: AccountId,
        refunded: Balance,
        at: BlockNumber,
    },
}
