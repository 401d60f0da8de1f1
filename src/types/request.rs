use serde::{Deserialize, Serialize};

use super::{AccountId, Balance, BlockNumber, ChannelError, ChannelResult};
use crate::utils::crypto::SIGNATURE_LENGTH;

/// Boundary checks run on a decoded request before it reaches the channel manager.
///
/// `signer` is the account that signed the transport request.
pub trait Validate {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Balance,
    /// Lifetime in blocks.
    pub duration: BlockNumber,
}

impl Validate for OpenChannelRequest {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()> {
        if *signer != self.sender {
            return Err(ChannelError::Unauthorized);
        }
        if self.sender == self.receiver {
            return Err(ChannelError::SameChannelEnds);
        }
        if self.duration == 0 {
            return Err(ChannelError::InvalidDuration);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddBalanceRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Balance,
}

impl Validate for AddBalanceRequest {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()> {
        if *signer != self.sender {
            return Err(ChannelError::Unauthorized);
        }
        Ok(())
    }
}

/// Submitted by the receiver; the embedded signature is the sender's voucher signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPaymentRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub session_id: u32,
    pub amount: Balance,
    #[serde(with = "crate::utils::serde_hex")]
    pub signature: Vec<u8>,
}

impl Validate for ClaimPaymentRequest {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()> {
        if *signer != self.receiver {
            return Err(ChannelError::Unauthorized);
        }
        if self.signature.len() != SIGNATURE_LENGTH {
            return Err(ChannelError::InvalidSignature);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
}

impl Validate for CloseChannelRequest {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()> {
        if *signer != self.sender && *signer != self.receiver {
            return Err(ChannelError::Unauthorized);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseExpiredRequest {
    pub caller: AccountId,
}

impl Validate for CloseExpiredRequest {
    fn validate(&self, signer: &AccountId) -> ChannelResult<()> {
        if *signer != self.caller {
            return Err(ChannelError::Unauthorized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: AccountId = AccountId([1; 32]);
    const BOB: AccountId = AccountId([2; 32]);
    const EVE: AccountId = AccountId([9; 32]);

    #[test]
    fn open_must_be_signed_by_sender() {
        let request = OpenChannelRequest {
            sender: ALICE,
            receiver: BOB,
            amount: 100,
            duration: 10,
        };
        assert_eq!(request.validate(&ALICE), Ok(()));
        assert_eq!(request.validate(&BOB), Err(ChannelError::Unauthorized));
    }

    #[test]
    fn open_rejects_degenerate_channels() {
        let same_ends = OpenChannelRequest {
            sender: ALICE,
            receiver: ALICE,
            amount: 1,
            duration: 10,
        };
        assert_eq!(same_ends.validate(&ALICE), Err(ChannelError::SameChannelEnds));

        let zero_duration = OpenChannelRequest {
            sender: ALICE,
            receiver: BOB,
            amount: 1,
            duration: 0,
        };
        assert_eq!(zero_duration.validate(&ALICE), Err(ChannelError::InvalidDuration));
    }

    #[test]
    fn claim_must_be_signed_by_receiver() {
        let request = ClaimPaymentRequest {
            sender: ALICE,
            receiver: BOB,
            session_id: 1,
            amount: 5,
            signature: vec![0; SIGNATURE_LENGTH],
        };
        assert_eq!(request.validate(&BOB), Ok(()));
        assert_eq!(request.validate(&ALICE), Err(ChannelError::Unauthorized));

        let truncated = ClaimPaymentRequest {
            signature: vec![0; 12],
            ..request
        };
        assert_eq!(truncated.validate(&BOB), Err(ChannelError::InvalidSignature));
    }

    #[test]
    fn close_accepts_either_party_only() {
        let request = CloseChannelRequest {
            sender: ALICE,
            receiver: BOB,
        };
        assert_eq!(request.validate(&ALICE), Ok(()));
        assert_eq!(request.validate(&BOB), Ok(()));
        assert_eq!(request.validate(&EVE), Err(ChannelError::Unauthorized));
    }

    #[test]
    fn claim_signature_travels_as_hex() {
        let json = format!(
            r#"{{"sender":"{}","receiver":"{}","session_id":3,"amount":7,"signature":"0x{}"}}"#,
            ALICE.to_hex(),
            BOB.to_hex(),
            "ab".repeat(64)
        );
        let request: ClaimPaymentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.signature, vec![0xab; 64]);
        assert_eq!(request.session_id, 3);
    }
}
