use tracing::{debug, info};

use super::manager::ChannelManager;
use crate::ledger::Ledger;
use crate::types::{
    AccountId, Balance, ChannelError, ChannelEvent, ChannelKey, ChannelResult, ClaimReceipt,
    Voucher,
};
use crate::utils::crypto::verify_voucher;

impl<L: Ledger> ChannelManager<L> {
    /// Redeems a sender-signed voucher on behalf of the receiver.
    ///
    /// The voucher is checked against the channel's current nonce, so a voucher from a
    /// previous generation of the pair never verifies. `amount` is deducted as-is: each
    /// voucher carries the increment for its session, not a running total.
    pub fn claim_payment(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        session_id: u32,
        amount: Balance,
        signature: &[u8],
    ) -> ChannelResult<ClaimReceipt> {
        let now = self.ledger.current_height();
        let key = ChannelKey::new(sender, receiver);
        let (nonce, balance) = match self.channels.get(&key) {
            Some(channel) if channel.is_expired(now) => return Err(ChannelError::ChannelExpired),
            Some(channel) => (channel.nonce, channel.balance),
            None => return Err(ChannelError::ChannelNotFound),
        };

        if !verify_voucher(&sender, &receiver, nonce, session_id, amount, signature) {
            debug!(?sender, ?receiver, nonce, session_id, "voucher signature rejected");
            return Err(ChannelError::InvalidSignature);
        }

        let last_session = self.last_claimed_session(&sender, &receiver);
        if session_id <= last_session {
            debug!(?sender, ?receiver, session_id, last_session, "stale session id");
            return Err(ChannelError::StaleSessionId);
        }

        let remaining = balance
            .checked_sub(amount)
            .ok_or(ChannelError::InsufficientChannelBalance)?;

        if let Some(channel) = self.channels.get_mut(&key) {
            channel.balance = remaining;
        }
        self.sessions.insert(key, session_id);
        self.ledger.credit(&receiver, amount);
        self.unlock(&sender, amount);
        self.record_payment(sender, receiver, amount);

        info!(?sender, ?receiver, session_id, %amount, %remaining, "payment claimed");
        self.emit(ChannelEvent::PaymentClaimed {
            sender,
            receiver,
            session_id,
            amount,
        });
        Ok(ClaimReceipt {
            sender,
            receiver,
            session_id,
            amount,
            remaining,
        })
    }

    pub fn claim_voucher(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        voucher: &Voucher,
    ) -> ChannelResult<ClaimReceipt> {
        self.claim_payment(
            sender,
            receiver,
            voucher.session_id,
            voucher.amount,
            &voucher.signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::ledger::Ledger;
    use crate::state::testing::*;
    use crate::types::{ChannelError, Voucher};

    #[test]
    fn claim_moves_funds_to_receiver() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 300, 720).unwrap();

        let voucher = Voucher::sign(&alice_key(), &bob(), 0, 1, 30);
        let receipt = manager.claim_voucher(alice(), bob(), &voucher).unwrap();

        assert_eq!(receipt.remaining, 270);
        assert_eq!(manager.ledger().free_balance(&bob()), 30);
        assert_eq!(manager.last_claimed_session(&alice(), &bob()), 1);
        assert_eq!(manager.total_locked(&alice()), 270);
    }

    #[test]
    fn sessions_must_strictly_increase_but_may_skip() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 300, 720).unwrap();

        let fifth = Voucher::sign(&alice_key(), &bob(), 0, 5, 10);
        manager.claim_voucher(alice(), bob(), &fifth).unwrap();

        let third = Voucher::sign(&alice_key(), &bob(), 0, 3, 10);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &third),
            Err(ChannelError::StaleSessionId)
        );
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &fifth),
            Err(ChannelError::StaleSessionId)
        );

        let sixth = Voucher::sign(&alice_key(), &bob(), 0, 6, 10);
        manager.claim_voucher(alice(), bob(), &sixth).unwrap();
        assert_eq!(manager.get_channel(&alice(), &bob()).unwrap().balance, 280);
    }

    #[test]
    fn session_zero_is_never_claimable() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 300, 720).unwrap();
        let voucher = Voucher::sign(&alice_key(), &bob(), 0, 0, 10);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &voucher),
            Err(ChannelError::StaleSessionId)
        );
    }

    #[test]
    fn forged_or_altered_vouchers_are_rejected() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 300, 720).unwrap();

        let forged = Voucher::sign(&charlie_key(), &bob(), 0, 1, 10);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &forged),
            Err(ChannelError::InvalidSignature)
        );

        let mut inflated = Voucher::sign(&alice_key(), &bob(), 0, 1, 10);
        inflated.amount = 200;
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &inflated),
            Err(ChannelError::InvalidSignature)
        );

        // issued to somebody else
        let redirected = Voucher::sign(&alice_key(), &charlie(), 0, 1, 10);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &redirected),
            Err(ChannelError::InvalidSignature)
        );

        assert_eq!(
            manager.claim_payment(alice(), bob(), 1, 10, &[0u8; 3]),
            Err(ChannelError::InvalidSignature)
        );

        // rejected claims do not burn the session
        assert_eq!(manager.last_claimed_session(&alice(), &bob()), 0);
        assert_eq!(manager.get_channel(&alice(), &bob()).unwrap().balance, 300);
    }

    #[test]
    fn overdraw_is_rejected_without_consuming_session() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 100, 720).unwrap();

        let too_much = Voucher::sign(&alice_key(), &bob(), 0, 1, 101);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &too_much),
            Err(ChannelError::InsufficientChannelBalance)
        );
        assert_eq!(manager.ledger().free_balance(&bob()), 0);

        let exact = Voucher::sign(&alice_key(), &bob(), 0, 1, 100);
        let receipt = manager.claim_voucher(alice(), bob(), &exact).unwrap();
        assert_eq!(receipt.remaining, 0);
        assert!(manager.get_channel(&alice(), &bob()).is_some());
    }

    #[test]
    fn expired_or_missing_channels_cannot_be_claimed() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        let voucher = Voucher::sign(&alice_key(), &bob(), 0, 1, 10);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &voucher),
            Err(ChannelError::ChannelNotFound)
        );

        manager.open_channel(alice(), bob(), 100, 5).unwrap();
        manager.ledger_mut().advance_to(5);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &voucher),
            Err(ChannelError::ChannelExpired)
        );
        assert_eq!(manager.get_channel(&alice(), &bob()).unwrap().balance, 100);
    }

    #[test]
    fn vouchers_do_not_survive_a_reopen() {
        let mut manager = manager_with(&[(alice(), 1_000)]);
        manager.open_channel(alice(), bob(), 100, 50).unwrap();
        let old = Voucher::sign(&alice_key(), &bob(), 0, 1, 10);
        manager.close_channel(alice(), alice(), bob()).unwrap();

        assert_eq!(
            manager.claim_voucher(alice(), bob(), &old),
            Err(ChannelError::ChannelNotFound)
        );

        let reopened = manager.open_channel(alice(), bob(), 100, 50).unwrap();
        assert_eq!(reopened.nonce, 1);
        assert_eq!(
            manager.claim_voucher(alice(), bob(), &old),
            Err(ChannelError::InvalidSignature)
        );

        let fresh = Voucher::sign(&alice_key(), &bob(), 1, 1, 10);
        assert!(manager.claim_voucher(alice(), bob(), &fresh).is_ok());
    }
}
