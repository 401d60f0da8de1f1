use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

use crate::ledger::Ledger;
use crate::types::{
    AccountId, Balance, BlockNumber, Channel, ChannelError, ChannelEvent, ChannelKey,
    ChannelResult, ClosedChannelInfo, ReceiverStats,
};

/// Events kept for [`ChannelManager::take_events`]; the oldest are dropped first.
pub const EVENT_LOG_CAPACITY: usize = 1_024;

/// Channel lifecycle state machine on top of a [`Ledger`].
///
/// Every operation validates first and mutates afterwards, so a returned error
/// guarantees that neither the channel records nor the ledger changed. Callers are
/// expected to serialize access (`&mut self`); the service does so with a lock.
#[derive(Debug)]
pub struct ChannelManager<L> {
    pub(super) ledger: L,
    pub(super) channels: BTreeMap<ChannelKey, Channel>,
    /// Nonce the next channel of a pair will be opened with. Outlives the channel.
    nonces: HashMap<ChannelKey, u64>,
    /// Highest claimed session id of the pair's current generation.
    pub(super) sessions: HashMap<ChannelKey, u32>,
    locked: HashMap<AccountId, Balance>,
    payments: BTreeMap<AccountId, Balance>,
    clients: BTreeMap<AccountId, BTreeSet<AccountId>>,
    events: VecDeque<ChannelEvent>,
}

impl<L: Ledger> ChannelManager<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            channels: BTreeMap::new(),
            nonces: HashMap::new(),
            sessions: HashMap::new(),
            locked: HashMap::new(),
            payments: BTreeMap::new(),
            clients: BTreeMap::new(),
            events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn current_height(&self) -> BlockNumber {
        self.ledger.current_height()
    }

    /// Locks `lock_amount` of the sender's free balance into a new channel.
    ///
    /// An expired channel that nobody swept yet is closed as part of the same step,
    /// which advances the pair to the next generation.
    pub fn open_channel(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        lock_amount: Balance,
        duration: BlockNumber,
    ) -> ChannelResult<Channel> {
        if sender == receiver {
            return Err(ChannelError::SameChannelEnds);
        }
        let now = self.ledger.current_height();
        let expires_at = match now.checked_add(duration) {
            Some(expires_at) if duration > 0 => expires_at,
            _ => return Err(ChannelError::InvalidDuration),
        };

        let key = ChannelKey::new(sender, receiver);
        let stale_balance = match self.channels.get(&key) {
            Some(existing) if !existing.is_expired(now) => {
                debug!(?sender, ?receiver, "channel already open");
                return Err(ChannelError::ChannelAlreadyOpen);
            }
            Some(existing) => Some(existing.balance),
            None => None,
        };

        let spendable = self
            .ledger
            .free_balance(&sender)
            .saturating_add(stale_balance.unwrap_or_default());
        if spendable < lock_amount {
            debug!(?sender, %lock_amount, %spendable, "not enough free balance to open channel");
            return Err(ChannelError::InsufficientFunds);
        }

        // netted against the refund, so the debit is the only fallible step and runs
        // before any record changes
        let refund = stale_balance.unwrap_or_default();
        if lock_amount >= refund {
            self.ledger.debit(&sender, lock_amount - refund)?;
        } else {
            self.ledger.credit(&sender, refund - lock_amount);
        }
        if stale_balance.is_some() {
            self.retire(key, now);
        }

        let channel = Channel {
            sender,
            receiver,
            balance: lock_amount,
            nonce: self.next_nonce(&sender, &receiver),
            opened_at: now,
            expires_at,
        };
        self.channels.insert(key, channel.clone());
        self.lock(&sender, lock_amount);

        info!(
            ?sender,
            ?receiver,
            balance = %lock_amount,
            nonce = channel.nonce,
            expires_at,
            "channel opened"
        );
        self.emit(ChannelEvent::ChannelOpened {
            sender,
            receiver,
            balance: lock_amount,
            nonce: channel.nonce,
            opened_at: now,
            expires_at,
        });
        Ok(channel)
    }

    pub fn add_balance(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        amount: Balance,
    ) -> ChannelResult<Channel> {
        let now = self.ledger.current_height();
        let key = ChannelKey::new(sender, receiver);
        let channel = self
            .channels
            .get_mut(&key)
            .ok_or(ChannelError::ChannelNotFound)?;
        if channel.is_expired(now) {
            return Err(ChannelError::ChannelExpired);
        }
        let balance = channel
            .balance
            .checked_add(amount)
            .ok_or(ChannelError::BalanceOverflow)?;
        self.ledger.debit(&sender, amount)?;
        channel.balance = balance;
        let channel = channel.clone();

        self.lock(&sender, amount);
        info!(?sender, ?receiver, %amount, %balance, "channel balance added");
        self.emit(ChannelEvent::BalanceAdded {
            sender,
            receiver,
            amount,
            at: now,
        });
        Ok(channel)
    }

    /// Voluntary close by either party. The unclaimed balance always goes back to
    /// the sender, so the receiver should claim its latest voucher first.
    pub fn close_channel(
        &mut self,
        caller: AccountId,
        sender: AccountId,
        receiver: AccountId,
    ) -> ChannelResult<ClosedChannelInfo> {
        if caller != sender && caller != receiver {
            return Err(ChannelError::Unauthorized);
        }
        let now = self.ledger.current_height();
        self.close(ChannelKey::new(sender, receiver), now)
            .ok_or(ChannelError::ChannelNotFound)
    }

    /// Closes every expired channel `caller` is a party to. Finding nothing to close
    /// is not an error.
    pub fn close_expired_channels(
        &mut self,
        caller: AccountId,
    ) -> ChannelResult<Vec<ClosedChannelInfo>> {
        let now = self.ledger.current_height();
        let expired: Vec<ChannelKey> = self
            .channels
            .values()
            .filter(|channel| channel.sender == caller || channel.receiver == caller)
            .filter(|channel| channel.is_expired(now))
            .map(Channel::key)
            .collect();
        Ok(self.close_all(expired, now))
    }

    /// Expiry sweep over every channel, in (sender, receiver) order.
    pub fn sweep_expired(&mut self) -> Vec<ClosedChannelInfo> {
        let now = self.ledger.current_height();
        let expired: Vec<ChannelKey> = self
            .channels
            .values()
            .filter(|channel| channel.is_expired(now))
            .map(Channel::key)
            .collect();
        self.close_all(expired, now)
    }

    pub fn get_channel(&self, sender: &AccountId, receiver: &AccountId) -> Option<Channel> {
        self.channels
            .get(&ChannelKey::new(*sender, *receiver))
            .cloned()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// 0 when nothing was claimed in the current generation.
    pub fn last_claimed_session(&self, sender: &AccountId, receiver: &AccountId) -> u32 {
        self.sessions
            .get(&ChannelKey::new(*sender, *receiver))
            .copied()
            .unwrap_or_default()
    }

    /// Nonce of the open channel, or the one the next channel of the pair will get.
    pub fn next_nonce(&self, sender: &AccountId, receiver: &AccountId) -> u64 {
        self.nonces
            .get(&ChannelKey::new(*sender, *receiver))
            .copied()
            .unwrap_or_default()
    }

    /// Funds `sender` currently has locked across all of its channels.
    pub fn total_locked(&self, sender: &AccountId) -> Balance {
        self.locked.get(sender).copied().unwrap_or_default()
    }

    pub fn payment_statistics(&self) -> Vec<ReceiverStats> {
        self.payments
            .iter()
            .map(|(receiver, total)| ReceiverStats {
                receiver: *receiver,
                total_claimed: *total,
                clients: self.clients.get(receiver).map_or(0, |c| c.len() as u32),
            })
            .collect()
    }

    /// Returns the statistics accumulated since the previous drain and resets them.
    pub fn drain_payment_statistics(&mut self) -> Vec<ReceiverStats> {
        let stats = self.payment_statistics();
        self.payments.clear();
        self.clients.clear();
        stats
    }

    /// Drains the event log, oldest first. At most [`EVENT_LOG_CAPACITY`] events are
    /// retained between drains.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        self.events.drain(..).collect()
    }

    pub(super) fn emit(&mut self, event: ChannelEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn close_all(&mut self, keys: Vec<ChannelKey>, now: BlockNumber) -> Vec<ClosedChannelInfo> {
        keys.into_iter()
            .filter_map(|key| self.close(key, now))
            .collect()
    }

    /// Refund, remove, and advance the pair to the next generation.
    fn close(&mut self, key: ChannelKey, now: BlockNumber) -> Option<ClosedChannelInfo> {
        let closed = self.retire(key, now)?;
        self.ledger.credit(&closed.sender, closed.refunded);
        Some(closed)
    }

    /// Everything [`Self::close`] does except crediting the refund.
    fn retire(&mut self, key: ChannelKey, now: BlockNumber) -> Option<ClosedChannelInfo> {
        let channel = self.channels.remove(&key)?;
        self.unlock(&channel.sender, channel.balance);
        self.sessions.remove(&key);
        self.nonces.insert(key, channel.nonce.saturating_add(1));

        info!(
            sender = ?channel.sender,
            receiver = ?channel.receiver,
            refunded = %channel.balance,
            nonce = channel.nonce,
            "channel closed"
        );
        self.emit(ChannelEvent::ChannelClosed {
            sender: channel.sender,
            receiver: channel.receiver,
            refunded: channel.balance,
            at: now,
        });
        Some(ClosedChannelInfo {
            sender: channel.sender,
            receiver: channel.receiver,
            nonce: channel.nonce,
            refunded: channel.balance,
            closed_at: now,
        })
    }

    fn lock(&mut self, sender: &AccountId, amount: Balance) {
        let total = self.locked.entry(*sender).or_default();
        *total = total.saturating_add(amount);
    }

    pub(super) fn unlock(&mut self, sender: &AccountId, amount: Balance) {
        if let Some(total) = self.locked.get_mut(sender) {
            *total = total.saturating_sub(amount);
            if *total == 0 {
                self.locked.remove(sender);
            }
        }
    }

    pub(super) fn record_payment(&mut self, sender: AccountId, receiver: AccountId, amount: Balance) {
        let total = self.payments.entry(receiver).or_default();
        *total = total.saturating_add(amount);
        self.clients.entry(receiver).or_default().insert(sender);
    }
}
