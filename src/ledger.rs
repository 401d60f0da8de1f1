//! The account ledger the channel manager settles against.
//!
//! In a chain deployment this is the runtime's balances module; standalone, the
//! [`InMemoryLedger`] plays that role and block height is driven by a clock task.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::{AccountId, Balance, BlockNumber};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("insufficient free balance")]
pub struct InsufficientFunds;

pub trait Ledger {
    fn free_balance(&self, account: &AccountId) -> Balance;

    /// Must leave the account untouched when it returns an error. May fail even when
    /// `free_balance` covers `amount`, e.g. under reserves the ledger does not report.
    fn debit(&mut self, account: &AccountId, amount: Balance) -> Result<(), InsufficientFunds>;

    fn credit(&mut self, account: &AccountId, amount: Balance);

    fn current_height(&self) -> BlockNumber;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    balances: HashMap<AccountId, Balance>,
    height: BlockNumber,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: impl IntoIterator<Item = (AccountId, Balance)>) -> Self {
        Self {
            balances: balances.into_iter().collect(),
            height: 0,
        }
    }

    pub fn set_balance(&mut self, account: AccountId, balance: Balance) {
        self.balances.insert(account, balance);
    }

    pub fn advance(&mut self, blocks: BlockNumber) -> BlockNumber {
        self.height = self.height.saturating_add(blocks);
        self.height
    }

    /// Heights never move backwards.
    pub fn advance_to(&mut self, height: BlockNumber) -> BlockNumber {
        self.height = self.height.max(height);
        self.height
    }

    pub fn total_issuance(&self) -> Balance {
        self.balances.values().sum()
    }
}

impl Ledger for InMemoryLedger {
    fn free_balance(&self, account: &AccountId) -> Balance {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn debit(&mut self, account: &AccountId, amount: Balance) -> Result<(), InsufficientFunds> {
        let remaining = self
            .free_balance(account)
            .checked_sub(amount)
            .ok_or(InsufficientFunds)?;
        self.balances.insert(*account, remaining);
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, amount: Balance) {
        let free = self.balances.entry(*account).or_default();
        *free = free.saturating_add(amount);
    }

    fn current_height(&self) -> BlockNumber {
        self.height
    }
}
