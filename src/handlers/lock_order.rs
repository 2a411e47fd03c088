//! Balance-update ordering
//!
//! Every unit of work that touches several accounts updates them in
//! ascending account id order. Two transfers over the same accounts, in
//! either direction, therefore take their row locks in the same order and
//! can never wait on each other in a cycle.

use crate::domain::{AccountId, Amount};

/// Which side of a transfer a balance update belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Debit,
    Credit,
}

/// One balance update of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceLeg {
    pub account_id: AccountId,
    pub delta: i64,
    pub side: Side,
}

impl BalanceLeg {
    pub fn debit(account_id: AccountId, amount: Amount) -> Self {
        Self {
            account_id,
            delta: amount.debit_delta(),
            side: Side::Debit,
        }
    }

    pub fn credit(account_id: AccountId, amount: Amount) -> Self {
        Self {
            account_id,
            delta: amount.credit_delta(),
            side: Side::Credit,
        }
    }
}

/// Sort legs into lock-acquisition order
pub fn sort_legs(legs: &mut [BalanceLeg]) {
    legs.sort_by_key(|leg| leg.account_id);
}

/// Debit and credit legs of a transfer, lower account id first
pub fn transfer_legs(from: AccountId, to: AccountId, amount: Amount) -> [BalanceLeg; 2] {
    let mut legs = [BalanceLeg::debit(from, amount), BalanceLeg::credit(to, amount)];
    sort_legs(&mut legs);
    legs
}
