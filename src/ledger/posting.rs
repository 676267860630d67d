//! Posting planner
//!
//! Decides what a transaction does to the accounts it touches, given the
//! rows already locked by the engine. No I/O; the engine persists the plan.

use uuid::Uuid;

use crate::domain::{Account, AmountError, Balance, Event, FailureReason, Transaction, TransactionType};

/// One account balance before and after the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub account_id: Uuid,
    pub old: Balance,
    pub new: Balance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posting {
    /// Apply these changes; the source account's change comes first
    Completed(Vec<BalanceChange>),
    Rejected(FailureReason),
}

fn check_open(account: &Account) -> Result<(), FailureReason> {
    if account.is_locked {
        return Err(FailureReason::AccountLocked);
    }
    Ok(())
}

/// Plan `tx` against the locked `source` and `destination` rows.
///
/// Rejection precedence: source not found, source locked, insufficient
/// funds, destination not found, destination locked, same account.
pub fn plan(
    tx: &Transaction,
    source: Option<&Account>,
    destination: Option<&Account>,
) -> Result<Posting, AmountError> {
    let Some(source) = source else {
        return Ok(Posting::Rejected(FailureReason::SourceAccountNotFound));
    };
    if let Err(reason) = check_open(source) {
        return Ok(Posting::Rejected(reason));
    }

    let change = match tx.transaction_type {
        TransactionType::Deposit => BalanceChange {
            account_id: source.id,
            old: source.balance,
            new: source.balance.credit(&tx.amount)?,
        },
        TransactionType::Withdrawal | TransactionType::Transfer => {
            if !source.balance.is_sufficient_for(&tx.amount) {
                return Ok(Posting::Rejected(FailureReason::InsufficientFunds));
            }
            BalanceChange {
                account_id: source.id,
                old: source.balance,
                new: source.balance.debit(&tx.amount)?,
            }
        }
    };

    if tx.transaction_type != TransactionType::Transfer {
        return Ok(Posting::Completed(vec![change]));
    }

    let Some(destination) = destination else {
        return Ok(Posting::Rejected(FailureReason::DestinationAccountNotFound));
    };
    if let Err(reason) = check_open(destination) {
        return Ok(Posting::Rejected(reason));
    }
    if destination.id == source.id {
        return Ok(Posting::Rejected(FailureReason::SameAccount));
    }

    let credit = BalanceChange {
        account_id: destination.id,
        old: destination.balance,
        new: destination.balance.credit(&tx.amount)?,
    };

    Ok(Posting::Completed(vec![change, credit]))
}

/// Events staged with a completed transaction: `TransactionProcessed`
/// with the new source balance, then one `BalanceUpdated` per change.
pub fn completion_events(tx: &Transaction, changes: &[BalanceChange]) -> Vec<Event> {
    let mut events = Vec::with_capacity(changes.len() + 1);

    if let Some(source) = changes.iter().find(|c| c.account_id == tx.account_id) {
        events.push(Event::transaction_processed(tx.clone(), source.new));
    }

    events.extend(
        changes
            .iter()
            .map(|c| Event::balance_updated(c.account_id, c.old, c.new, tx.id)),
    );

    events
}
