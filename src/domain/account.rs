//! Account
//!
//! Account rows as held by the account store. Balances are only ever
//! changed by the ledger engine inside its unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Balance;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Human-facing number, unique across the store
    pub account_number: String,
    pub balance: Balance,
    pub is_locked: bool,
    pub last_updated: DateTime<Utc>,
    pub customer_id: Uuid,
}

impl Account {
    /// A freshly opened account with a zero balance.
    pub fn open(customer_id: Uuid, account_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_number: account_number.into(),
            balance: Balance::zero(),
            is_locked: false,
            last_updated: Utc::now(),
            customer_id,
        }
    }
}

/// Account owner. Only the notification preference matters to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub opted_for_notifications: bool,
}

impl Customer {
    pub fn new(name: impl Into<String>, email: impl Into<String>, opted_for_notifications: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            opted_for_notifications,
        }
    }
}
