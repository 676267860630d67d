//! Transaction
//!
//! A single ledger operation against one or two accounts. Created Pending,
//! moved exactly once to a terminal status, and only touched afterwards by
//! the fraud-flag side channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, DomainError, OperationContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionChannel {
    Mobile,
    Web,
    Atm,
    Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Flagged,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(DomainError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(TransactionType, "transaction type", {
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Transfer => "transfer",
});

text_enum!(TransactionChannel, "transaction channel", {
    Mobile => "mobile",
    Web => "web",
    Atm => "atm",
    Branch => "branch",
});

text_enum!(TransactionStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Flagged => "flagged",
});

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

const INTERNAL_PREFIX: &str = "internal error: ";

/// Why a ledger operation did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SourceAccountNotFound,
    InsufficientFunds,
    DestinationAccountNotFound,
    AccountLocked,
    SameAccount,
    /// Infrastructure failure; the unit of work was rolled back
    Internal(String),
    /// Stored reason this build does not know, kept verbatim
    Other(String),
}

impl FailureReason {
    /// Parse a reason as stored on a transaction row.
    pub fn parse(stored: &str) -> Self {
        match stored {
            "source account not found" => Self::SourceAccountNotFound,
            "insufficient funds" => Self::InsufficientFunds,
            "destination account not found" => Self::DestinationAccountNotFound,
            "account locked" => Self::AccountLocked,
            "cannot transfer to the same account" => Self::SameAccount,
            other => match other.strip_prefix(INTERNAL_PREFIX) {
                Some(detail) => Self::Internal(detail.to_string()),
                None => Self::Other(other.to_string()),
            },
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceAccountNotFound => f.write_str("source account not found"),
            Self::InsufficientFunds => f.write_str("insufficient funds"),
            Self::DestinationAccountNotFound => f.write_str("destination account not found"),
            Self::AccountLocked => f.write_str("account locked"),
            Self::SameAccount => f.write_str("cannot transfer to the same account"),
            Self::Internal(detail) => write!(f, "{INTERNAL_PREFIX}{detail}"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Source account
    pub account_id: Uuid,
    /// Set iff `transaction_type` is Transfer
    pub destination_account_id: Option<Uuid>,
    pub amount: Amount,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub channel: TransactionChannel,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub failure_reason: Option<String>,
    pub origin: OperationContext,
}

impl Transaction {
    fn pending(
        account_id: Uuid,
        destination_account_id: Option<Uuid>,
        amount: Amount,
        transaction_type: TransactionType,
        channel: TransactionChannel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            destination_account_id,
            amount,
            transaction_type,
            channel,
            status: TransactionStatus::Pending,
            timestamp: Utc::now(),
            description: transaction_type.as_str().to_string(),
            failure_reason: None,
            origin: OperationContext::default(),
        }
    }

    pub fn deposit(account_id: Uuid, amount: Amount, channel: TransactionChannel) -> Self {
        Self::pending(account_id, None, amount, TransactionType::Deposit, channel)
    }

    pub fn withdrawal(account_id: Uuid, amount: Amount, channel: TransactionChannel) -> Self {
        Self::pending(account_id, None, amount, TransactionType::Withdrawal, channel)
    }

    pub fn transfer(
        from: Uuid,
        to: Uuid,
        amount: Amount,
        channel: TransactionChannel,
    ) -> Self {
        Self::pending(from, Some(to), amount, TransactionType::Transfer, channel)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_origin(mut self, origin: OperationContext) -> Self {
        self.origin = origin;
        self
    }

    /// Every account this transaction touches, sorted for lock ordering.
    pub fn touched_accounts(&self) -> Vec<Uuid> {
        let mut ids = vec![self.account_id];
        if let Some(destination) = self.destination_account_id {
            if destination != self.account_id {
                ids.push(destination);
            }
        }
        ids.sort();
        ids
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure_reason.as_deref().map(FailureReason::parse)
    }

    /// Same accounts, type and amount.
    pub fn same_movement(&self, other: &Transaction) -> bool {
        self.account_id == other.account_id
            && self.destination_account_id == other.destination_account_id
            && self.transaction_type == other.transaction_type
            && self.amount == other.amount
    }

    /// Pending again, for another attempt. Only a Pending record or one that
    /// failed with an internal error can be reopened.
    pub fn reopened(mut self) -> Result<Self, DomainError> {
        let internal = self.failure().map_or(false, |r| r.is_internal());
        match self.status {
            TransactionStatus::Pending => Ok(self),
            TransactionStatus::Failed if internal => {
                self.status = TransactionStatus::Pending;
                self.failure_reason = None;
                Ok(self)
            }
            from => Err(DomainError::InvalidStatusTransition {
                from,
                to: TransactionStatus::Pending,
            }),
        }
    }

    fn finish(mut self, status: TransactionStatus) -> Result<Self, DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        Ok(self)
    }

    pub fn completed(self) -> Result<Self, DomainError> {
        self.finish(TransactionStatus::Completed)
    }

    pub fn failed(self, reason: &FailureReason) -> Result<Self, DomainError> {
        let mut tx = self.finish(TransactionStatus::Failed)?;
        tx.failure_reason = Some(reason.to_string());
        Ok(tx)
    }

    /// Fraud flag. Allowed from any state except Flagged itself.
    pub fn flagged(mut self) -> Result<Self, DomainError> {
        if self.status == TransactionStatus::Flagged {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: TransactionStatus::Flagged,
            });
        }
        self.status = TransactionStatus::Flagged;
        Ok(self)
    }
}

/// Incoming request, checked before the ledger engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub account_id: Uuid,
    #[serde(default)]
    pub destination_account_id: Option<Uuid>,
    /// Amount as a string for precise decimal
    pub amount: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub channel: TransactionChannel,
    #[serde(default)]
    pub description: Option<String>,
}

impl TransactionRequest {
    pub fn validate(self, origin: OperationContext) -> Result<Transaction, DomainError> {
        let amount: Amount = self
            .amount
            .parse()
            .map_err(|e| DomainError::InvalidAmount(format!("{}", e)))?;

        let tx = match (self.transaction_type, self.destination_account_id) {
            (TransactionType::Transfer, None) => return Err(DomainError::MissingDestination),
            (TransactionType::Transfer, Some(to)) if to == self.account_id => {
                return Err(DomainError::SameAccountTransfer)
            }
            (TransactionType::Transfer, Some(to)) => {
                Transaction::transfer(self.account_id, to, amount, self.channel)
            }
            (_, Some(_)) => return Err(DomainError::UnexpectedDestination),
            (TransactionType::Deposit, None) => {
                Transaction::deposit(self.account_id, amount, self.channel)
            }
            (TransactionType::Withdrawal, None) => {
                Transaction::withdrawal(self.account_id, amount, self.channel)
            }
        };

        let tx = match self.description {
            Some(description) if !description.trim().is_empty() => tx.with_description(description),
            _ => tx,
        };

        Ok(tx.with_origin(origin))
    }
}
