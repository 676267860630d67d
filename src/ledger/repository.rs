//! Ledger Repository
//!
//! SQL for accounts, customers and transactions. Functions that take a
//! `Transaction<'_, Postgres>` run inside the engine's unit of work; the
//! rest are standalone reads and admin writes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::domain::{
    Account, Amount, Balance, Customer, Transaction, TransactionChannel, TransactionStatus,
    TransactionType,
};

use super::LedgerError;

type AccountRow = (Uuid, String, Decimal, bool, DateTime<Utc>, Uuid);

type TransactionRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    Decimal,
    String,
    String,
    String,
    DateTime<Utc>,
    String,
    Option<String>,
    Value,
);

const ACCOUNT_COLUMNS: &str = "id, account_number, balance, is_locked, last_updated, customer_id";

const TRANSACTION_COLUMNS: &str = "id, account_id, destination_account_id, amount, transaction_type, \
     channel, status, occurred_at, description, failure_reason, origin";

fn corrupt(what: &str, id: Uuid, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::CorruptRow(format!("{} {}: {}", what, id, detail))
}

fn account_from_row(row: AccountRow) -> Result<Account, LedgerError> {
    let (id, account_number, balance, is_locked, last_updated, customer_id) = row;
    Ok(Account {
        id,
        account_number,
        balance: Balance::new(balance).map_err(|e| corrupt("account", id, e))?,
        is_locked,
        last_updated,
        customer_id,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, LedgerError> {
    let (
        id,
        account_id,
        destination_account_id,
        amount,
        transaction_type,
        channel,
        status,
        timestamp,
        description,
        failure_reason,
        origin,
    ) = row;

    Ok(Transaction {
        id,
        account_id,
        destination_account_id,
        amount: Amount::new(amount).map_err(|e| corrupt("transaction", id, e))?,
        transaction_type: transaction_type
            .parse::<TransactionType>()
            .map_err(|e| corrupt("transaction", id, e))?,
        channel: channel
            .parse::<TransactionChannel>()
            .map_err(|e| corrupt("transaction", id, e))?,
        status: status
            .parse::<TransactionStatus>()
            .map_err(|e| corrupt("transaction", id, e))?,
        timestamp,
        description,
        failure_reason,
        origin: serde_json::from_value(origin)?,
    })
}

// =========================================================================
// Unit-of-work operations
// =========================================================================

/// Read an account and hold its row lock until the unit ends.
pub async fn lock_account(
    tx: &mut DbTransaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<Option<Account>, LedgerError> {
    let query = format!("SELECT {} FROM accounts WHERE id = $1 FOR UPDATE", ACCOUNT_COLUMNS);

    let row: Option<AccountRow> = sqlx::query_as(&query)
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;

    row.map(account_from_row).transpose()
}

pub async fn update_balance(
    tx: &mut DbTransaction<'_, Postgres>,
    account_id: Uuid,
    balance: Balance,
    updated_at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET balance = $2, last_updated = $3
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(balance.value())
    .bind(updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Read a transaction record and lock it, serialising re-applies of one id.
pub async fn lock_transaction(
    tx: &mut DbTransaction<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<Option<Transaction>, LedgerError> {
    let query = format!(
        "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
        TRANSACTION_COLUMNS
    );

    let row: Option<TransactionRow> = sqlx::query_as(&query)
        .bind(transaction_id)
        .fetch_optional(&mut **tx)
        .await?;

    row.map(transaction_from_row).transpose()
}

/// Insert the transaction, or overwrite a Pending row or one that failed
/// with an internal error. Returns false when an existing row was kept.
pub async fn record_transaction(
    tx: &mut DbTransaction<'_, Postgres>,
    transaction: &Transaction,
) -> Result<bool, LedgerError> {
    let origin = serde_json::to_value(&transaction.origin)?;

    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            id, account_id, destination_account_id, amount, transaction_type,
            channel, status, occurred_at, description, failure_reason, origin
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            failure_reason = EXCLUDED.failure_reason
        WHERE transactions.status = 'pending'
           OR (transactions.status = 'failed' AND transactions.failure_reason LIKE 'internal error:%')
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.account_id)
    .bind(transaction.destination_account_id)
    .bind(transaction.amount.value())
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.channel.as_str())
    .bind(transaction.status.as_str())
    .bind(transaction.timestamp)
    .bind(&transaction.description)
    .bind(&transaction.failure_reason)
    .bind(&origin)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert a Pending record. Returns false if the id is already recorded.
pub async fn insert_pending(
    tx: &mut DbTransaction<'_, Postgres>,
    transaction: &Transaction,
) -> Result<bool, LedgerError> {
    debug_assert_eq!(transaction.status, TransactionStatus::Pending);
    let origin = serde_json::to_value(&transaction.origin)?;

    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            id, account_id, destination_account_id, amount, transaction_type,
            channel, status, occurred_at, description, failure_reason, origin
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, NULL, $9)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.account_id)
    .bind(transaction.destination_account_id)
    .bind(transaction.amount.value())
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.channel.as_str())
    .bind(transaction.timestamp)
    .bind(&transaction.description)
    .bind(&origin)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    tx: &mut DbTransaction<'_, Postgres>,
    transaction_id: Uuid,
    status: TransactionStatus,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE transactions SET status = $2 WHERE id = $1")
        .bind(transaction_id)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Owner of an account, if the account exists
pub async fn account_customer(
    executor: impl PgExecutor<'_>,
    account_id: Uuid,
) -> Result<Option<Uuid>, LedgerError> {
    let customer_id = sqlx::query_scalar("SELECT customer_id FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(executor)
        .await?;

    Ok(customer_id)
}

// =========================================================================
// Reads
// =========================================================================

pub async fn find_account(pool: &PgPool, account_id: Uuid) -> Result<Option<Account>, LedgerError> {
    let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);

    let row: Option<AccountRow> = sqlx::query_as(&query)
        .bind(account_id)
        .fetch_optional(pool)
        .await?;

    row.map(account_from_row).transpose()
}

pub async fn find_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Option<Transaction>, LedgerError> {
    let query = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);

    let row: Option<TransactionRow> = sqlx::query_as(&query)
        .bind(transaction_id)
        .fetch_optional(pool)
        .await?;

    row.map(transaction_from_row).transpose()
}

/// Transactions with `account_id` as source, in `[from, to]`, newest first.
pub async fn account_transactions(
    pool: &PgPool,
    account_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Transaction>, LedgerError> {
    let query = format!(
        r#"
        SELECT {}
        FROM transactions
        WHERE account_id = $1 AND occurred_at >= $2 AND occurred_at <= $3
        ORDER BY occurred_at DESC, id DESC
        "#,
        TRANSACTION_COLUMNS
    );

    let rows: Vec<TransactionRow> = sqlx::query_as(&query)
        .bind(account_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(transaction_from_row).collect()
}

// =========================================================================
// Administration
// =========================================================================

pub async fn insert_customer(pool: &PgPool, customer: &Customer) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO customers (id, name, email, opted_for_notifications)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(customer.id)
    .bind(&customer.name)
    .bind(&customer.email)
    .bind(customer.opted_for_notifications)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_account(pool: &PgPool, account: &Account) -> Result<(), LedgerError> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (id, account_number, balance, is_locked, last_updated, customer_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(account.id)
    .bind(&account.account_number)
    .bind(account.balance.value())
    .bind(account.is_locked)
    .bind(account.last_updated)
    .bind(account.customer_id)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(LedgerError::DuplicateAccountNumber(account.account_number.clone()))
        }
        Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
            Err(LedgerError::CustomerNotFound(account.customer_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Returns false if the account does not exist.
pub async fn set_locked(pool: &PgPool, account_id: Uuid, locked: bool) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET is_locked = $2, last_updated = NOW()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(locked)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
