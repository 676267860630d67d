//! Common test utilities
//!
//! Database tests share one schema and never truncate: every test creates
//! its own customers and accounts and filters by their ids.

#![allow(dead_code)]

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use bank_ledger::domain::{Account, Amount, Customer, Transaction, TransactionChannel};
use bank_ledger::ledger::LedgerEngine;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Arbitrary key serializing concurrent schema setup across test binaries
const SCHEMA_LOCK_KEY: i64 = 7_230_114;

/// Connect and apply the schema. `None` when DATABASE_URL is not set, so
/// database tests are skipped rather than failed.
pub async fn setup() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to take schema lock");
    (&mut *conn).execute(SCHEMA).await.expect("Failed to apply schema");
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to release schema lock");
    drop(conn);

    Some(pool)
}

/// Connect with a private, freshly migrated schema. Use for tests that
/// assert on table-wide state such as outbox ordering or counts.
pub async fn setup_isolated() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let schema = format!("test_{}", Uuid::new_v4().simple());

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin)
        .await
        .expect("Failed to create schema");
    admin.close().await;

    let search_path = format!("SET search_path TO {}", schema);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let sql = search_path.clone();
            Box::pin(async move {
                conn.execute(sql.as_str()).await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    (&pool).execute(SCHEMA).await.expect("Failed to apply schema");

    Some(pool)
}

pub fn amount(value: i64) -> Amount {
    Amount::from_integer(value).unwrap()
}

/// Unique account number per call
pub fn account_number() -> String {
    format!("ACC-{}", Uuid::new_v4().simple())
}

pub async fn customer(engine: &LedgerEngine, opted_in: bool) -> Customer {
    engine
        .register_customer(Customer::new("Test Customer", "customer@example.test", opted_in))
        .await
        .expect("Failed to register customer")
}

/// Open an account for a fresh customer and deposit `balance` into it.
pub async fn funded_account(engine: &LedgerEngine, balance: i64) -> Account {
    let owner = customer(engine, true).await;
    let account = engine
        .open_account(owner.id, &account_number())
        .await
        .expect("Failed to open account");

    if balance > 0 {
        let outcome = engine
            .apply(Transaction::deposit(account.id, amount(balance), TransactionChannel::Branch))
            .await
            .expect("Failed to fund account");
        assert!(outcome.is_completed(), "funding deposit failed: {:?}", outcome);
    }

    engine.get_account(account.id).await.expect("Account vanished")
}

pub async fn balance_of(engine: &LedgerEngine, account_id: Uuid) -> Decimal {
    engine
        .get_account(account_id)
        .await
        .expect("Account not found")
        .balance
        .value()
}

/// Outbox event types staged for one transaction, in staging order.
pub async fn staged_event_types(pool: &PgPool, transaction_id: Uuid) -> Vec<String> {
    sqlx::query_scalar(
        r#"
        SELECT event_type FROM outbox_messages
        WHERE event_data->>'transaction_id' = $1
           OR event_data->'transaction'->>'id' = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(transaction_id.to_string())
    .fetch_all(pool)
    .await
    .expect("Failed to read outbox")
}
