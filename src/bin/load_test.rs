//! Load Testing Tool
//!
//! Fires concurrent random transfers between a set of fresh accounts, then
//! checks that money was neither created nor destroyed.
//!
//! Run with: cargo run --bin load_test --release -- --accounts 20 --transfers 2000 --concurrency 16

use std::time::Instant;

use futures_util::future::join_all;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use bank_ledger::domain::{Amount, Customer, Transaction, TransactionChannel};
use bank_ledger::ledger::{LedgerEngine, LedgerOutcome};

const OPENING_BALANCE: i64 = 1_000;

fn arg(args: &[String], name: &str, default: usize) -> usize {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Default)]
struct Tally {
    completed: u64,
    failed: u64,
    flagged: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let account_count = arg(&args, "--accounts", 20).max(2);
    let transfer_count = arg(&args, "--transfers", 2000);
    let concurrency = arg(&args, "--concurrency", 16).max(1);

    let database_url = std::env::var("DATABASE_URL")?;

    println!(
        "Load Test - {} transfers across {} accounts, {} workers",
        transfer_count, account_count, concurrency
    );
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(concurrency as u32 + 2)
        .connect(&database_url)
        .await?;
    let engine = LedgerEngine::new(pool);

    // Fund accounts
    let customer = engine
        .register_customer(Customer::new("Load Test", "load@example.test", false))
        .await?;

    let mut accounts = Vec::with_capacity(account_count);
    for _ in 0..account_count {
        let account = engine
            .open_account(customer.id, &format!("LOAD-{}", Uuid::new_v4().simple()))
            .await?;
        let deposit = Transaction::deposit(
            account.id,
            Amount::from_integer(OPENING_BALANCE)?,
            TransactionChannel::Branch,
        );
        if !engine.apply(deposit).await?.is_completed() {
            anyhow::bail!("Opening deposit for {} failed", account.id);
        }
        accounts.push(account.id);
    }

    let expected_total = Decimal::from(OPENING_BALANCE) * Decimal::from(account_count as u64);

    let start = Instant::now();

    let per_worker = transfer_count / concurrency;
    let remainder = transfer_count % concurrency;

    let workers = (0..concurrency).map(|worker| {
        let engine = engine.clone();
        let accounts = accounts.clone();
        let count = per_worker + usize::from(worker < remainder);

        tokio::spawn(async move {
            let mut tally = Tally::default();
            for _ in 0..count {
                let (from, to, cents) = {
                    let mut rng = rand::thread_rng();
                    let from = rng.gen_range(0..accounts.len());
                    let mut to = rng.gen_range(0..accounts.len() - 1);
                    if to >= from {
                        to += 1;
                    }
                    (accounts[from], accounts[to], rng.gen_range(1..=50_000i64))
                };

                let amount = Amount::new(Decimal::new(cents, 2))?;
                let tx = Transaction::transfer(from, to, amount, TransactionChannel::Web);

                match engine.apply(tx).await? {
                    LedgerOutcome::Completed(_) => tally.completed += 1,
                    LedgerOutcome::Failed(..) => tally.failed += 1,
                    LedgerOutcome::Flagged(_) => tally.flagged += 1,
                }
            }
            Ok::<_, anyhow::Error>(tally)
        })
    });

    let mut total = Tally::default();
    for result in join_all(workers).await {
        let tally = result??;
        total.completed += tally.completed;
        total.failed += tally.failed;
        total.flagged += tally.flagged;
    }

    let elapsed = start.elapsed();
    let rate = transfer_count as f64 / elapsed.as_secs_f64();

    // Invariants
    let mut sum = Decimal::ZERO;
    let mut negative = 0;
    for account_id in &accounts {
        let balance = engine.get_account(*account_id).await?.balance.value();
        if balance < Decimal::ZERO {
            negative += 1;
        }
        sum += balance;
    }

    println!("\n=== Load Test Results ===");
    println!("Transfers: {}", transfer_count);
    println!("Completed: {}", total.completed);
    println!("Failed: {}", total.failed);
    println!("Flagged: {}", total.flagged);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Rate: {:.0} transfers/sec", rate);
    println!("Balance sum: {} (expected {})", sum, expected_total);

    if sum != expected_total || negative > 0 {
        anyhow::bail!(
            "Ledger invariant violated: sum {} != {} or {} negative balances",
            sum,
            expected_total,
            negative
        );
    }

    println!("Invariants hold");

    Ok(())
}
