//! Ledger Engine
//!
//! Applies a transaction against one or two accounts inside a single
//! database transaction. Balance changes, the transaction record and the
//! outbox events describing them commit together or not at all.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Account, Customer, DomainError, Event, FailureReason, NotificationType, Transaction,
    TransactionStatus,
};
use crate::outbox;

use super::fraud::{FraudScreen, HIGH_RISK_REASON};
use super::posting::{self, Posting};
use super::{repository, LedgerError};

/// Attempts for the compensating write after an aborted unit
const COMPENSATION_ATTEMPTS: u32 = 3;

/// Result of a ledger operation. Failed carries the reason it was recorded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Completed(Transaction),
    Failed(Transaction, FailureReason),
    Flagged(Transaction),
}

impl LedgerOutcome {
    fn recorded(tx: Transaction) -> Self {
        match tx.status {
            TransactionStatus::Completed => Self::Completed(tx),
            TransactionStatus::Flagged => Self::Flagged(tx),
            _ => {
                let reason = tx
                    .failure()
                    .unwrap_or_else(|| FailureReason::Internal("unrecorded reason".to_string()));
                Self::Failed(tx, reason)
            }
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Completed(tx) | Self::Failed(tx, _) | Self::Flagged(tx) => tx,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// The ledger engine
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    pool: PgPool,
    fraud: FraudScreen,
}

impl LedgerEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            fraud: FraudScreen::default(),
        }
    }

    pub fn with_fraud_screen(mut self, fraud: FraudScreen) -> Self {
        self.fraud = fraud;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Apply a Pending transaction.
    ///
    /// Infrastructure failures do not surface as errors: the unit is rolled
    /// back and the transaction is recorded as Failed with an internal
    /// reason. Only a non-Pending input is an error.
    ///
    /// A known id returns its recorded outcome. A recorded Pending row, or
    /// one that failed internally, is applied with its recorded accounts
    /// and amount.
    pub async fn apply(&self, tx: Transaction) -> Result<LedgerOutcome, LedgerError> {
        if tx.status != TransactionStatus::Pending {
            return Err(DomainError::InvalidStatusTransition {
                from: tx.status,
                to: TransactionStatus::Completed,
            }
            .into());
        }

        match self.try_apply(tx.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    error = %e,
                    "Ledger unit aborted"
                );
                let reason = FailureReason::Internal(e.to_string());
                let failed = tx.failed(&reason)?;
                self.compensate(&failed, &reason).await;
                Ok(LedgerOutcome::Failed(failed, reason))
            }
        }
    }

    /// One attempt inside one unit of work.
    async fn try_apply(&self, request: Transaction) -> Result<LedgerOutcome, LedgerError> {
        let mut db = self.pool.begin().await?;

        // The record exists and is locked before any account lock, so
        // concurrent applies of one id run one after another
        repository::insert_pending(&mut db, &request).await?;
        let stored = repository::lock_transaction(&mut db, request.id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(request.id))?;

        let retryable = stored.failure().map_or(false, |r| r.is_internal());
        if stored.status.is_terminal() && !retryable {
            tracing::info!(
                transaction_id = %stored.id,
                status = %stored.status,
                "Transaction already applied"
            );
            return Ok(LedgerOutcome::recorded(stored));
        }

        if !stored.same_movement(&request) {
            tracing::warn!(
                transaction_id = %stored.id,
                recorded_amount = %stored.amount,
                requested_amount = %request.amount,
                "Re-applied with a different movement, applying the recorded one"
            );
        }
        let tx = stored.reopened()?;

        // Ascending id order on every path keeps concurrent units deadlock-free
        let mut locked: Vec<Account> = Vec::with_capacity(2);
        for account_id in tx.touched_accounts() {
            if let Some(account) = repository::lock_account(&mut db, account_id).await? {
                locked.push(account);
            }
        }
        let find = |id: Uuid| locked.iter().find(|a| a.id == id);
        let source = find(tx.account_id);
        let destination = tx.destination_account_id.and_then(find);

        match posting::plan(&tx, source, destination)? {
            Posting::Rejected(reason) => {
                let failed = tx.failed(&reason)?;
                if !repository::record_transaction(&mut db, &failed).await? {
                    return Err(LedgerError::RecordConflict(failed.id));
                }
                outbox::stage(&mut db, &Event::transaction_failed(failed.clone(), reason.to_string())).await?;
                db.commit().await?;

                tracing::info!(
                    transaction_id = %failed.id,
                    reason = %reason,
                    "Transaction failed"
                );
                Ok(LedgerOutcome::Failed(failed, reason))
            }
            Posting::Completed(changes) => {
                let completed = tx.completed()?;
                if !repository::record_transaction(&mut db, &completed).await? {
                    return Err(LedgerError::RecordConflict(completed.id));
                }

                let now = Utc::now();
                for change in &changes {
                    repository::update_balance(&mut db, change.account_id, change.new, now).await?;
                }
                for event in posting::completion_events(&completed, &changes) {
                    outbox::stage(&mut db, &event).await?;
                }
                db.commit().await?;

                tracing::info!(
                    transaction_id = %completed.id,
                    transaction_type = %completed.transaction_type,
                    amount = %completed.amount,
                    "Transaction completed"
                );
                Ok(LedgerOutcome::Completed(completed))
            }
        }
    }

    /// Record an aborted transaction as Failed in its own unit, with retry.
    async fn compensate(&self, failed: &Transaction, reason: &FailureReason) {
        for attempt in 0..COMPENSATION_ATTEMPTS {
            match self.try_record_failure(failed, reason).await {
                Ok(true) => {
                    tracing::info!(transaction_id = %failed.id, "Failed transaction recorded");
                    return;
                }
                Ok(false) => {
                    tracing::warn!(
                        transaction_id = %failed.id,
                        "Transaction already recorded in another state, compensation skipped"
                    );
                    return;
                }
                Err(e) if attempt < COMPENSATION_ATTEMPTS - 1 => {
                    tracing::warn!(
                        transaction_id = %failed.id,
                        error = %e,
                        "Compensating write failed, retrying (attempt {}/{})",
                        attempt + 1,
                        COMPENSATION_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    tracing::error!(
                        transaction_id = %failed.id,
                        error = %e,
                        "Compensating write failed, giving up"
                    );
                }
            }
        }
    }

    async fn try_record_failure(
        &self,
        failed: &Transaction,
        reason: &FailureReason,
    ) -> Result<bool, LedgerError> {
        let mut db = self.pool.begin().await?;

        if !repository::record_transaction(&mut db, failed).await? {
            return Ok(false);
        }
        outbox::stage(&mut db, &Event::transaction_failed(failed.clone(), reason.to_string())).await?;
        db.commit().await?;

        Ok(true)
    }

    // =========================================================================
    // Submission and fraud flagging
    // =========================================================================

    /// Record a new transaction, screen it for fraud, then apply it.
    ///
    /// The Pending record and its `TransactionCreated` event commit first.
    /// A suspicious transaction is flagged and never touches balances.
    pub async fn submit(&self, tx: Transaction) -> Result<LedgerOutcome, LedgerError> {
        let mut db = self.pool.begin().await?;
        if !repository::insert_pending(&mut db, &tx).await? {
            // Resubmission of a known id: apply reports the recorded outcome
            drop(db);
            return self.apply(tx).await;
        }
        outbox::stage(&mut db, &Event::transaction_created(tx.clone())).await?;
        db.commit().await?;

        tracing::info!(transaction_id = %tx.id, "Transaction submitted");

        let assessment = self.fraud.assess(&tx);
        if assessment.is_suspicious() {
            tracing::warn!(
                transaction_id = %tx.id,
                risk_score = assessment.risk_score,
                "Potential fraud detected"
            );
            let flagged = self.flag(tx.id, HIGH_RISK_REASON, assessment.risk_score).await?;
            return Ok(LedgerOutcome::Flagged(flagged));
        }

        self.apply(tx).await
    }

    /// Move a recorded transaction to Flagged and stage a `FraudAlert`,
    /// plus a `Notification` for the source account's customer.
    pub async fn flag(
        &self,
        transaction_id: Uuid,
        reason: &str,
        risk_score: u8,
    ) -> Result<Transaction, LedgerError> {
        let mut db = self.pool.begin().await?;

        let tx = repository::lock_transaction(&mut db, transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        let flagged = tx.flagged()?;

        repository::set_status(&mut db, flagged.id, flagged.status).await?;
        outbox::stage(&mut db, &Event::fraud_alert(flagged.clone(), reason, risk_score)).await?;

        if let Some(customer_id) = repository::account_customer(&mut *db, flagged.account_id).await? {
            let message = format!(
                "Transaction {} of {} was flagged for review",
                flagged.id, flagged.amount
            );
            outbox::stage(
                &mut db,
                &Event::notification(customer_id, message, NotificationType::FraudAlert),
            )
            .await?;
        }

        db.commit().await?;

        tracing::warn!(
            transaction_id = %flagged.id,
            risk_score = risk_score,
            reason = %reason,
            "Transaction flagged"
        );

        Ok(flagged)
    }

    // =========================================================================
    // Reads and administration
    // =========================================================================

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        repository::find_account(&self.pool, account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    pub async fn register_customer(&self, customer: Customer) -> Result<Customer, LedgerError> {
        repository::insert_customer(&self.pool, &customer).await?;
        tracing::info!(customer_id = %customer.id, "Customer registered");
        Ok(customer)
    }

    /// Open a zero-balance account. Account numbers are unique.
    pub async fn open_account(
        &self,
        customer_id: Uuid,
        account_number: &str,
    ) -> Result<Account, LedgerError> {
        let account = Account::open(customer_id, account_number);
        repository::insert_account(&self.pool, &account).await?;

        tracing::info!(
            account_id = %account.id,
            customer_id = %customer_id,
            "Account opened"
        );

        Ok(account)
    }

    pub async fn lock_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.set_locked(account_id, true).await
    }

    pub async fn unlock_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        self.set_locked(account_id, false).await
    }

    async fn set_locked(&self, account_id: Uuid, locked: bool) -> Result<Account, LedgerError> {
        if !repository::set_locked(&self.pool, account_id, locked).await? {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        tracing::info!(account_id = %account_id, locked, "Account lock changed");
        self.get_account(account_id).await
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, LedgerError> {
        repository::find_transaction(&self.pool, transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    /// Transactions sourced from an account within `[from, to]`, newest first.
    pub async fn account_transactions(
        &self,
        account_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        repository::account_transactions(&self.pool, account_id, from, to).await
    }
}
