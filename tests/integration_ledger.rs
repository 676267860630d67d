//! Ledger engine tests against PostgreSQL

use futures_util::future::join_all;
use rust_decimal_macros::dec;
use sqlx::Executor;
use uuid::Uuid;

use bank_ledger::domain::events::{
    BALANCE_UPDATED, FRAUD_ALERT, TRANSACTION_CREATED, TRANSACTION_FAILED, TRANSACTION_PROCESSED,
};
use bank_ledger::domain::{
    FailureReason, OperationContext, Transaction, TransactionChannel, TransactionStatus,
};
use bank_ledger::ledger::{repository, FraudScreen, LedgerEngine, LedgerError, LedgerOutcome};

mod common;
use common::{amount, balance_of, funded_account, staged_event_types};

macro_rules! engine_or_skip {
    () => {
        match common::setup().await {
            Some(pool) => LedgerEngine::new(pool),
            None => return,
        }
    };
}

#[tokio::test]
async fn test_withdrawal_completes_and_stages_events() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(50), TransactionChannel::Atm);
    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(balance_of(&engine, account.id).await, dec!(50));

    let stored = engine.get_transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);

    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_PROCESSED, BALANCE_UPDATED]
    );

    let (old, new): (String, String) = sqlx::query_as(
        r#"
        SELECT event_data->>'old_balance', event_data->>'new_balance'
        FROM outbox_messages
        WHERE event_type = $1 AND event_data->>'transaction_id' = $2
        "#,
    )
    .bind(BALANCE_UPDATED)
    .bind(tx.id.to_string())
    .fetch_one(engine.pool())
    .await
    .unwrap();
    assert_eq!(old.parse::<rust_decimal::Decimal>().unwrap(), dec!(100));
    assert_eq!(new.parse::<rust_decimal::Decimal>().unwrap(), dec!(50));
}

#[tokio::test]
async fn test_insufficient_funds_leaves_balance() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(150), TransactionChannel::Atm);
    let outcome = engine.apply(tx.clone()).await.unwrap();

    match outcome {
        LedgerOutcome::Failed(failed, reason) => {
            assert_eq!(reason, FailureReason::InsufficientFunds);
            assert_eq!(failed.failure_reason.as_deref(), Some("insufficient funds"));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert_eq!(balance_of(&engine, account.id).await, dec!(100));
    assert_eq!(staged_event_types(engine.pool(), tx.id).await, vec![TRANSACTION_FAILED]);

    let stored = engine.get_transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_transfer_to_missing_destination() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::transfer(account.id, Uuid::new_v4(), amount(30), TransactionChannel::Web);
    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert_eq!(
        outcome,
        LedgerOutcome::Failed(
            tx.clone().failed(&FailureReason::DestinationAccountNotFound).unwrap(),
            FailureReason::DestinationAccountNotFound
        )
    );
    assert_eq!(balance_of(&engine, account.id).await, dec!(100));
}

#[tokio::test]
async fn test_missing_source_is_recorded_as_failed() {
    let engine = engine_or_skip!();

    let tx = Transaction::withdrawal(Uuid::new_v4(), amount(10), TransactionChannel::Mobile);
    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert!(matches!(outcome, LedgerOutcome::Failed(_, FailureReason::SourceAccountNotFound)));
    assert_eq!(
        engine.get_transaction(tx.id).await.unwrap().status,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_transfer_moves_funds_between_accounts() {
    let engine = engine_or_skip!();
    let from = funded_account(&engine, 100).await;
    let to = funded_account(&engine, 5).await;

    let tx = Transaction::transfer(from.id, to.id, amount(30), TransactionChannel::Web)
        .with_description("rent share");
    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(balance_of(&engine, from.id).await, dec!(70));
    assert_eq!(balance_of(&engine, to.id).await, dec!(35));
    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_PROCESSED, BALANCE_UPDATED, BALANCE_UPDATED]
    );
}

#[tokio::test]
async fn test_locked_account_rejects_withdrawal() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;
    engine.lock_account(account.id).await.unwrap();

    let tx = Transaction::withdrawal(account.id, amount(10), TransactionChannel::Branch);
    let outcome = engine.apply(tx).await.unwrap();
    assert!(matches!(outcome, LedgerOutcome::Failed(_, FailureReason::AccountLocked)));

    engine.unlock_account(account.id).await.unwrap();
    let tx = Transaction::withdrawal(account.id, amount(10), TransactionChannel::Branch);
    assert!(engine.apply(tx).await.unwrap().is_completed());
    assert_eq!(balance_of(&engine, account.id).await, dec!(90));
}

#[tokio::test]
async fn test_reapply_is_idempotent() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(40), TransactionChannel::Atm);
    let first = engine.apply(tx.clone()).await.unwrap();
    let second = engine.apply(tx.clone()).await.unwrap();

    assert!(first.is_completed());
    assert!(second.is_completed());
    assert_eq!(balance_of(&engine, account.id).await, dec!(60));
    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_PROCESSED, BALANCE_UPDATED]
    );
}

#[tokio::test]
async fn test_internal_failure_can_be_reapplied() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(25), TransactionChannel::Web);
    let reason = FailureReason::Internal("connection reset".to_string());
    let failed = tx.clone().failed(&reason).unwrap();

    let mut db = engine.pool().begin().await.unwrap();
    assert!(repository::record_transaction(&mut db, &failed).await.unwrap());
    db.commit().await.unwrap();

    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(balance_of(&engine, account.id).await, dec!(75));
}

#[tokio::test]
async fn test_concurrent_applies_of_one_id_move_money_once() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(30), TransactionChannel::Atm);
    let tasks = (0..4).map(|_| {
        let engine = engine.clone();
        let tx = tx.clone();
        tokio::spawn(async move { engine.apply(tx).await.unwrap() })
    });

    for outcome in join_all(tasks).await {
        assert!(outcome.unwrap().is_completed());
    }

    assert_eq!(balance_of(&engine, account.id).await, dec!(70));
    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_PROCESSED, BALANCE_UPDATED]
    );
}

#[tokio::test]
async fn test_pending_record_is_applied_as_recorded() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let recorded = Transaction::withdrawal(account.id, amount(30), TransactionChannel::Web);
    let mut db = engine.pool().begin().await.unwrap();
    assert!(repository::insert_pending(&mut db, &recorded).await.unwrap());
    db.commit().await.unwrap();

    // Same id, different amount
    let mut altered = recorded.clone();
    altered.amount = amount(50);
    let outcome = engine.apply(altered).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.transaction().amount.value(), dec!(30));
    assert_eq!(balance_of(&engine, account.id).await, dec!(70));

    let stored = engine.get_transaction(recorded.id).await.unwrap();
    assert_eq!(stored.amount.value(), dec!(30));
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_aborted_unit_is_recorded_as_failed() {
    let Some(pool) = common::setup_isolated().await else {
        return;
    };
    let engine = LedgerEngine::new(pool);
    let account = funded_account(&engine, 100).await;

    // Every balance event from here on makes the unit abort
    let sabotage = format!(
        r#"
        CREATE FUNCTION reject_balance_events() RETURNS trigger AS $$
        BEGIN
            IF NEW.event_type = '{}' THEN
                RAISE EXCEPTION 'outbox write rejected';
            END IF;
            RETURN NEW;
        END
        $$ LANGUAGE plpgsql;

        CREATE TRIGGER reject_balance_events
            BEFORE INSERT ON outbox_messages
            FOR EACH ROW EXECUTE FUNCTION reject_balance_events();
        "#,
        BALANCE_UPDATED
    );
    engine.pool().execute(sabotage.as_str()).await.unwrap();

    let tx = Transaction::withdrawal(account.id, amount(40), TransactionChannel::Atm);
    let outcome = engine.apply(tx.clone()).await.unwrap();

    assert!(matches!(outcome, LedgerOutcome::Failed(_, FailureReason::Internal(_))));
    assert_eq!(balance_of(&engine, account.id).await, dec!(100));

    let stored = engine.get_transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    let reason = stored.failure_reason.unwrap();
    assert!(reason.starts_with("internal error:"), "unexpected reason {}", reason);
    assert!(reason.contains("outbox write rejected"), "unexpected reason {}", reason);

    assert_eq!(staged_event_types(engine.pool(), tx.id).await, vec![TRANSACTION_FAILED]);
}

#[tokio::test]
async fn test_apply_rejects_non_pending_input() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(10), TransactionChannel::Web)
        .completed()
        .unwrap();
    let err = engine.apply(tx).await.unwrap_err();

    assert!(matches!(err, LedgerError::Domain(_)));
    assert_eq!(balance_of(&engine, account.id).await, dec!(100));
}

#[tokio::test]
async fn test_concurrent_withdrawals_never_overdraw() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tasks = (0..10).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let tx = Transaction::withdrawal(account.id, amount(20), TransactionChannel::Atm);
            engine.apply(tx).await.unwrap()
        })
    });

    let outcomes: Vec<LedgerOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    let insufficient = outcomes
        .iter()
        .filter(|o| matches!(o, LedgerOutcome::Failed(_, FailureReason::InsufficientFunds)))
        .count();

    assert_eq!(completed, 5);
    assert_eq!(insufficient, 5);
    assert_eq!(balance_of(&engine, account.id).await, dec!(0));
}

#[tokio::test]
async fn test_opposing_transfers_do_not_deadlock() {
    let engine = engine_or_skip!();
    let a = funded_account(&engine, 500).await;
    let b = funded_account(&engine, 500).await;

    let tasks = (0..20).map(|i| {
        let engine = engine.clone();
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        tokio::spawn(async move {
            let tx = Transaction::transfer(from, to, amount(10), TransactionChannel::Mobile);
            engine.apply(tx).await.unwrap()
        })
    });

    for outcome in join_all(tasks).await {
        assert!(outcome.unwrap().is_completed());
    }

    let total = balance_of(&engine, a.id).await + balance_of(&engine, b.id).await;
    assert_eq!(total, dec!(1000));
    assert_eq!(balance_of(&engine, a.id).await, dec!(500));
}

#[tokio::test]
async fn test_submit_applies_ordinary_transaction() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(30), TransactionChannel::Web)
        .with_origin(OperationContext::new().with_correlation_id(Uuid::new_v4()));
    let outcome = engine.submit(tx.clone()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(balance_of(&engine, account.id).await, dec!(70));
    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_CREATED, TRANSACTION_PROCESSED, BALANCE_UPDATED]
    );

    let stored = engine.get_transaction(tx.id).await.unwrap();
    assert_eq!(stored.origin, tx.origin);
}

#[tokio::test]
async fn test_submit_flags_large_transaction() {
    let Some(pool) = common::setup().await else {
        return;
    };
    let engine = LedgerEngine::new(pool).with_fraud_screen(FraudScreen::new(dec!(500)));
    let account = funded_account(&engine, 1000).await;

    let tx = Transaction::withdrawal(account.id, amount(600), TransactionChannel::Web);
    let outcome = engine.submit(tx.clone()).await.unwrap();

    assert!(matches!(outcome, LedgerOutcome::Flagged(_)));
    assert_eq!(balance_of(&engine, account.id).await, dec!(1000));
    assert_eq!(
        engine.get_transaction(tx.id).await.unwrap().status,
        TransactionStatus::Flagged
    );
    assert_eq!(
        staged_event_types(engine.pool(), tx.id).await,
        vec![TRANSACTION_CREATED, FRAUD_ALERT]
    );

    let notifications: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_messages WHERE event_type = 'NotificationEvent' AND event_data->>'customer_id' = $1",
    )
    .bind(account.customer_id.to_string())
    .fetch_one(engine.pool())
    .await
    .unwrap();
    assert_eq!(notifications, 1);

    // Resubmitting reports the recorded outcome
    let again = engine.submit(tx).await.unwrap();
    assert!(matches!(again, LedgerOutcome::Flagged(_)));
    assert_eq!(balance_of(&engine, account.id).await, dec!(1000));
}

#[tokio::test]
async fn test_flag_twice_is_rejected() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let tx = Transaction::withdrawal(account.id, amount(10), TransactionChannel::Web);
    engine.apply(tx.clone()).await.unwrap();

    let flagged = engine.flag(tx.id, "manual review", 90).await.unwrap();
    assert_eq!(flagged.status, TransactionStatus::Flagged);

    let err = engine.flag(tx.id, "manual review", 90).await.unwrap_err();
    assert!(matches!(err, LedgerError::Domain(_)));

    let missing = engine.flag(Uuid::new_v4(), "manual review", 90).await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_account_transactions_newest_first() {
    let engine = engine_or_skip!();
    let account = funded_account(&engine, 100).await;

    let first = Transaction::withdrawal(account.id, amount(1), TransactionChannel::Web);
    engine.apply(first.clone()).await.unwrap();
    let second = Transaction::withdrawal(account.id, amount(2), TransactionChannel::Web);
    engine.apply(second.clone()).await.unwrap();

    let from = chrono::Utc::now() - chrono::Duration::hours(1);
    let to = chrono::Utc::now() + chrono::Duration::hours(1);
    let history = engine.account_transactions(account.id, from, to).await.unwrap();

    // funding deposit + two withdrawals
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[1].id, first.id);
}

#[tokio::test]
async fn test_duplicate_account_number_conflicts() {
    let engine = engine_or_skip!();
    let owner = common::customer(&engine, false).await;
    let number = common::account_number();

    engine.open_account(owner.id, &number).await.unwrap();
    let err = engine.open_account(owner.id, &number).await.unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateAccountNumber(_)));

    let err = engine.open_account(Uuid::new_v4(), &common::account_number()).await.unwrap_err();
    assert!(matches!(err, LedgerError::CustomerNotFound(_)));
}
