//! Consumer-side event handlers

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{events, Event};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Reacts to events delivered by the consumer.
///
/// Returning an error leaves the delivery on the queue for redelivery, so
/// handlers must tolerate seeing the same event id twice.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Tags this handler subscribes to
    fn event_types(&self) -> &'static [&'static str];

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Whether a customer wants notifications
#[async_trait]
pub trait NotificationPreferences: Send + Sync {
    /// `false` for unknown customers
    async fn opted_in(&self, customer_id: Uuid) -> Result<bool, HandlerError>;
}

#[async_trait]
impl NotificationPreferences for PgPool {
    async fn opted_in(&self, customer_id: Uuid) -> Result<bool, HandlerError> {
        let opted: Option<bool> = sqlx::query_scalar(
            "SELECT opted_for_notifications FROM customers WHERE id = $1",
        )
        .bind(customer_id)
        .fetch_optional(self)
        .await?;

        Ok(opted.unwrap_or(false))
    }
}

/// Delivers notification events to opted-in customers.
///
/// Delivery is a log line; a real channel (email, SMS, push) plugs in here.
pub struct NotificationHandler<N> {
    preferences: N,
}

impl<N: NotificationPreferences> NotificationHandler<N> {
    pub fn new(preferences: N) -> Self {
        Self { preferences }
    }
}

#[async_trait]
impl<N: NotificationPreferences> EventHandler for NotificationHandler<N> {
    fn event_types(&self) -> &'static [&'static str] {
        &[events::NOTIFICATION]
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Event::Notification(notification) = event else {
            return Ok(());
        };

        if !self.preferences.opted_in(notification.customer_id).await? {
            tracing::info!(
                customer_id = %notification.customer_id,
                "Notification not sent: customer not found or opted out"
            );
            return Ok(());
        }

        tracing::info!(
            event_id = %notification.id,
            customer_id = %notification.customer_id,
            notification_type = ?notification.notification_type,
            message = %notification.message,
            "Sending notification"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationType;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        opted: HashSet<Uuid>,
        asked: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl NotificationPreferences for Recorded {
        async fn opted_in(&self, customer_id: Uuid) -> Result<bool, HandlerError> {
            self.asked.lock().unwrap().push(customer_id);
            Ok(self.opted.contains(&customer_id))
        }
    }

    #[tokio::test]
    async fn test_notification_checks_preferences() {
        let customer = Uuid::new_v4();
        let mut prefs = Recorded::default();
        prefs.opted.insert(customer);
        let handler = NotificationHandler::new(prefs);

        let event = Event::notification(customer, "done", NotificationType::TransactionCompleted);
        handler.handle(&event).await.unwrap();

        let stranger = Event::notification(Uuid::new_v4(), "done", NotificationType::LowBalance);
        handler.handle(&stranger).await.unwrap();

        assert_eq!(handler.preferences.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ignores_other_events() {
        let handler = NotificationHandler::new(Recorded::default());
        let event = Event::balance_updated(
            Uuid::new_v4(),
            crate::domain::Balance::zero(),
            crate::domain::Balance::zero(),
            Uuid::new_v4(),
        );
        handler.handle(&event).await.unwrap();
        assert!(handler.preferences.asked.lock().unwrap().is_empty());
        assert_eq!(handler.event_types(), &[events::NOTIFICATION]);
    }

    struct Unreachable;

    #[async_trait]
    impl NotificationPreferences for Unreachable {
        async fn opted_in(&self, _customer_id: Uuid) -> Result<bool, HandlerError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
    }

    #[tokio::test]
    async fn test_preference_lookup_failure_propagates() {
        let handler = NotificationHandler::new(Unreachable);
        let event = Event::notification(Uuid::new_v4(), "done", NotificationType::LowBalance);

        let err = handler.handle(&event).await.unwrap_err();
        assert!(matches!(err, HandlerError::Database(sqlx::Error::PoolTimedOut)));
    }
}
