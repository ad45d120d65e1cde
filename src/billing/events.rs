use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::models::{Subscription, SubscriptionState};
use super::service::BillingService;
use crate::error::{AppError, AppResult};
use crate::stripe::client::PaymentGateway;
use crate::stripe::types::{CheckoutSessionObject, StripeEvent};

/// key: billing-events -> insert-once ledger for webhook deliveries
///
/// The ledger is keyed on Stripe's event id. First delivery inserts the row,
/// a re-delivery of a processed event is a no-op, and a re-delivery of a
/// failed event runs the handler again. Rows that keep failing stay visible
/// with their attempt count and last error.
#[derive(Debug, Clone, FromRow)]
pub struct StoredEvent {
    pub id: String,
    pub event_type: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// First delivery of this event id.
    Fresh,
    /// Seen before but never successfully applied.
    Retry,
    /// Already applied; the delivery must not be re-applied.
    AlreadyProcessed,
}

#[derive(Clone)]
pub struct EventLedger {
    pool: PgPool,
}

impl EventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        id: &str,
        event_type: &str,
        payload: &Value,
    ) -> AppResult<EventDisposition> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO stripe_events (id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(payload.clone())
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(EventDisposition::Fresh);
        }

        let processed: Option<bool> =
            sqlx::query_scalar("SELECT processed_at IS NOT NULL FROM stripe_events WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match processed {
            Some(true) => Ok(EventDisposition::AlreadyProcessed),
            _ => Ok(EventDisposition::Retry),
        }
    }

    pub async fn mark_processed(&self, id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_events
            SET processed_at = NOW(), attempts = attempts + 1, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE stripe_events SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unprocessed(&self, max_attempts: i32, limit: i64) -> AppResult<Vec<StoredEvent>> {
        let events = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT * FROM stripe_events
            WHERE processed_at IS NULL AND attempts < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Unprocessed events that hit the attempt cap and need an operator.
    pub async fn exhausted_count(&self, max_attempts: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stripe_events WHERE processed_at IS NULL AND attempts >= $1",
        )
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[derive(Debug)]
pub enum EventOutcome {
    Applied(Subscription),
    Ignored,
}

/// key: billing-events -> apply one verified event to local state
///
/// Shared by the webhook receiver and the reconciliation sweep so retries go
/// through exactly the code path the original delivery took.
pub async fn apply_event(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    event: &StripeEvent,
) -> AppResult<EventOutcome> {
    let service = BillingService::new(pool.clone());
    match event {
        StripeEvent::SubscriptionCreated(subscription) => {
            let user_id = resolve_user(&service, gateway, &subscription.customer).await?;
            let state = SubscriptionState::from_remote(subscription)?;
            let record = service.apply_state(user_id, &state).await?;
            Ok(EventOutcome::Applied(record))
        }
        StripeEvent::SubscriptionUpdated(subscription) => {
            let state = SubscriptionState::from_remote(subscription)?;
            Ok(EventOutcome::Applied(service.sync_existing(&state).await?))
        }
        StripeEvent::SubscriptionDeleted(subscription) => {
            let mut state = SubscriptionState::from_remote(subscription)?;
            // deletion is a soft status change, even when the object lags
            state.status = "canceled".to_string();
            if state.canceled_at.is_none() {
                state.canceled_at = Some(Utc::now());
            }
            Ok(EventOutcome::Applied(service.sync_existing(&state).await?))
        }
        StripeEvent::InvoicePaymentSucceeded(invoice) => match invoice.subscription.as_deref() {
            Some(subscription_id) => Ok(EventOutcome::Applied(
                service.set_status(subscription_id, "active").await?,
            )),
            None => {
                info!(invoice = %invoice.id, "invoice without subscription ignored");
                Ok(EventOutcome::Ignored)
            }
        },
        StripeEvent::InvoicePaymentFailed(invoice) => match invoice.subscription.as_deref() {
            Some(subscription_id) => Ok(EventOutcome::Applied(
                service.set_status(subscription_id, "past_due").await?,
            )),
            None => {
                info!(invoice = %invoice.id, "invoice without subscription ignored");
                Ok(EventOutcome::Ignored)
            }
        },
        StripeEvent::CheckoutCompleted(session) => {
            let Some(subscription_id) = session.subscription.as_deref() else {
                info!(session = %session.id, "non-subscription checkout ignored");
                return Ok(EventOutcome::Ignored);
            };
            let user_id = resolve_checkout_user(&service, gateway, session).await?;
            // the session carries ids only; the full subscription comes from Stripe
            let remote = gateway.retrieve_subscription(subscription_id).await?;
            let state = SubscriptionState::from_remote(&remote)?;
            let record = service.apply_state(user_id, &state).await?;
            Ok(EventOutcome::Applied(record))
        }
        StripeEvent::Unhandled { event_type } => {
            info!(%event_type, "unrecognized stripe event type ignored");
            Ok(EventOutcome::Ignored)
        }
    }
}

/// Resolves the local user a Stripe customer belongs to: the recorded
/// profile mapping first, then an exact email match against `users`.
async fn resolve_user(
    service: &BillingService,
    gateway: &dyn PaymentGateway,
    customer_id: &str,
) -> AppResult<i32> {
    if let Some(user_id) = service.user_for_customer(customer_id).await? {
        return Ok(user_id);
    }
    let customer = gateway.retrieve_customer(customer_id).await?;
    let email = customer.email.ok_or_else(|| {
        AppError::MissingLocal(format!("stripe customer {customer_id} has no email"))
    })?;
    let user_id = service
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| {
            AppError::MissingLocal(format!("user for stripe customer {customer_id}"))
        })?;
    service.attach_customer(user_id, customer_id).await?;
    Ok(user_id)
}

async fn resolve_checkout_user(
    service: &BillingService,
    gateway: &dyn PaymentGateway,
    session: &CheckoutSessionObject,
) -> AppResult<i32> {
    if let Some(user_id) = session
        .metadata
        .get("user_id")
        .and_then(|raw| raw.parse::<i32>().ok())
    {
        if let Some(customer_id) = session.customer.as_deref() {
            service.attach_customer(user_id, customer_id).await?;
        }
        return Ok(user_id);
    }

    if let Some(email) = session.email() {
        if let Some(user_id) = service.find_user_by_email(email).await? {
            if let Some(customer_id) = session.customer.as_deref() {
                service.attach_customer(user_id, customer_id).await?;
            }
            return Ok(user_id);
        }
    }

    match session.customer.as_deref() {
        Some(customer_id) => resolve_user(service, gateway, customer_id).await,
        None => Err(AppError::MissingLocal(format!(
            "user for checkout session {}",
            session.id
        ))),
    }
}
