use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

use crate::billing::{apply_event, EventDisposition, EventLedger, EventOutcome};
use crate::config;
use crate::error::{AppError, AppResult};
use crate::stripe::signature;
use crate::stripe::types::{EventEnvelope, StripeEvent};
use crate::stripe::PaymentGateway;

/// key: webhooks-stripe -> verified entrypoint
///
/// The raw body is verified against `STRIPE_WEBHOOK_SECRET` before anything
/// is persisted; a bad signature changes no state. Verified deliveries are
/// recorded in the event ledger first, so a crash after this point is
/// recovered by the reconciliation sweep instead of relying on Stripe.
pub async fn stripe_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let header = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Signature("missing stripe-signature header".to_string()))?;
    signature::verify(
        &body,
        header,
        config::STRIPE_WEBHOOK_SECRET.as_str(),
        *config::STRIPE_WEBHOOK_TOLERANCE_SECS,
        Utc::now(),
    )?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("webhook payload is not json: {err}")))?;
    let envelope: EventEnvelope = serde_json::from_value(payload.clone())
        .map_err(|err| AppError::BadRequest(format!("webhook envelope malformed: {err}")))?;
    let event_id = envelope.id.clone();
    let event_type = envelope.event_type.clone();

    let ledger = EventLedger::new(pool.clone());
    match ledger.record(&event_id, &event_type, &payload).await? {
        EventDisposition::AlreadyProcessed => {
            info!(event = %event_id, event_type = %event_type, "duplicate stripe delivery skipped");
            return Ok(StatusCode::OK);
        }
        EventDisposition::Retry => {
            info!(event = %event_id, event_type = %event_type, "replaying failed stripe delivery");
        }
        EventDisposition::Fresh => {}
    }

    let event = match StripeEvent::from_envelope(envelope) {
        Ok(event) => event,
        Err(err) => {
            ledger.mark_failed(&event_id, &err.to_string()).await?;
            return Err(AppError::BadRequest(format!(
                "webhook object malformed: {err}"
            )));
        }
    };

    match apply_event(&pool, gateway.as_ref(), &event).await {
        Ok(EventOutcome::Applied(subscription)) => {
            ledger.mark_processed(&event_id).await?;
            info!(
                event = %event_id,
                event_type = %event_type,
                subscription = %subscription.stripe_subscription_id,
                "stripe event applied"
            );
            Ok(StatusCode::OK)
        }
        Ok(EventOutcome::Ignored) => {
            ledger.mark_processed(&event_id).await?;
            Ok(StatusCode::OK)
        }
        Err(err) => {
            // 5xx makes Stripe retry; the sweep replays from the ledger too
            ledger.mark_failed(&event_id, &err.to_string()).await?;
            Err(err)
        }
    }
}
