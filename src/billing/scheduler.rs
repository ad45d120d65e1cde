use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{error, info, warn};

use crate::config;
use crate::stripe::client::PaymentGateway;
use crate::stripe::types::{EventEnvelope, StripeEvent};

use super::events::{apply_event, EventLedger, EventOutcome};

/// key: billing-reconciliation -> replay stalled webhook deliveries
///
/// Deliveries that failed (missing user, Stripe outage mid-handler) sit in
/// the event ledger unprocessed. The sweep replays them until they apply or
/// hit the attempt cap, so a dropped Stripe retry cannot strand local state.
pub fn spawn(pool: PgPool, gateway: Arc<dyn PaymentGateway>) {
    let interval = TokioDuration::from_secs(*config::RECONCILE_SCAN_INTERVAL_SECS);
    let max_attempts = *config::RECONCILE_MAX_ATTEMPTS;

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = process_tick(&pool, gateway.as_ref(), max_attempts).await {
                warn!(?err, "billing reconciliation tick failed");
            }
        }
    });
}

/// key: billing-reconciliation -> tick handler
pub async fn process_tick(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    max_attempts: i32,
) -> Result<()> {
    let ledger = EventLedger::new(pool.clone());
    let pending = ledger.unprocessed(max_attempts, 50).await?;

    for stored in pending {
        let envelope: EventEnvelope = match serde_json::from_value(stored.payload.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(event = %stored.id, ?err, "stored event payload does not parse");
                ledger.mark_failed(&stored.id, &err.to_string()).await?;
                continue;
            }
        };
        let event = match StripeEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(err) => {
                warn!(event = %stored.id, ?err, "stored event object does not parse");
                ledger.mark_failed(&stored.id, &err.to_string()).await?;
                continue;
            }
        };

        match apply_event(pool, gateway, &event).await {
            Ok(EventOutcome::Applied(subscription)) => {
                info!(
                    event = %stored.id,
                    event_type = %stored.event_type,
                    subscription = %subscription.stripe_subscription_id,
                    "reconciled stalled stripe event"
                );
                ledger.mark_processed(&stored.id).await?;
            }
            Ok(EventOutcome::Ignored) => {
                ledger.mark_processed(&stored.id).await?;
            }
            Err(err) => {
                warn!(
                    event = %stored.id,
                    event_type = %stored.event_type,
                    ?err,
                    "stripe event still failing"
                );
                ledger.mark_failed(&stored.id, &err.to_string()).await?;
            }
        }
    }

    let exhausted = ledger.exhausted_count(max_attempts).await?;
    if exhausted > 0 {
        error!(
            count = exhausted,
            "stripe events exhausted their retry budget; manual review required"
        );
    }

    Ok(())
}
