use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::stripe::types::{epoch_to_utc, SubscriptionObject};

/// key: billing-models -> subscriptions,profiles
///
/// One row per Stripe subscription. `status` mirrors Stripe's enumeration
/// (`trialing|active|past_due|canceled|incomplete|incomplete_expired|unpaid|paused`)
/// and cancellation is a soft status change, never a row delete.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: i32,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_premium(&self) -> bool {
        premium_status(&self.status)
    }
}

/// Statuses that grant premium access. Kept in one place so every write path
/// derives `profiles.is_premium` from the same rule.
pub fn premium_status(status: &str) -> bool {
    matches!(status, "active" | "trialing")
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i32,
    pub is_premium: bool,
    pub stripe_customer_id: Option<String>,
    pub subscription: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// key: billing-sync-state -> normalized provider snapshot
///
/// What a Stripe subscription object boils down to before it is written
/// locally. Both the webhook path and the client API funnel through this.
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl SubscriptionState {
    /// Normalizes a Stripe subscription object. The required period start
    /// must convert; optional timestamps that cannot be represented are
    /// treated as absent.
    pub fn from_remote(subscription: &SubscriptionObject) -> AppResult<Self> {
        let current_period_start = epoch_to_utc(subscription.current_period_start)
            .ok_or_else(|| {
                AppError::Message(format!(
                    "subscription {} has an out-of-range period start",
                    subscription.id
                ))
            })?;
        Ok(Self {
            stripe_subscription_id: subscription.id.clone(),
            stripe_customer_id: subscription.customer.clone(),
            status: subscription.status.clone(),
            plan_id: subscription.plan_id().map(str::to_string),
            current_period_start,
            current_period_end: subscription.current_period_end.and_then(epoch_to_utc),
            cancel_at_period_end: subscription.cancel_at_period_end,
            trial_end: subscription.trial_end.and_then(epoch_to_utc),
            canceled_at: subscription.canceled_at.and_then(epoch_to_utc),
        })
    }
}
