use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{premium_status, Subscription, SubscriptionState};
use super::service::BillingService;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::stripe::client::PaymentGateway;

/// key: billing-api -> client subscription endpoints
///
/// Every handler talks to Stripe first and only records what Stripe
/// returned, so the local row never gets ahead of the provider.
pub async fn create_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    user: AuthUser,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> AppResult<Json<SubscriptionEnvelope>> {
    if payload.plan_id.trim().is_empty() {
        return Err(AppError::BadRequest("plan_id is required".to_string()));
    }

    let service = BillingService::new(pool);
    let customer_id = ensure_customer(&service, gateway.as_ref(), user.user_id).await?;
    let remote = gateway
        .create_subscription(&customer_id, &payload.plan_id, payload.trial_days)
        .await?;
    let record = service
        .apply_state(user.user_id, &SubscriptionState::from_remote(&remote)?)
        .await?;
    Ok(Json(envelope(record)))
}

pub async fn cancel_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<SubscriptionEnvelope>> {
    // An empty body is an immediate cancel; a body that is present must parse.
    let payload = if body.is_empty() {
        CancelSubscriptionRequest::default()
    } else {
        serde_json::from_slice::<CancelSubscriptionRequest>(&body)
            .map_err(|err| AppError::BadRequest(format!("cancel request malformed: {err}")))?
    };

    let service = BillingService::new(pool);
    let record = service
        .subscription_for_user(user.user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let remote = gateway
        .cancel_subscription(&record.stripe_subscription_id, payload.at_period_end)
        .await?;
    let record = service
        .apply_state(user.user_id, &SubscriptionState::from_remote(&remote)?)
        .await?;
    Ok(Json(envelope(record)))
}

pub async fn update_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSubscriptionRequest>,
) -> AppResult<Json<SubscriptionEnvelope>> {
    if payload.plan_id.trim().is_empty() {
        return Err(AppError::BadRequest("plan_id is required".to_string()));
    }

    let service = BillingService::new(pool);
    let record = service
        .subscription_for_user(user.user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let remote = gateway
        .update_subscription_price(&record.stripe_subscription_id, &payload.plan_id)
        .await?;
    let record = service
        .apply_state(user.user_id, &SubscriptionState::from_remote(&remote)?)
        .await?;
    Ok(Json(envelope(record)))
}

pub async fn subscription_status(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SubscriptionStatusResponse>> {
    let service = BillingService::new(pool);
    let record = service
        .subscription_for_user(user.user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let is_premium = service
        .profile(user.user_id)
        .await?
        .map(|profile| profile.is_premium)
        .unwrap_or_else(|| premium_status(&record.status));

    Ok(Json(SubscriptionStatusResponse {
        id: record.id,
        status: record.status,
        plan_id: record.plan_id,
        current_period_end: record.current_period_end,
        cancel_at_period_end: record.cancel_at_period_end,
        is_premium,
    }))
}

/// Finds or creates the Stripe customer backing a local user. A customer
/// already attached to the profile wins; otherwise Stripe is searched by
/// the account email before a new customer is created.
async fn ensure_customer(
    service: &BillingService,
    gateway: &dyn PaymentGateway,
    user_id: i32,
) -> AppResult<String> {
    if let Some(customer_id) = service.customer_for_user(user_id).await? {
        return Ok(customer_id);
    }
    let email = service.user_email(user_id).await?;
    let customer = match gateway.find_customer_by_email(&email).await? {
        Some(existing) => existing,
        None => gateway.create_customer(&email).await?,
    };
    service.attach_customer(user_id, &customer.id).await?;
    Ok(customer.id)
}

fn envelope(subscription: Subscription) -> SubscriptionEnvelope {
    SubscriptionEnvelope {
        is_premium: subscription.is_premium(),
        subscription,
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEnvelope {
    pub subscription: Subscription,
    pub is_premium: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub id: Uuid,
    pub status: String,
    pub plan_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub is_premium: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub at_period_end: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan_id: String,
}
