use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Profile, Subscription, SubscriptionState};
use crate::error::{AppError, AppResult};

/// key: billing-service -> subscription lifecycle
///
/// Every write goes through one transaction that updates the subscription row
/// and the owning profile together, so `profiles.is_premium` can never drift
/// from the subscription status.
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_user_by_email(&self, email: &str) -> AppResult<Option<i32>> {
        let user_id: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user_id)
    }

    pub async fn user_email(&self, user_id: i32) -> AppResult<String> {
        let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        email.ok_or(AppError::NotFound)
    }

    /// Customer ids recorded on profiles short-circuit the email match for
    /// every delivery after the first.
    pub async fn user_for_customer(&self, customer_id: &str) -> AppResult<Option<i32>> {
        let user_id: Option<i32> =
            sqlx::query_scalar("SELECT user_id FROM profiles WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id)
    }

    pub async fn customer_for_user(&self, user_id: i32) -> AppResult<Option<String>> {
        let customer_id: Option<Option<String>> =
            sqlx::query_scalar("SELECT stripe_customer_id FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(customer_id.flatten())
    }

    pub async fn attach_customer(&self, user_id: i32, customer_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, stripe_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts the subscription row keyed on `stripe_subscription_id` and
    /// refreshes the profile flag in the same transaction. Last write wins on
    /// concurrent deliveries for the same subscription.
    pub async fn apply_state(
        &self,
        user_id: i32,
        state: &SubscriptionState,
    ) -> AppResult<Subscription> {
        let mut tx = self.pool.begin().await?;
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id,
                user_id,
                stripe_subscription_id,
                stripe_customer_id,
                status,
                plan_id,
                current_period_start,
                current_period_end,
                cancel_at_period_end,
                trial_end,
                canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (stripe_subscription_id)
            DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                status = EXCLUDED.status,
                plan_id = COALESCE(EXCLUDED.plan_id, subscriptions.plan_id),
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                trial_end = EXCLUDED.trial_end,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&state.stripe_subscription_id)
        .bind(&state.stripe_customer_id)
        .bind(&state.status)
        .bind(&state.plan_id)
        .bind(state.current_period_start)
        .bind(state.current_period_end)
        .bind(state.cancel_at_period_end)
        .bind(state.trial_end)
        .bind(state.canceled_at)
        .fetch_one(&mut tx)
        .await?;

        sync_profile(&mut tx, &subscription).await?;
        tx.commit().await?;
        Ok(subscription)
    }

    /// Applies a snapshot for a subscription that must already exist locally.
    /// Used by `customer.subscription.updated`/`deleted`, where there is no
    /// customer email to resolve a user from.
    pub async fn sync_existing(&self, state: &SubscriptionState) -> AppResult<Subscription> {
        let existing = self
            .find_by_stripe_id(&state.stripe_subscription_id)
            .await?
            .ok_or_else(|| {
                AppError::MissingLocal(format!("subscription {}", state.stripe_subscription_id))
            })?;
        self.apply_state(existing.user_id, state).await
    }

    /// Status-only update for invoice events, which carry a subscription id
    /// but no period fields.
    pub async fn set_status(
        &self,
        stripe_subscription_id: &str,
        status: &str,
    ) -> AppResult<Subscription> {
        let mut tx = self.pool.begin().await?;
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2, updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(status)
        .fetch_optional(&mut tx)
        .await?
        .ok_or_else(|| {
            AppError::MissingLocal(format!("subscription {stripe_subscription_id}"))
        })?;

        sync_profile(&mut tx, &subscription).await?;
        tx.commit().await?;
        Ok(subscription)
    }

    pub async fn subscription_for_user(
        &self,
        user_id: i32,
        id: Uuid,
    ) -> AppResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    pub async fn find_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> AppResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE stripe_subscription_id = $1",
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    pub async fn profile(&self, user_id: i32) -> AppResult<Option<Profile>> {
        let profile =
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(profile)
    }
}

async fn sync_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription: &Subscription,
) -> AppResult<()> {
    let blob = json!({
        "stripe_subscription_id": subscription.stripe_subscription_id,
        "status": subscription.status,
        "plan_id": subscription.plan_id,
        "current_period_end": subscription.current_period_end,
        "cancel_at_period_end": subscription.cancel_at_period_end,
    });
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, is_premium, subscription, stripe_customer_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id)
        DO UPDATE SET
            is_premium = EXCLUDED.is_premium,
            subscription = EXCLUDED.subscription,
            stripe_customer_id = COALESCE(profiles.stripe_customer_id, EXCLUDED.stripe_customer_id),
            updated_at = NOW()
        "#,
    )
    .bind(subscription.user_id)
    .bind(subscription.is_premium())
    .bind(blob)
    .bind(&subscription.stripe_customer_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}
