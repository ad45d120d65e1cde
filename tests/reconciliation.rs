use async_trait::async_trait;
use billing_sync::billing::{scheduler, BillingService, EventLedger, SubscriptionState};
use billing_sync::error::{AppError, AppResult};
use billing_sync::stripe::{CustomerObject, PaymentGateway, SubscriptionObject};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;

// key: reconciliation-tests -> sweep replays stalled ledger events
#[derive(Default)]
struct StubGateway {
    customer_email: Option<String>,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn find_customer_by_email(&self, _email: &str) -> AppResult<Option<CustomerObject>> {
        Ok(None)
    }

    async fn create_customer(&self, email: &str) -> AppResult<CustomerObject> {
        Ok(CustomerObject {
            id: "cus_rec".to_string(),
            email: Some(email.to_string()),
        })
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<CustomerObject> {
        Ok(CustomerObject {
            id: customer_id.to_string(),
            email: self.customer_email.clone(),
        })
    }

    async fn create_subscription(
        &self,
        _customer_id: &str,
        _price_id: &str,
        _trial_days: Option<u32>,
    ) -> AppResult<SubscriptionObject> {
        Err(AppError::Message("not wired in this test".into()))
    }

    async fn retrieve_subscription(&self, _subscription_id: &str) -> AppResult<SubscriptionObject> {
        Err(AppError::Message("not wired in this test".into()))
    }

    async fn cancel_subscription(
        &self,
        _subscription_id: &str,
        _at_period_end: bool,
    ) -> AppResult<SubscriptionObject> {
        Err(AppError::Message("not wired in this test".into()))
    }

    async fn update_subscription_price(
        &self,
        _subscription_id: &str,
        _price_id: &str,
    ) -> AppResult<SubscriptionObject> {
        Err(AppError::Message("not wired in this test".into()))
    }
}

async fn seed_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind("hashed")
        .fetch_one(pool)
        .await
        .unwrap()
}

fn subscription_event(event_id: &str, event_type: &str, sub_id: &str, status: &str) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {"object": {
            "id": sub_id,
            "customer": "cus_rec",
            "status": status,
            "items": {"data": [{"id": "si_1", "price": {"id": "price_gold"}}]},
            "current_period_start": Utc::now().timestamp(),
            "current_period_end": Utc::now().timestamp() + 2_592_000,
            "cancel_at_period_end": false
        }}
    })
}

async fn processed_at(pool: &PgPool, event_id: &str) -> Option<DateTime<Utc>> {
    sqlx::query_scalar("SELECT processed_at FROM stripe_events WHERE id = $1")
        .bind(event_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn stalled_created_event_applies_once_user_exists(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = EventLedger::new(pool.clone());

    // delivery arrived before the user registered and failed
    let payload = subscription_event(
        "evt_stall",
        "customer.subscription.created",
        "sub_stall",
        "active",
    );
    ledger
        .record("evt_stall", "customer.subscription.created", &payload)
        .await
        .unwrap();
    ledger
        .mark_failed("evt_stall", "user for stripe customer cus_rec")
        .await
        .unwrap();

    let user_id = seed_user(&pool, "late-signup@example.com").await;
    let gateway = StubGateway {
        customer_email: Some("late-signup@example.com".to_string()),
    };
    scheduler::process_tick(&pool, &gateway, 5).await.unwrap();

    assert!(processed_at(&pool, "evt_stall").await.is_some());
    let owner: i32 =
        sqlx::query_scalar("SELECT user_id FROM subscriptions WHERE stripe_subscription_id = $1")
            .bind("sub_stall")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(owner, user_id);

    let premium: bool = sqlx::query_scalar("SELECT is_premium FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(premium);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn updated_event_recovers_after_handler_outage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "outage@example.com").await;
    let service = BillingService::new(pool.clone());
    service
        .apply_state(
            user_id,
            &SubscriptionState {
                stripe_subscription_id: "sub_out".to_string(),
                stripe_customer_id: "cus_rec".to_string(),
                status: "trialing".to_string(),
                plan_id: Some("price_gold".to_string()),
                current_period_start: Utc::now(),
                current_period_end: Some(Utc::now() + Duration::days(30)),
                cancel_at_period_end: false,
                trial_end: Some(Utc::now() + Duration::days(7)),
                canceled_at: None,
            },
        )
        .await
        .unwrap();

    let ledger = EventLedger::new(pool.clone());
    let payload = subscription_event(
        "evt_out",
        "customer.subscription.updated",
        "sub_out",
        "active",
    );
    ledger
        .record("evt_out", "customer.subscription.updated", &payload)
        .await
        .unwrap();
    ledger
        .mark_failed("evt_out", "connection reset by peer")
        .await
        .unwrap();

    scheduler::process_tick(&pool, &StubGateway::default(), 5)
        .await
        .unwrap();

    assert!(processed_at(&pool, "evt_out").await.is_some());
    let status: String =
        sqlx::query_scalar("SELECT status FROM subscriptions WHERE stripe_subscription_id = $1")
            .bind("sub_out")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "active");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn events_at_the_attempt_cap_are_left_alone(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_user(&pool, "capped@example.com").await;
    let ledger = EventLedger::new(pool.clone());

    let payload = subscription_event(
        "evt_cap",
        "customer.subscription.created",
        "sub_cap",
        "active",
    );
    ledger
        .record("evt_cap", "customer.subscription.created", &payload)
        .await
        .unwrap();
    for _ in 0..3 {
        ledger.mark_failed("evt_cap", "still failing").await.unwrap();
    }

    let gateway = StubGateway {
        customer_email: Some("capped@example.com".to_string()),
    };
    scheduler::process_tick(&pool, &gateway, 3).await.unwrap();

    let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM stripe_events WHERE id = $1")
        .bind("evt_cap")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(attempts, 3, "capped events must not be retried");
    assert!(processed_at(&pool, "evt_cap").await.is_none());

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unparseable_object_is_marked_failed(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = EventLedger::new(pool.clone());

    let payload = json!({
        "id": "evt_bad",
        "type": "customer.subscription.updated",
        "data": {"object": {"bogus": true}}
    });
    ledger
        .record("evt_bad", "customer.subscription.updated", &payload)
        .await
        .unwrap();

    scheduler::process_tick(&pool, &StubGateway::default(), 5)
        .await
        .unwrap();

    let (attempts, last_error): (i32, Option<String>) =
        sqlx::query_as("SELECT attempts, last_error FROM stripe_events WHERE id = $1")
            .bind("evt_bad")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(attempts, 1);
    assert!(last_error.unwrap().contains("missing field"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invoice_without_subscription_settles_as_ignored(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = EventLedger::new(pool.clone());

    let payload = json!({
        "id": "evt_one_off",
        "type": "invoice.payment_succeeded",
        "data": {"object": {"id": "in_7", "customer": "cus_rec"}}
    });
    ledger
        .record("evt_one_off", "invoice.payment_succeeded", &payload)
        .await
        .unwrap();

    scheduler::process_tick(&pool, &StubGateway::default(), 5)
        .await
        .unwrap();

    assert!(
        processed_at(&pool, "evt_one_off").await.is_some(),
        "one-off invoices settle without touching subscriptions"
    );
}
