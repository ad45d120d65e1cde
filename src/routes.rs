use axum::{
    routing::{get, post},
    Router,
};

use crate::{auth, billing, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .route(
            "/api/subscriptions/create",
            post(billing::create_subscription),
        )
        .route(
            "/api/subscriptions/:id/cancel",
            post(billing::cancel_subscription),
        )
        .route(
            "/api/subscriptions/:id/update",
            post(billing::update_subscription),
        )
        .route(
            "/api/subscriptions/:id/status",
            get(billing::subscription_status),
        )
}
