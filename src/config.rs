use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// API key presented to Stripe. Must be set via the `STRIPE_SECRET_KEY` env variable.
pub static STRIPE_SECRET_KEY: Lazy<String> =
    Lazy::new(|| std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"));

/// Shared secret Stripe signs webhook deliveries with. Must be set via the
/// `STRIPE_WEBHOOK_SECRET` env variable.
pub static STRIPE_WEBHOOK_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET must be set"));

/// key: billing-config -> stripe api endpoint, overridable for sandboxes and tests
pub static STRIPE_API_BASE: Lazy<String> = Lazy::new(|| {
    std::env::var("STRIPE_API_BASE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// key: billing-config -> max accepted age of a signed webhook timestamp
pub static STRIPE_WEBHOOK_TOLERANCE_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// key: billing-config -> cadence of the event reconciliation sweep
pub static RECONCILE_SCAN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("RECONCILE_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// key: billing-config -> attempt cap before an event is left for operators
pub static RECONCILE_MAX_ATTEMPTS: Lazy<i32> = Lazy::new(|| {
    std::env::var("RECONCILE_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});
