pub mod api;
pub mod events;
pub mod models;
pub mod scheduler;
pub mod service;

pub use api::{
    cancel_subscription, create_subscription, subscription_status, update_subscription,
    CancelSubscriptionRequest, CreateSubscriptionRequest, SubscriptionEnvelope,
    SubscriptionStatusResponse, UpdateSubscriptionRequest,
};
pub use events::{apply_event, EventDisposition, EventLedger, EventOutcome, StoredEvent};
pub use models::{premium_status, Profile, Subscription, SubscriptionState};
pub use scheduler::{process_tick as run_reconciliation_tick, spawn as spawn_reconciliation};
pub use service::BillingService;
