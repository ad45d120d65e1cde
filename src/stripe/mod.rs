pub mod client;
pub mod signature;
pub mod types;

pub use client::{PaymentGateway, StripeGateway};
pub use types::{
    CheckoutSessionObject, CustomerObject, EventEnvelope, InvoiceObject, StripeEvent,
    SubscriptionObject,
};
