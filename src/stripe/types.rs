use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// key: stripe-types -> wire shapes for the handful of objects this service reads
///
/// These mirror just the fields the synchronizer consumes; serde ignores the
/// rest of Stripe's payloads.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub items: SubscriptionItems,
    pub current_period_start: i64,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub trial_end: Option<i64>,
    pub canceled_at: Option<i64>,
}

impl SubscriptionObject {
    pub fn plan_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn first_item_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: PriceObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerObject {
    pub id: String,
    pub email: Option<String>,
}

/// Paginated list shape returned by Stripe search endpoints.
#[derive(Debug, Deserialize)]
pub struct CustomerList {
    #[serde(default)]
    pub data: Vec<CustomerObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    /// Email supplied at checkout, preferring the completed-session details.
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

/// key: stripe-events -> typed dispatch targets for the webhook receiver
#[derive(Debug)]
pub enum StripeEvent {
    SubscriptionCreated(SubscriptionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    InvoicePaymentSucceeded(InvoiceObject),
    InvoicePaymentFailed(InvoiceObject),
    CheckoutCompleted(CheckoutSessionObject),
    Unhandled { event_type: String },
}

impl StripeEvent {
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, serde_json::Error> {
        let object = envelope.data.object;
        let event = match envelope.event_type.as_str() {
            "customer.subscription.created" => {
                StripeEvent::SubscriptionCreated(serde_json::from_value(object)?)
            }
            "customer.subscription.updated" => {
                StripeEvent::SubscriptionUpdated(serde_json::from_value(object)?)
            }
            "customer.subscription.deleted" => {
                StripeEvent::SubscriptionDeleted(serde_json::from_value(object)?)
            }
            "invoice.payment_succeeded" => {
                StripeEvent::InvoicePaymentSucceeded(serde_json::from_value(object)?)
            }
            "invoice.payment_failed" => {
                StripeEvent::InvoicePaymentFailed(serde_json::from_value(object)?)
            }
            "checkout.session.completed" => {
                StripeEvent::CheckoutCompleted(serde_json::from_value(object)?)
            }
            _ => StripeEvent::Unhandled {
                event_type: envelope.event_type,
            },
        };
        Ok(event)
    }
}

/// Converts a Stripe epoch-seconds field to a UTC timestamp. Out-of-range
/// values come back as `None` rather than panicking on hostile payloads.
pub fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription_envelope(event_type: &str) -> EventEnvelope {
        serde_json::from_value(json!({
            "id": "evt_parse_1",
            "type": event_type,
            "data": {
                "object": {
                    "id": "sub_123",
                    "object": "subscription",
                    "customer": "cus_123",
                    "status": "active",
                    "items": {
                        "object": "list",
                        "data": [
                            { "id": "si_123", "price": { "id": "price_pro_monthly" } }
                        ]
                    },
                    "current_period_start": 1_700_000_000,
                    "current_period_end": 1_702_592_000,
                    "cancel_at_period_end": false,
                    "trial_end": null,
                    "canceled_at": null
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn subscription_event_parses_into_typed_object() {
        let envelope = subscription_envelope("customer.subscription.created");
        let event = StripeEvent::from_envelope(envelope).unwrap();
        let StripeEvent::SubscriptionCreated(subscription) = event else {
            panic!("expected SubscriptionCreated");
        };
        assert_eq!(subscription.id, "sub_123");
        assert_eq!(subscription.customer, "cus_123");
        assert_eq!(subscription.status, "active");
        assert_eq!(subscription.plan_id(), Some("price_pro_monthly"));
        assert_eq!(subscription.first_item_id(), Some("si_123"));
    }

    #[test]
    fn unknown_event_type_is_unhandled() {
        let envelope: EventEnvelope = serde_json::from_value(json!({
            "id": "evt_parse_2",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1" } }
        }))
        .unwrap();
        let event = StripeEvent::from_envelope(envelope).unwrap();
        let StripeEvent::Unhandled { event_type } = event else {
            panic!("expected Unhandled");
        };
        assert_eq!(event_type, "charge.refunded");
    }

    #[test]
    fn known_event_with_missing_fields_fails_to_parse() {
        let envelope: EventEnvelope = serde_json::from_value(json!({
            "id": "evt_parse_3",
            "type": "customer.subscription.updated",
            "data": { "object": { "id": "sub_9" } }
        }))
        .unwrap();
        assert!(StripeEvent::from_envelope(envelope).is_err());
    }

    #[test]
    fn checkout_session_prefers_customer_details_email() {
        let session: CheckoutSessionObject = serde_json::from_value(json!({
            "id": "cs_1",
            "customer": "cus_9",
            "subscription": "sub_9",
            "customer_email": "fallback@example.com",
            "customer_details": { "email": "confirmed@example.com" }
        }))
        .unwrap();
        assert_eq!(session.email(), Some("confirmed@example.com"));
    }

    #[test]
    fn epoch_conversion_rejects_out_of_range() {
        assert!(epoch_to_utc(1_700_000_000).is_some());
        assert!(epoch_to_utc(i64::MAX).is_none());
    }
}
