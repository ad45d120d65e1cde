use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::types::{CustomerList, CustomerObject, SubscriptionObject};
use crate::error::{AppError, AppResult};

/// key: billing-gateway -> provider port
///
/// The subset of the Stripe API this service drives. Handlers and the
/// reconciliation sweep talk to the trait so tests can substitute a stub.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<CustomerObject>>;
    async fn create_customer(&self, email: &str) -> AppResult<CustomerObject>;
    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<CustomerObject>;
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        trial_days: Option<u32>,
    ) -> AppResult<SubscriptionObject>;
    async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<SubscriptionObject>;
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> AppResult<SubscriptionObject>;
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> AppResult<SubscriptionObject>;
}

/// key: billing-gateway-stripe -> reqwest client over the Stripe REST API
pub struct StripeGateway {
    base: String,
    secret_key: String,
    client: Client,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("client build"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> AppResult<T> {
        let response = request.bearer_auth(&self.secret_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(AppError::StripeApi {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<CustomerObject>> {
        let list: CustomerList = self
            .execute(
                self.client
                    .get(self.url("/v1/customers"))
                    .query(&[("email", email), ("limit", "1")]),
            )
            .await?;
        Ok(list.data.into_iter().next())
    }

    async fn create_customer(&self, email: &str) -> AppResult<CustomerObject> {
        self.execute(
            self.client
                .post(self.url("/v1/customers"))
                .form(&[("email", email)]),
        )
        .await
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<CustomerObject> {
        self.execute(self.client.get(self.url(&format!("/v1/customers/{customer_id}"))))
            .await
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        trial_days: Option<u32>,
    ) -> AppResult<SubscriptionObject> {
        let mut params = vec![
            ("customer", customer_id.to_string()),
            ("items[0][price]", price_id.to_string()),
        ];
        if let Some(days) = trial_days {
            params.push(("trial_period_days", days.to_string()));
        }
        self.execute(self.client.post(self.url("/v1/subscriptions")).form(&params))
            .await
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<SubscriptionObject> {
        self.execute(
            self.client
                .get(self.url(&format!("/v1/subscriptions/{subscription_id}"))),
        )
        .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> AppResult<SubscriptionObject> {
        if at_period_end {
            self.execute(
                self.client
                    .post(self.url(&format!("/v1/subscriptions/{subscription_id}")))
                    .form(&[("cancel_at_period_end", "true")]),
            )
            .await
        } else {
            self.execute(
                self.client
                    .delete(self.url(&format!("/v1/subscriptions/{subscription_id}"))),
            )
            .await
        }
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> AppResult<SubscriptionObject> {
        // Stripe swaps prices on the existing line item, not the subscription
        let current = self.retrieve_subscription(subscription_id).await?;
        let item_id = current
            .first_item_id()
            .ok_or_else(|| {
                AppError::Message(format!(
                    "stripe subscription {subscription_id} has no line items"
                ))
            })?
            .to_string();
        let params = [
            ("items[0][id]", item_id),
            ("items[0][price]", price_id.to_string()),
        ];
        self.execute(
            self.client
                .post(self.url(&format!("/v1/subscriptions/{subscription_id}")))
                .form(&params),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}
