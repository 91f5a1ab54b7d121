use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use url::Url;
use uuid::Uuid;

use super::PaymentGateway;
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment processor timed out")]
    Timeout,
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
    #[error("payment processor unreachable: {0}")]
    Transport(String),
    #[error("payment processor returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn into_service_error(self, timeout: Duration) -> ServiceError {
        match self {
            GatewayError::Timeout => ServiceError::PaymentTimeout(timeout.as_secs()),
            other => ServiceError::PaymentGateway(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct InitiatePaymentRequest<'a> {
    reference: Uuid,
    amount: String,
    currency: &'a str,
    method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
struct InitiatePaymentResponse {
    redirect_url: String,
}

/// Talks to a payment processor that exposes `POST {base}/payments` and
/// answers with a hosted checkout `redirect_url`.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: Url,
    currency: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ServiceError::ValidationError(format!("invalid payment gateway url: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            currency: "PHP".to_string(),
        })
    }

    fn endpoint(&self) -> Result<Url, GatewayError> {
        self.base_url
            .join("payments")
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(gateway = %self.base_url))]
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, GatewayError> {
        let body = InitiatePaymentRequest {
            reference: order_id,
            amount: format!("{:.2}", amount),
            currency: &self.currency,
            method,
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, body = %text, "payment initiation rejected");
            return Err(GatewayError::Rejected(format!("status {status}")));
        }

        let parsed: InitiatePaymentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Url::parse(&parsed.redirect_url)
            .map(|url| url.to_string())
            .map_err(|e| GatewayError::InvalidResponse(format!("redirect_url: {e}")))
    }
}

/// Processor stand-in for development: builds a hosted-page URL locally.
#[derive(Clone)]
pub struct SandboxPaymentGateway {
    checkout_url: Url,
}

impl SandboxPaymentGateway {
    pub fn new(checkout_url: &str) -> Result<Self, ServiceError> {
        let checkout_url = Url::parse(checkout_url).map_err(|e| {
            ServiceError::ValidationError(format!("invalid sandbox checkout url: {e}"))
        })?;
        Ok(Self { checkout_url })
    }
}

#[async_trait]
impl PaymentGateway for SandboxPaymentGateway {
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, GatewayError> {
        let mut url = self.checkout_url.clone();
        url.query_pairs_mut()
            .append_pair("order_id", &order_id.to_string())
            .append_pair("amount", &format!("{:.2}", amount))
            .append_pair("method", &method.to_string());
        Ok(url.to_string())
    }
}
