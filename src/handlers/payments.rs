use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::success_response;
use crate::entities::{PaymentStatus, ShippingStatus};
use crate::errors::ServiceError;
use crate::services::PaymentResult;
use crate::{ApiResponse, ApiResult, AppState};

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-payment-timestamp";
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub result: PaymentResult,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
}

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`.
pub fn sign_callback(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid callback secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServiceError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {name} header")))
}

pub(crate) fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let timestamp: i64 = header(headers, TIMESTAMP_HEADER)?
        .trim()
        .parse()
        .map_err(|_| ServiceError::Unauthorized("invalid callback timestamp".to_string()))?;
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "callback timestamp outside tolerance".to_string(),
        ));
    }

    let signature = hex::decode(header(headers, SIGNATURE_HEADER)?.trim())
        .map_err(|_| ServiceError::Unauthorized("invalid callback signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid callback secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| ServiceError::Unauthorized("invalid callback signature".to_string()))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    summary = "Payment processor callback",
    description = "Reports the final result of a wallet or card payment. Signed with HMAC-SHA256 when a callback secret is configured.",
    request_body = PaymentCallback,
    responses(
        (status = 200, description = "Callback applied", body = ApiResponse<CallbackAck>),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment already settled differently", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<CallbackAck> {
    if let Some(secret) = state
        .config
        .payment
        .callback_secret
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = verify_signature(
            &headers,
            &body,
            secret,
            state.config.payment.callback_tolerance_secs,
            now,
        ) {
            warn!(error = %e, "payment callback signature verification failed");
            return Err(e);
        }
    }

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid callback payload: {e}")))?;

    let order = state
        .services
        .payments
        .handle_callback(callback.order_id, callback.result, callback.reference)
        .await?;

    Ok(success_response(CallbackAck {
        order_id: order.id,
        payment_status: order.payment_status,
        shipping_status: order.shipping_status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "callback_secret";

    fn signed_headers(timestamp: i64, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            TIMESTAMP_HEADER,
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
        headers
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"order_id":"00000000-0000-0000-0000-000000000000","result":"PAID"}"#;
        let signature = sign_callback(SECRET, 1_700_000_000, body).unwrap();
        let headers = signed_headers(1_700_000_000, &signature);
        assert!(verify_signature(&headers, body, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign_callback(SECRET, 1_700_000_000, b"original").unwrap();
        let headers = signed_headers(1_700_000_000, &signature);
        let err = verify_signature(&headers, b"tampered", SECRET, 300, 1_700_000_000).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let signature = sign_callback(SECRET, 1_700_000_000, b"{}").unwrap();
        let headers = signed_headers(1_700_000_000, &signature);
        assert!(verify_signature(&headers, b"{}", SECRET, 300, 1_700_000_301).is_err());
    }

    #[test]
    fn missing_headers_are_rejected() {
        assert!(verify_signature(&HeaderMap::new(), b"{}", SECRET, 300, 0).is_err());
    }
}
