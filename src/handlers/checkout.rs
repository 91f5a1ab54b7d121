use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::common::{created_response, success_response, validate_input};
use crate::auth::AuthenticatedAccount;
use crate::entities::{DeliveryMethod, PaymentMethod};
use crate::errors::ServiceError;
use crate::services::{CheckoutDetails, PaymentInitiation};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct SetAddressRequest {
    #[validate(range(min = 1))]
    pub address_id: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetShippingRequest {
    pub delivery_method: DeliveryMethod,
    /// Required for pickup delivery
    #[serde(default)]
    pub store_id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetPaymentRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ShippingQuoteParams {
    pub address_id: i32,
    pub delivery_method: DeliveryMethod,
    pub store_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingQuote {
    pub shipping_fee: Decimal,
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/details",
    summary = "Current checkout step",
    description = "Furthest step reached with stored selections and totals. Never starts a session.",
    responses(
        (status = 200, description = "Checkout details", body = ApiResponse<CheckoutDetails>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn details(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> ApiResult<CheckoutDetails> {
    let details = state.services.checkout.details(account.account_id).await?;
    Ok(success_response(details))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout/address",
    summary = "Select delivery address",
    request_body = SetAddressRequest,
    responses(
        (status = 200, description = "Address accepted", body = ApiResponse<CheckoutDetails>),
        (status = 409, description = "Cart empty or address not owned", body = crate::errors::ErrorResponse),
        (status = 422, description = "Address cannot be delivered to with the selected method", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn set_address(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Json(request): Json<SetAddressRequest>,
) -> ApiResult<CheckoutDetails> {
    validate_input(&request)?;
    let details = state
        .services
        .checkout
        .set_address(account.account_id, request.address_id)
        .await?;
    Ok(success_response(details))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout/shipping",
    summary = "Select delivery method",
    request_body = SetShippingRequest,
    responses(
        (status = 200, description = "Delivery method accepted", body = ApiResponse<CheckoutDetails>),
        (status = 400, description = "Pickup store missing or unknown", body = crate::errors::ErrorResponse),
        (status = 409, description = "Address not selected yet", body = crate::errors::ErrorResponse),
        (status = 422, description = "Address cannot be delivered to", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn set_shipping(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Json(request): Json<SetShippingRequest>,
) -> ApiResult<CheckoutDetails> {
    let details = state
        .services
        .checkout
        .set_shipping(account.account_id, request.delivery_method, request.store_id)
        .await?;
    Ok(success_response(details))
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/calculate-shipping",
    summary = "Quote a delivery fee",
    params(ShippingQuoteParams),
    responses(
        (status = 200, description = "Fee quote", body = ApiResponse<ShippingQuote>),
        (status = 400, description = "Pickup store missing or unknown", body = crate::errors::ErrorResponse),
        (status = 409, description = "Address not owned", body = crate::errors::ErrorResponse),
        (status = 422, description = "Address cannot be delivered to", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn calculate_shipping(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Query(params): Query<ShippingQuoteParams>,
) -> ApiResult<ShippingQuote> {
    let shipping_fee = state
        .services
        .checkout
        .quote_shipping(
            account.account_id,
            params.address_id,
            params.delivery_method,
            params.store_id,
        )
        .await?;
    Ok(success_response(ShippingQuote { shipping_fee }))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment",
    summary = "Place the order",
    description = "Reserves stock and creates the order. Wallet and card payments return the processor URL to redirect to.",
    request_body = SetPaymentRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<PaymentInitiation>),
        (status = 409, description = "Delivery method not selected or cart empty", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor error", body = crate::errors::ErrorResponse),
        (status = 504, description = "Payment processor timed out", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn set_payment(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Json(request): Json<SetPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state
        .services
        .checkout
        .set_payment(account.account_id, request.payment_method)
        .await?;
    Ok(created_response(placed))
}

#[utoipa::path(
    delete,
    path = "/api/v1/checkout",
    summary = "Abandon checkout",
    responses(
        (status = 200, description = "Checkout abandoned", body = ApiResponse<CheckoutDetails>),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn abandon(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> ApiResult<CheckoutDetails> {
    let details = state.services.checkout.abandon(account.account_id).await?;
    Ok(success_response(details))
}
