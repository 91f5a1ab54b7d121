use axum::extract::{Path, Query, State};
use uuid::Uuid;

use super::common::success_response;
use crate::auth::AuthenticatedAccount;
use crate::common::{Page, PaginationParams};
use crate::services::{OrderDetails, OrderSummary, PaymentInitiation};
use crate::{ApiResponse, ApiResult, AppState};

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "The caller's orders, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Page<OrderSummary>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Page<OrderSummary>> {
    let page = state
        .services
        .orders
        .list_orders(account.account_id, &params)
        .await?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderDetails>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let order = state
        .services
        .orders
        .get_order(account.account_id, order_id)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Allowed only while the order is still processing. Reserved stock is returned.",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderDetails>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let order = state
        .services
        .orders
        .cancel(account.account_id, order_id)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/retry-payment",
    summary = "Retry a failed payment",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "New payment started", body = ApiResponse<PaymentInitiation>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment cannot be retried", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor error", body = crate::errors::ErrorResponse),
        (status = 504, description = "Payment processor timed out", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentInitiation> {
    let initiation = state
        .services
        .payments
        .retry_payment(account.account_id, order_id)
        .await?;
    Ok(success_response(initiation))
}
