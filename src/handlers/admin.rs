use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{success_response, validate_input};
use crate::auth::AdminAccount;
use crate::common::{money, Page, PaginationParams};
use crate::entities::ShippingStatus;
use crate::services::{OrderDetails, OrderFilter, OrderStats, OrderSummary, StatusHistoryEntry};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: ShippingStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct SetStockRequest {
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductStock {
    pub product_id: i32,
    pub name: String,
    pub price: rust_decimal::Decimal,
    pub stock: i32,
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Change shipping status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<OrderDetails>),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn update_status(
    State(state): State<AppState>,
    admin: AdminAccount,
    Path(order_id): Path<Uuid>,
    axum::Json(request): axum::Json<UpdateStatusRequest>,
) -> ApiResult<OrderDetails> {
    let order = state
        .services
        .orders
        .set_status(admin.account_id(), order_id, request.status)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    params(OrderFilter, PaginationParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Page<OrderSummary>>),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Query(filter): Query<OrderFilter>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Page<OrderSummary>> {
    let page = state.services.orders.admin_list(&filter, &params).await?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    summary = "Get any order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderDetails>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let order = state.services.orders.admin_get_order(order_id).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}/history",
    summary = "Order status history",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "History retrieved", body = ApiResponse<Vec<StatusHistoryEntry>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn order_history(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Vec<StatusHistoryEntry>> {
    let history = state.services.orders.history(order_id).await?;
    Ok(success_response(history))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    summary = "Store statistics",
    responses(
        (status = 200, description = "Statistics", body = ApiResponse<OrderStats>),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn stats(State(state): State<AppState>, _admin: AdminAccount) -> ApiResult<OrderStats> {
    let stats = state.services.orders.stats().await?;
    Ok(success_response(stats))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/products/{id}/stock",
    summary = "Set product stock",
    params(("id" = i32, Path, description = "Product id")),
    request_body = SetStockRequest,
    responses(
        (status = 200, description = "Stock updated", body = ApiResponse<ProductStock>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn set_stock(
    State(state): State<AppState>,
    admin: AdminAccount,
    Path(product_id): Path<i32>,
    axum::Json(request): axum::Json<SetStockRequest>,
) -> ApiResult<ProductStock> {
    validate_input(&request)?;
    let product = state
        .services
        .catalog
        .set_stock(product_id, request.quantity)
        .await?;
    info!(admin = %admin.account_id(), product_id, stock = product.stock, "stock set by administrator");
    Ok(success_response(ProductStock {
        product_id: product.id,
        price: money::from_minor(product.price_minor),
        name: product.name,
        stock: product.stock,
    }))
}
