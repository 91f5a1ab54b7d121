use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::common::{success_response, validate_input};
use crate::auth::AuthenticatedAccount;
use crate::errors::ServiceError;
use crate::services::CartView;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    #[validate(range(min = 1))]
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SetQuantityParams {
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "View cart",
    description = "Current cart, priced from the live catalog",
    responses(
        (status = 200, description = "Cart retrieved", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> ApiResult<CartView> {
    let cart = state.services.cart.view(account.account_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add item",
    description = "Adds units of a product, merging with an existing line",
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Json(request): Json<AddCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&request)?;
    let cart = state
        .services
        .cart
        .add_item(account.account_id, request.product_id, request.quantity)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{product_id}",
    summary = "Set item quantity",
    params(
        ("product_id" = i32, Path, description = "Product in the cart"),
        SetQuantityParams,
    ),
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn set_quantity(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(product_id): Path<i32>,
    Query(params): Query<SetQuantityParams>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .set_quantity(account.account_id, product_id, params.quantity)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    summary = "Remove item",
    params(("product_id" = i32, Path, description = "Product in the cart")),
    responses(
        (status = 200, description = "Item removed", body = ApiResponse<CartView>),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    Path(product_id): Path<i32>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .remove_item(account.account_id, product_id)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    summary = "Clear cart",
    description = "Removes every item and abandons any checkout in progress",
    responses(
        (status = 200, description = "Cart cleared", body = ApiResponse<CartView>),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let cart = state.services.cart.clear(account.account_id).await?;
    Ok(success_response(cart))
}
