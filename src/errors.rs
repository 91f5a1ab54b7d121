use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{CheckoutState, ShippingStatus};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "code": "address_not_set",
    "message": "Delivery address has not been selected",
    "current_state": "ADDRESS_PENDING",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Short human-readable reason
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// State the caller should resynchronise to, for conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

/// Coarse classification used for status mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input. Nothing was changed.
    Validation,
    /// Step ordering or ownership violation. Carries the current state.
    Conflict,
    /// Stock, routing or lookup failure. Fully rolled back.
    Resource,
    /// Payment processor failure or timeout. Safe to retry at the same step.
    ExternalDependency,
    Auth,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),

    #[error("A pickup store must be selected for pickup delivery")]
    StoreRequired,

    #[error("Store {0} is not available for pickup")]
    UnknownStore(i32),

    #[error("Product {0} is not in the cart")]
    ItemNotFound(i32),

    #[error("Only {available} unit(s) of product {product_id} in stock, requested {requested}")]
    OutOfStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(i32),

    #[error("Address {0} cannot be delivered to")]
    UnroutableAddress(i32),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Address {0} does not belong to this account")]
    AddressNotOwned(i32),

    #[error("Delivery address has not been selected")]
    AddressNotSet { current: CheckoutState },

    #[error("Delivery method has not been selected")]
    ShippingNotSet { current: CheckoutState },

    #[error("Order {order_id} can no longer be cancelled")]
    NotCancellable {
        order_id: Uuid,
        current: ShippingStatus,
    },

    #[error("Cannot change status from {current} to {requested}")]
    InvalidTransition { current: String, requested: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment processor error: {0}")]
    PaymentGateway(String),

    #[error("Payment processor did not respond within {0}s")]
    PaymentTimeout(u64),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn db_error(error: impl Into<String>) -> Self {
        ServiceError::DatabaseError(DbErr::Custom(error.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::InvalidQuantity(_)
            | Self::StoreRequired
            | Self::UnknownStore(_) => ErrorKind::Validation,
            Self::EmptyCart
            | Self::AddressNotOwned(_)
            | Self::AddressNotSet { .. }
            | Self::ShippingNotSet { .. }
            | Self::NotCancellable { .. }
            | Self::InvalidTransition { .. }
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_)
            | Self::ItemNotFound(_)
            | Self::OutOfStock { .. }
            | Self::InsufficientStock(_)
            | Self::UnroutableAddress(_) => ErrorKind::Resource,
            Self::PaymentGateway(_) | Self::PaymentTimeout(_) => ErrorKind::ExternalDependency,
            Self::Unauthorized(_) | Self::Forbidden(_) => ErrorKind::Auth,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => "internal_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::StoreRequired => "store_required",
            Self::UnknownStore(_) => "unknown_store",
            Self::ItemNotFound(_) => "item_not_found",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::UnroutableAddress(_) => "unroutable_address",
            Self::EmptyCart => "empty_cart",
            Self::AddressNotOwned(_) => "address_not_owned",
            Self::AddressNotSet { .. } => "address_not_set",
            Self::ShippingNotSet { .. } => "shipping_not_set",
            Self::NotCancellable { .. } => "not_cancellable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::PaymentGateway(_) => "payment_gateway_error",
            Self::PaymentTimeout(_) => "payment_gateway_timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
        }
    }

    /// State a conflicting caller should resynchronise to.
    pub fn current_state(&self) -> Option<String> {
        match self {
            Self::AddressNotSet { current } | Self::ShippingNotSet { current } => {
                Some(current.to_string())
            }
            Self::NotCancellable { current, .. } => Some(current.to_string()),
            Self::InvalidTransition { current, .. } => Some(current.clone()),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfStock { .. } | Self::InsufficientStock(_) | Self::UnroutableAddress(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PaymentTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExternalDependency
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.kind() == ErrorKind::Internal {
            error!(error = %self, "request failed with internal error");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: None,
            current_state: self.current_state(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
