//! Storefront API Library
//!
//! Cart, checkout and order lifecycle engine for a retail storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod collaborators;
pub mod common;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::extract::FromRef;
use axum::routing::{delete, get, post, put};
use axum::{response::Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use crate::auth::JwtAuth;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{AppServices, Collaborators};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
    pub auth: Arc<JwtAuth>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        collaborators: Collaborators,
    ) -> Self {
        let event_sender = Arc::new(event_sender);
        let services = AppServices::new(db.clone(), &config, event_sender.clone(), collaborators);
        let auth = Arc::new(JwtAuth::new(&config.jwt_secret));
        Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
            auth,
        }
    }
}

impl FromRef<AppState> for Arc<JwtAuth> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes served under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::cart::view_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:product_id",
            put(handlers::cart::set_quantity).delete(handlers::cart::remove_item),
        );

    let checkout = Router::new()
        .route("/checkout", delete(handlers::checkout::abandon))
        .route("/checkout/details", get(handlers::checkout::details))
        .route("/checkout/address", post(handlers::checkout::set_address))
        .route("/checkout/shipping", post(handlers::checkout::set_shipping))
        .route(
            "/checkout/calculate-shipping",
            get(handlers::checkout::calculate_shipping),
        )
        .route("/checkout/payment", post(handlers::checkout::set_payment));

    let orders = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/:id/retry-payment",
            post(handlers::orders::retry_payment),
        );

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin::list_orders))
        .route("/admin/orders/:id", get(handlers::admin::get_order))
        .route(
            "/admin/orders/:id/status",
            put(handlers::admin::update_status),
        )
        .route(
            "/admin/orders/:id/history",
            get(handlers::admin::order_history),
        )
        .route("/admin/stats", get(handlers::admin::stats))
        .route(
            "/admin/products/:id/stock",
            put(handlers::admin::set_stock),
        );

    // Signature-verified instead of bearer-authenticated
    let payment_callback = Router::new().route(
        "/payments/callback",
        post(handlers::payments::payment_callback),
    );

    Router::new()
        .merge(cart)
        .merge(checkout)
        .merge(orders)
        .merge(admin)
        .merge(payment_callback)
        .route("/stores", get(handlers::stores::list_stores))
}

/// Full application router with health, docs, request ids and HTTP tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http().make_span_with(crate::tracing::RequestSpanMaker))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

pub mod prelude {
    pub use crate::auth::{AdminAccount, AuthenticatedAccount};
    pub use crate::config::AppConfig;
    pub use crate::errors::ServiceError;
    pub use crate::services::AppServices;
    pub use crate::{ApiResponse, ApiResult, AppState};
}
