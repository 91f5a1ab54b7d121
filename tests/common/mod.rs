#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::ADMIN_ROLE,
    collaborators::{GatewayError, PaymentGateway},
    common::money,
    config::AppConfig,
    db,
    entities::{address, order, product, province, store, PaymentMethod},
    events::{self, EventSender},
    services::Collaborators,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const CALLBACK_SECRET: &str = "callback_secret_for_tests";

/// Gateway that always answers with a hosted page for the order.
#[derive(Default)]
pub struct StubGateway {
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initiate(
        &self,
        order_id: Uuid,
        _amount: Decimal,
        _method: PaymentMethod,
    ) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://pay.test/checkout/{order_id}"))
    }
}

/// Gateway that rejects every payment.
pub struct RejectingGateway;

#[async_trait]
impl PaymentGateway for RejectingGateway {
    async fn initiate(
        &self,
        _order_id: Uuid,
        _amount: Decimal,
        _method: PaymentMethod,
    ) -> Result<String, GatewayError> {
        Err(GatewayError::Rejected("processor unavailable".into()))
    }
}

/// Gateway that never answers within the one second test timeout.
pub struct SlowGateway;

#[async_trait]
impl PaymentGateway for SlowGateway {
    async fn initiate(
        &self,
        order_id: Uuid,
        _amount: Decimal,
        _method: PaymentMethod,
    ) -> Result<String, GatewayError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(format!("https://pay.test/late/{order_id}"))
    }
}

/// Application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub account: Uuid,
    token: String,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway::default())).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.payment.timeout_secs = 1;
        cfg.payment.callback_secret = Some(CALLBACK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let collaborators = Collaborators::from_database(db_arc.clone(), gateway);
        let state = AppState::new(db_arc, cfg, event_sender, collaborators);
        let router = storefront_api::build_router(state.clone());

        let account = Uuid::new_v4();
        let token = state
            .auth
            .issue(account, &["customer"], Duration::from_secs(3600))
            .expect("issue customer token");
        let admin_token = state
            .auth
            .issue(Uuid::new_v4(), &[ADMIN_ROLE], Duration::from_secs(3600))
            .expect("issue admin token");

        Self {
            router,
            state,
            account,
            token,
            admin_token,
            _event_task: event_task,
        }
    }

    /// Bearer token for [`TestApp::account`].
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn token_for(&self, account: Uuid) -> String {
        self.state
            .auth
            .issue(account, &["customer"], Duration::from_secs(3600))
            .expect("issue token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated as [`TestApp::account`].
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn request_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.admin_token()))
            .await
    }

    pub async fn seed_product(&self, id: i32, name: &str, price: Decimal, stock: i32) {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price_minor: Set(money::to_minor(price).expect("price in range")),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
    }

    pub async fn seed_province(&self, id: i32, zone: Option<&str>) {
        province::ActiveModel {
            id: Set(id),
            name: Set(format!("Province {id}")),
            zone: Set(zone.map(str::to_string)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed province");
    }

    pub async fn seed_store(&self, id: i32, name: &str, active: bool) {
        store::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            active: Set(active),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed store");
    }

    pub async fn seed_address(&self, id: i32, account: Uuid, province_id: i32) {
        address::ActiveModel {
            id: Set(id),
            account_id: Set(account),
            province_id: Set(province_id),
            city_id: Set(province_id * 100 + 1),
            barangay_id: Set(province_id * 10_000 + 1),
            line: Set(format!("{id} Test Street")),
            phone: Set("+639170000000".to_string()),
            is_default: Set(false),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address");
    }

    /// Reference data shared by most scenarios: product 7 at 500.00 with
    /// 10 in stock, a metro address 1 owned by [`TestApp::account`], an
    /// unroutable address 2, and active store 3.
    pub async fn seed_storefront(&self) {
        self.seed_product(7, "Ceramic Mug Set", Decimal::new(500, 0), 10)
            .await;
        self.seed_province(1, Some("metro")).await;
        self.seed_province(2, None).await;
        self.seed_address(1, self.account, 1).await;
        self.seed_address(2, self.account, 2).await;
        self.seed_store(3, "Makati Flagship", true).await;
        self.seed_store(4, "Closed Outlet", false).await;
    }

    pub async fn product_stock(&self, id: i32) -> i32 {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is json")
}
