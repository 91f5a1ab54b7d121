mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, CALLBACK_SECRET};
use serde_json::{json, Value};
use storefront_api::handlers::payments::{sign_callback, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use uuid::Uuid;

async fn seeded() -> TestApp {
    let app = TestApp::new().await;
    app.seed_storefront().await;
    app
}

/// Drives the HTTP checkout for two of product 7 and returns the order id.
async fn checkout_over_http(app: &TestApp, payment_method: &str) -> Value {
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": 7, "quantity": 2})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout/address",
            Some(json!({"address_id": 1})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout/shipping",
            Some(json!({"delivery_method": "STANDARD_DELIVERY"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout/payment",
            Some(json!({"payment_method": payment_method})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"].clone()
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let app = seeded().await;

    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = seeded().await;

    let response = app
        .request_authenticated(Method::GET, "/api/v1/admin/stats", None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request_admin(Method::GET, "/api/v1/admin/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_products"], 1);
}

#[tokio::test]
async fn cart_routes_round_trip() {
    let app = seeded().await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": 7, "quantity": 2})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["subtotal"], "1000.00");

    let response = app
        .request_authenticated(Method::PUT, "/api/v1/cart/items/7?quantity=3", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["items"][0]["quantity"], 3);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": 7, "quantity": 50})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["code"], "out_of_stock");

    let response = app
        .request_authenticated(Method::DELETE, "/api/v1/cart/items/7", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["items"], json!([]));
}

#[tokio::test]
async fn step_conflicts_report_current_state() {
    let app = seeded().await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({"product_id": 7, "quantity": 1})),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout/shipping",
            Some(json!({"delivery_method": "PICKUP_DELIVERY", "store_id": 3})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["code"], "address_not_set");
    assert_eq!(body["current_state"], "ADDRESS_PENDING");
}

#[tokio::test]
async fn shipping_quote_and_store_listing() {
    let app = seeded().await;

    let response = app
        .request_authenticated(
            Method::GET,
            "/api/v1/checkout/calculate-shipping?address_id=1&delivery_method=PRIORITY_DELIVERY",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["shipping_fee"], "250.00");

    let response = app
        .request_authenticated(Method::GET, "/api/v1/stores", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let stores = body["data"].as_array().unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0]["store_id"], 3);
}

#[tokio::test]
async fn order_routes_cover_view_and_cancel() {
    let app = seeded().await;
    let placed = checkout_over_http(&app, "CASH_ON_DELIVERY").await;
    let order_id = placed["order_id"].as_str().unwrap().to_string();
    assert!(placed.get("payment_url").is_none());

    let response = app
        .request_authenticated(Method::GET, "/api/v1/orders", None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);

    let uri = format!("/api/v1/orders/{order_id}");
    let response = app.request_authenticated(Method::GET, &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], "1150.00");
    assert_eq!(body["data"]["shipping_status"], "PROCESSING");

    let other = app.token_for(Uuid::new_v4());
    let response = app.request(Method::GET, &uri, None, Some(&other)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let cancel = format!("/api/v1/orders/{order_id}/cancel");
    let response = app.request_authenticated(Method::POST, &cancel, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.request_authenticated(Method::POST, &cancel, None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["code"], "not_cancellable");
    assert_eq!(body["current_state"], "CANCELLED");
}

#[tokio::test]
async fn admin_status_update_and_history() {
    let app = seeded().await;
    let placed = checkout_over_http(&app, "CASH_ON_DELIVERY").await;
    let order_id = placed["order_id"].as_str().unwrap().to_string();
    let status_uri = format!("/api/v1/admin/orders/{order_id}/status");

    let response = app
        .request_admin(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "IN_TRANSIT"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request_admin(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "PREPARING_FOR_SHIPMENT"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_admin(
            Method::GET,
            &format!("/api/v1/admin/orders/{order_id}/history"),
            None,
        )
        .await;
    let body = response_json(response).await;
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["to_status"], "PREPARING_FOR_SHIPMENT");

    let response = app
        .request_admin(
            Method::GET,
            "/api/v1/admin/orders?status=PREPARING_FOR_SHIPMENT",
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn admin_sets_stock() {
    let app = seeded().await;

    let response = app
        .request_admin(
            Method::PUT,
            "/api/v1/admin/products/7/stock",
            Some(json!({"quantity": 3})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.product_stock(7).await, 3);

    let response = app
        .request_admin(
            Method::PUT,
            "/api/v1/admin/products/7/stock",
            Some(json!({"quantity": -5})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.product_stock(7).await, 3);
}

#[tokio::test]
async fn signed_callback_marks_order_paid() {
    let app = seeded().await;
    let placed = checkout_over_http(&app, "WALLET").await;
    let order_id = placed["order_id"].as_str().unwrap().to_string();
    assert!(placed["payment_url"].as_str().unwrap().starts_with("https://pay.test/"));

    let payload = json!({"order_id": order_id, "result": "paid", "reference": "psp_42"});
    let body = serde_json::to_vec(&payload).unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign_callback(CALLBACK_SECRET, timestamp, &body).unwrap();
    let timestamp = timestamp.to_string();

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/callback",
            Some(payload.clone()),
            None,
            &[
                (TIMESTAMP_HEADER, timestamp.as_str()),
                (SIGNATURE_HEADER, signature.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["data"]["payment_status"], "PAID");
}

#[tokio::test]
async fn unsigned_or_tampered_callbacks_are_rejected() {
    let app = seeded().await;
    let placed = checkout_over_http(&app, "CARD").await;
    let order_id = placed["order_id"].as_str().unwrap().to_string();

    let payload = json!({"order_id": order_id, "result": "PAID"});
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/callback",
            Some(payload.clone()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signed_for = serde_json::to_vec(&json!({"order_id": order_id, "result": "FAILED"})).unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign_callback(CALLBACK_SECRET, timestamp, &signed_for).unwrap();
    let timestamp = timestamp.to_string();
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/callback",
            Some(payload),
            None,
            &[
                (TIMESTAMP_HEADER, timestamp.as_str()),
                (SIGNATURE_HEADER, signature.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let uri = format!("/api/v1/orders/{order_id}");
    let body = response_json(app.request_authenticated(Method::GET, &uri, None).await).await;
    assert_eq!(body["data"]["payment_status"], "PENDING");
}

#[tokio::test]
async fn abandoning_checkout_over_http() {
    let app = seeded().await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({"product_id": 7, "quantity": 1})),
    )
    .await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/checkout/address",
        Some(json!({"address_id": 1})),
    )
    .await;

    let response = app
        .request_authenticated(Method::DELETE, "/api/v1/checkout", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["state"], "ABANDONED");

    let response = app
        .request_authenticated(Method::GET, "/api/v1/checkout/details", None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["state"], "ADDRESS_PENDING");
    assert_eq!(body["data"]["address_id"], Value::Null);
}
