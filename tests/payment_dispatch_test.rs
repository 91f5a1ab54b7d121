mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{RejectingGateway, SlowGateway, StubGateway, TestApp};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use storefront_api::{
    entities::{
        order, order_status_history, CheckoutState, DeliveryMethod, PaymentMethod, PaymentStatus,
        ShippingStatus, StatusActor, StatusKind,
    },
    errors::ServiceError,
    services::payment::{PaymentInitiation, PaymentResult},
};
use uuid::Uuid;

/// Cart of two product 7, address and standard delivery selected.
async fn ready_to_pay(app: &TestApp) {
    app.seed_storefront().await;
    app.state
        .services
        .cart
        .add_item(app.account, 7, 2)
        .await
        .unwrap();
    let checkout = &app.state.services.checkout;
    checkout.set_address(app.account, 1).await.unwrap();
    checkout
        .set_shipping(app.account, DeliveryMethod::StandardDelivery, None)
        .await
        .unwrap();
}

async fn place_wallet_order(app: &TestApp) -> PaymentInitiation {
    ready_to_pay(app).await;
    app.state
        .services
        .checkout
        .set_payment(app.account, PaymentMethod::Wallet)
        .await
        .unwrap()
}

#[tokio::test]
async fn wallet_payment_returns_processor_url() {
    let gateway = Arc::new(StubGateway::default());
    let app = TestApp::with_gateway(gateway.clone()).await;

    let placed = place_wallet_order(&app).await;

    let expected = format!("https://pay.test/checkout/{}", placed.order_id);
    assert_eq!(placed.payment_url.as_deref(), Some(expected.as_str()));
    assert_eq!(gateway.calls(), 1);

    let order = app.order(placed.order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_url.as_deref(), Some(expected.as_str()));
    assert_eq!(app.product_stock(7).await, 8);
}

#[tokio::test]
async fn cash_on_delivery_never_calls_processor() {
    let gateway = Arc::new(StubGateway::default());
    let app = TestApp::with_gateway(gateway.clone()).await;
    ready_to_pay(&app).await;

    let placed = app
        .state
        .services
        .checkout
        .set_payment(app.account, PaymentMethod::CashOnDelivery)
        .await
        .unwrap();

    assert_eq!(placed.payment_url, None);
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn processor_rejection_leaves_checkout_resumable() {
    let app = TestApp::with_gateway(Arc::new(RejectingGateway)).await;
    ready_to_pay(&app).await;

    let err = app
        .state
        .services
        .checkout
        .set_payment(app.account, PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentGateway(_));
    assert!(err.is_retryable());

    assert!(order::Entity::find().all(&*app.state.db).await.unwrap().is_empty());
    assert_eq!(app.product_stock(7).await, 10);
    let details = app.state.services.checkout.details(app.account).await.unwrap();
    assert_eq!(details.state, CheckoutState::PaymentPending);
    assert_eq!(details.subtotal.to_string(), "1000.00");
}

#[tokio::test]
async fn processor_timeout_leaves_checkout_resumable() {
    let app = TestApp::with_gateway(Arc::new(SlowGateway)).await;
    ready_to_pay(&app).await;

    let err = app
        .state
        .services
        .checkout
        .set_payment(app.account, PaymentMethod::Wallet)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentTimeout(1));

    assert!(order::Entity::find().all(&*app.state.db).await.unwrap().is_empty());
    assert_eq!(app.product_stock(7).await, 10);
    assert_eq!(
        app.state
            .services
            .checkout
            .details(app.account)
            .await
            .unwrap()
            .state,
        CheckoutState::PaymentPending
    );
}

#[tokio::test]
async fn paid_callback_settles_order_once() {
    let app = TestApp::new().await;
    let placed = place_wallet_order(&app).await;
    let payments = &app.state.services.payments;

    let order = payments
        .handle_callback(placed.order_id, PaymentResult::Paid, Some("psp_001".into()))
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.payment_reference.as_deref(), Some("psp_001"));

    // Duplicate delivery is acknowledged without another history row
    let again = payments
        .handle_callback(placed.order_id, PaymentResult::Paid, None)
        .await
        .unwrap();
    assert_eq!(again.payment_status, PaymentStatus::Paid);

    assert_matches!(
        payments
            .handle_callback(placed.order_id, PaymentResult::Failed, None)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let payment_rows = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(placed.order_id))
        .filter(order_status_history::Column::Kind.eq(StatusKind::Payment))
        .order_by_asc(order_status_history::Column::Sequence)
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(payment_rows.len(), 2);
    assert_eq!(payment_rows[1].to_status, "PAID");
    assert_eq!(payment_rows[1].actor, StatusActor::PaymentProcessor);
}

#[tokio::test]
async fn failed_callback_releases_stock_and_retry_reserves_again() {
    let gateway = Arc::new(StubGateway::default());
    let app = TestApp::with_gateway(gateway.clone()).await;
    let placed = place_wallet_order(&app).await;
    let payments = &app.state.services.payments;

    let order = payments
        .handle_callback(placed.order_id, PaymentResult::Failed, None)
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.shipping_status, ShippingStatus::Processing);
    assert!(order.stock_released);
    assert_eq!(app.product_stock(7).await, 10);

    let retried = payments
        .retry_payment(app.account, placed.order_id)
        .await
        .unwrap();
    assert!(retried.payment_url.is_some());
    assert_eq!(gateway.calls(), 2);

    let order = app.order(placed.order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(!order.stock_released);
    assert_eq!(app.product_stock(7).await, 8);
}

#[tokio::test]
async fn retry_is_only_for_failed_redirect_payments() {
    let app = TestApp::new().await;
    let placed = place_wallet_order(&app).await;
    let payments = &app.state.services.payments;

    assert_matches!(
        payments.retry_payment(app.account, placed.order_id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        payments.retry_payment(Uuid::new_v4(), placed.order_id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn late_callback_for_cancelled_order_is_ignored() {
    let app = TestApp::new().await;
    let placed = place_wallet_order(&app).await;

    app.state
        .services
        .orders
        .cancel(app.account, placed.order_id)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .payments
        .handle_callback(placed.order_id, PaymentResult::Paid, Some("late".into()))
        .await
        .unwrap();
    assert_eq!(order.shipping_status, ShippingStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_reference, None);
    assert_eq!(app.product_stock(7).await, 10);
}

#[tokio::test]
async fn callback_for_unknown_order_is_not_found() {
    let app = TestApp::new().await;

    assert_matches!(
        app.state
            .services
            .payments
            .handle_callback(Uuid::new_v4(), PaymentResult::Paid, None)
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn processor_callback_is_rejected_for_cash_on_delivery() {
    let app = TestApp::new().await;
    ready_to_pay(&app).await;
    let placed = app
        .state
        .services
        .checkout
        .set_payment(app.account, PaymentMethod::CashOnDelivery)
        .await
        .unwrap();
    assert_eq!(app.product_stock(7).await, 8);

    assert_matches!(
        app.state
            .services
            .payments
            .handle_callback(placed.order_id, PaymentResult::Failed, None)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let order = app.order(placed.order_id).await;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.shipping_status, ShippingStatus::Processing);
    assert!(!order.stock_released);
    assert_eq!(app.product_stock(7).await, 8);
}

#[tokio::test]
async fn failed_payment_after_dispatch_keeps_stock_reserved() {
    let app = TestApp::new().await;
    let placed = place_wallet_order(&app).await;
    let admin = Uuid::new_v4();
    let orders = &app.state.services.orders;
    orders
        .set_status(admin, placed.order_id, ShippingStatus::PreparingForShipment)
        .await
        .unwrap();
    orders
        .set_status(admin, placed.order_id, ShippingStatus::InTransit)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .payments
        .handle_callback(placed.order_id, PaymentResult::Failed, None)
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.shipping_status, ShippingStatus::InTransit);
    assert!(!order.stock_released);
    assert_eq!(app.product_stock(7).await, 8);

    // Not Processing any more, so no retry either
    assert_matches!(
        app.state
            .services
            .payments
            .retry_payment(app.account, placed.order_id)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
}
