mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{
    common::PaginationParams,
    entities::{
        DeliveryMethod, PaymentMethod, PaymentStatus, ShippingStatus, StatusActor, StatusKind,
    },
    errors::ServiceError,
    services::{order_lifecycle::OrderFilter, payment::PaymentResult},
};
use uuid::Uuid;

/// Places a cash-on-delivery order for `quantity` of product 7.
async fn place_order(app: &TestApp, quantity: i32, method: DeliveryMethod) -> Uuid {
    let services = &app.state.services;
    services
        .cart
        .add_item(app.account, 7, quantity)
        .await
        .unwrap();
    services.checkout.set_address(app.account, 1).await.unwrap();
    let store = method.is_pickup().then_some(3);
    services
        .checkout
        .set_shipping(app.account, method, store)
        .await
        .unwrap();
    services
        .checkout
        .set_payment(app.account, PaymentMethod::CashOnDelivery)
        .await
        .unwrap()
        .order_id
}

async fn seeded() -> TestApp {
    let app = TestApp::new().await;
    app.seed_storefront().await;
    app
}

#[tokio::test]
async fn customer_cancel_releases_stock_once() {
    let app = seeded().await;
    let order_id = place_order(&app, 3, DeliveryMethod::StandardDelivery).await;
    assert_eq!(app.product_stock(7).await, 7);
    let orders = &app.state.services.orders;

    let details = orders.cancel(app.account, order_id).await.unwrap();
    assert_eq!(details.shipping_status, ShippingStatus::Cancelled);
    assert_eq!(app.product_stock(7).await, 10);

    assert_matches!(
        orders.cancel(app.account, order_id).await,
        Err(ServiceError::NotCancellable {
            current: ShippingStatus::Cancelled,
            ..
        })
    );
    assert_eq!(app.product_stock(7).await, 10);
}

#[tokio::test]
async fn cancel_after_failed_payment_does_not_double_release() {
    let app = TestApp::new().await;
    app.seed_storefront().await;
    let services = &app.state.services;
    services.cart.add_item(app.account, 7, 2).await.unwrap();
    services.checkout.set_address(app.account, 1).await.unwrap();
    services
        .checkout
        .set_shipping(app.account, DeliveryMethod::StandardDelivery, None)
        .await
        .unwrap();
    let order_id = services
        .checkout
        .set_payment(app.account, PaymentMethod::Card)
        .await
        .unwrap()
        .order_id;

    services
        .payments
        .handle_callback(order_id, PaymentResult::Failed, None)
        .await
        .unwrap();
    assert_eq!(app.product_stock(7).await, 10);

    services.orders.cancel(app.account, order_id).await.unwrap();
    assert_eq!(app.product_stock(7).await, 10);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = seeded().await;
    let order_id = place_order(&app, 1, DeliveryMethod::StandardDelivery).await;
    let stranger = Uuid::new_v4();
    let orders = &app.state.services.orders;

    assert_matches!(
        orders.get_order(stranger, order_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        orders.cancel(stranger, order_id).await,
        Err(ServiceError::NotFound(_))
    );
    let page = orders
        .list_orders(stranger, &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    let details = orders.get_order(app.account, order_id).await.unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.total, dec!(650.00));
}

#[tokio::test]
async fn admin_cannot_cancel_in_transit_but_can_deliver() {
    let app = seeded().await;
    let order_id = place_order(&app, 1, DeliveryMethod::StandardDelivery).await;
    let admin = Uuid::new_v4();
    let orders = &app.state.services.orders;

    orders
        .set_status(admin, order_id, ShippingStatus::PreparingForShipment)
        .await
        .unwrap();
    orders
        .set_status(admin, order_id, ShippingStatus::InTransit)
        .await
        .unwrap();

    assert_matches!(
        orders.set_status(admin, order_id, ShippingStatus::Cancelled).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        orders.cancel(app.account, order_id).await,
        Err(ServiceError::NotCancellable {
            current: ShippingStatus::InTransit,
            ..
        })
    );

    let details = orders
        .set_status(admin, order_id, ShippingStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(details.shipping_status, ShippingStatus::Delivered);
    assert_eq!(app.product_stock(7).await, 9);

    let history = orders.history(order_id).await.unwrap();
    let shipping: Vec<&str> = history
        .iter()
        .filter(|h| h.kind == StatusKind::Shipping)
        .map(|h| h.to_status.as_str())
        .collect();
    assert_eq!(
        shipping,
        vec!["PROCESSING", "PREPARING_FOR_SHIPMENT", "IN_TRANSIT", "DELIVERED"]
    );
    let last = history.last().unwrap();
    assert_eq!(last.actor, StatusActor::Administrator);
    assert_eq!(last.account_id, Some(admin));
}

#[tokio::test]
async fn pickup_orders_are_collected_not_delivered() {
    let app = seeded().await;
    let order_id = place_order(&app, 1, DeliveryMethod::PickupDelivery).await;
    let admin = Uuid::new_v4();
    let orders = &app.state.services.orders;

    for status in [ShippingStatus::PreparingForShipment, ShippingStatus::InTransit] {
        orders.set_status(admin, order_id, status).await.unwrap();
    }
    assert_matches!(
        orders.set_status(admin, order_id, ShippingStatus::Delivered).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    let details = orders
        .set_status(admin, order_id, ShippingStatus::Collected)
        .await
        .unwrap();
    assert_eq!(details.shipping_status, ShippingStatus::Collected);
    assert_eq!(details.shipping_fee, dec!(0));
}

#[tokio::test]
async fn admin_cancel_releases_stock() {
    let app = seeded().await;
    let order_id = place_order(&app, 4, DeliveryMethod::StandardDelivery).await;

    app.state
        .services
        .orders
        .set_status(Uuid::new_v4(), order_id, ShippingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(app.product_stock(7).await, 10);
}

#[tokio::test]
async fn admin_listing_filters_by_status_and_search() {
    let app = seeded().await;
    app.seed_product(2, "Electric Fan", dec!(1250), 5).await;
    let first = place_order(&app, 1, DeliveryMethod::StandardDelivery).await;

    let services = &app.state.services;
    services.cart.add_item(app.account, 2, 1).await.unwrap();
    services.checkout.set_address(app.account, 1).await.unwrap();
    services
        .checkout
        .set_shipping(app.account, DeliveryMethod::StandardDelivery, None)
        .await
        .unwrap();
    let second = services
        .checkout
        .set_payment(app.account, PaymentMethod::CashOnDelivery)
        .await
        .unwrap()
        .order_id;
    services
        .orders
        .set_status(Uuid::new_v4(), second, ShippingStatus::PreparingForShipment)
        .await
        .unwrap();

    let params = PaginationParams::default();
    let all = services
        .orders
        .admin_list(&OrderFilter::default(), &params)
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let processing = services
        .orders
        .admin_list(
            &OrderFilter {
                status: Some(ShippingStatus::Processing),
                search: None,
            },
            &params,
        )
        .await
        .unwrap();
    assert_eq!(processing.items.len(), 1);
    assert_eq!(processing.items[0].id, first);

    let by_name = services
        .orders
        .admin_list(
            &OrderFilter {
                status: None,
                search: Some("FAN".into()),
            },
            &params,
        )
        .await
        .unwrap();
    assert_eq!(by_name.items.len(), 1);
    assert_eq!(by_name.items[0].id, second);

    let by_id = services
        .orders
        .admin_list(
            &OrderFilter {
                status: None,
                search: Some(first.to_string()),
            },
            &params,
        )
        .await
        .unwrap();
    assert_eq!(by_id.items.len(), 1);
    assert_eq!(by_id.items[0].id, first);
}

#[tokio::test]
async fn stats_exclude_cancelled_and_failed_revenue() {
    let app = seeded().await;
    let kept = place_order(&app, 2, DeliveryMethod::StandardDelivery).await;
    let cancelled = place_order(&app, 1, DeliveryMethod::StandardDelivery).await;
    app.state
        .services
        .orders
        .cancel(app.account, cancelled)
        .await
        .unwrap();

    let stats = app.state.services.orders.stats().await.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.pending_orders, 1);
    assert_eq!(stats.total_products, 1);
    assert_eq!(stats.total_revenue, dec!(1150.00));

    let order = app.order(kept).await;
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn listing_is_paginated_newest_first() {
    let app = seeded().await;
    let mut placed = Vec::new();
    for _ in 0..3 {
        placed.push(place_order(&app, 1, DeliveryMethod::StandardDelivery).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let page = app
        .state
        .services
        .orders
        .list_orders(
            app.account,
            &PaginationParams {
                page: 1,
                per_page: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, placed[2]);
}

#[tokio::test]
async fn history_keeps_insertion_order() {
    let app = seeded().await;
    let order_id = place_order(&app, 1, DeliveryMethod::StandardDelivery).await;
    let orders = &app.state.services.orders;
    orders
        .set_status(Uuid::new_v4(), order_id, ShippingStatus::PreparingForShipment)
        .await
        .unwrap();

    let history = orders.history(order_id).await.unwrap();
    let sequences: Vec<i32> = history.iter().map(|h| h.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    // Both opening rows share a transaction, and usually a timestamp
    assert_eq!(history[0].kind, StatusKind::Shipping);
    assert_eq!(history[0].to_status, "PROCESSING");
    assert_eq!(history[1].kind, StatusKind::Payment);
    assert_eq!(history[1].to_status, "PENDING");
    assert_eq!(history[2].to_status, "PREPARING_FOR_SHIPMENT");
}
