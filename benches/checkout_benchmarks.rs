use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use storefront_api::auth::JwtAuth;
use storefront_api::collaborators::Store;
use storefront_api::common::money;
use storefront_api::config::ShippingConfig;
use sea_orm::Iterable;
use storefront_api::entities::{DeliveryMethod, ShippingStatus};
use storefront_api::handlers::payments::sign_callback;
use storefront_api::services::order_lifecycle::is_valid_admin_transition;
use storefront_api::services::shipping::{ShippingFeeCalculator, ShippingRateTable};
use uuid::Uuid;

// Fee lookup for each delivery method
fn shipping_fee_benchmark(c: &mut Criterion) {
    let calculator = ShippingFeeCalculator::new(ShippingRateTable::from(&ShippingConfig::default()));
    let stores: Vec<Store> = (1..=50)
        .map(|id| Store {
            store_id: id,
            store_name: format!("Store {id}"),
        })
        .collect();

    let mut group = c.benchmark_group("shipping_fee");
    for method in [
        DeliveryMethod::StandardDelivery,
        DeliveryMethod::PriorityDelivery,
        DeliveryMethod::PickupDelivery,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(method), &method, |b, &method| {
            b.iter(|| {
                calculator.compute_fee(
                    black_box(Some("visayas")),
                    black_box(42),
                    method,
                    black_box(Some(50)),
                    &stores,
                )
            });
        });
    }
    group.finish();
}

// Subtotal of carts of increasing size, in minor units
fn cart_subtotal_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cart_subtotal");

    for size in [1usize, 5, 20, 100].iter() {
        let lines: Vec<(i64, i32)> = (0..*size)
            .map(|i| (49_950 + i as i64 * 100, (i % 5 + 1) as i32))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| {
                lines.iter().try_fold(0i64, |acc, &(price, qty)| {
                    money::line_total_minor(price, qty).map(|line| acc + line)
                })
            });
        });
    }

    group.finish();
}

// Payment callback signing, which every callback verification repeats
fn callback_signature_benchmark(c: &mut Criterion) {
    let body = serde_json::to_vec(&serde_json::json!({
        "order_id": "550e8400-e29b-41d4-a716-446655440000",
        "status": "PAID",
        "reference": "psp_12345"
    }))
    .unwrap();

    c.bench_function("callback_signature", |b| {
        b.iter(|| sign_callback(black_box("callback-secret"), black_box(1_700_000_000), &body));
    });
}

// Every (from, to) pair of the administrator transition table
fn transition_table_benchmark(c: &mut Criterion) {
    let statuses: Vec<ShippingStatus> = ShippingStatus::iter().collect();

    c.bench_function("admin_transition_table", |b| {
        b.iter(|| {
            let mut allowed = 0usize;
            for &from in &statuses {
                for &to in &statuses {
                    for pickup in [false, true] {
                        if is_valid_admin_transition(black_box(from), black_box(to), pickup) {
                            allowed += 1;
                        }
                    }
                }
            }
            allowed
        });
    });
}

fn jwt_benchmark(c: &mut Criterion) {
    let auth = JwtAuth::new("benchmark-secret-that-is-long-enough");
    let token = auth
        .issue(Uuid::new_v4(), &["customer"], Duration::from_secs(3600))
        .unwrap();

    c.bench_function("jwt_verify", |b| {
        b.iter(|| auth.verify(black_box(&token)));
    });
}

criterion_group!(
    benches,
    shipping_fee_benchmark,
    cart_subtotal_benchmark,
    callback_signature_benchmark,
    transition_table_benchmark,
    jwt_benchmark
);
criterion_main!(benches);
