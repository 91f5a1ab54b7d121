//! Seed data script - populates the reference tables checkout reads from
//!
//! Run with: cargo run --bin seed-data -- --account <uuid>
//!
//! This creates:
//! - a small product catalog with stock
//! - provinces mapped to every shipping zone
//! - pickup stores
//! - two saved addresses for the given account
//!
//! and prints a bearer token for that account.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use tracing::info;
use uuid::Uuid;

use storefront_api::{
    auth::{JwtAuth, ADMIN_ROLE},
    common::money,
    config, db,
    entities::{address, product, province, store},
};

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Populate a storefront database with demo data")]
struct Cli {
    /// Account that owns the seeded addresses. A fresh one is generated when omitted.
    #[arg(long)]
    account: Option<Uuid>,

    /// Also grant the admin role in the printed token.
    #[arg(long)]
    admin: bool,

    /// Token lifetime in hours.
    #[arg(long, default_value_t = 24)]
    token_ttl_hours: u64,

    /// Skip seeding and only print a token.
    #[arg(long)]
    token_only: bool,
}

const PRODUCTS: &[(i32, &str, Decimal, i32)] = &[
    (1, "Rice Cooker 1.8L", dec!(1899.00), 25),
    (2, "Electric Fan 16in", dec!(1250.00), 40),
    (3, "Steel Tumbler 500ml", dec!(349.50), 120),
    (4, "Bamboo Cutting Board", dec!(425.00), 60),
    (5, "Cast Iron Skillet", dec!(2150.00), 12),
    (6, "Cotton Bath Towel", dec!(299.00), 80),
    (7, "Ceramic Mug Set", dec!(500.00), 30),
];

const PROVINCES: &[(i32, &str, Option<&str>)] = &[
    (1, "Metro Manila", Some("metro")),
    (2, "Pampanga", Some("luzon")),
    (3, "Cebu", Some("visayas")),
    (4, "Davao del Sur", Some("mindanao")),
    (5, "Batanes", None),
];

const STORES: &[(i32, &str, bool)] = &[
    (1, "Makati Flagship", true),
    (2, "Quezon City Branch", true),
    (3, "Cebu IT Park", true),
    (4, "Pasig Warehouse Outlet", false),
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let account_id = cli.account.unwrap_or_else(Uuid::new_v4);

    if !cli.token_only {
        info!("=== Storefront Seed Data ===");
        let pool = db::establish_connection_from_app_config(&cfg).await?;
        db::run_migrations(&pool).await?;

        info!("Creating products...");
        let count = seed_products(&pool).await?;
        info!("  Created {} products", count);

        info!("Creating provinces...");
        let count = seed_provinces(&pool).await?;
        info!("  Created {} provinces", count);

        info!("Creating stores...");
        let count = seed_stores(&pool).await?;
        info!("  Created {} stores", count);

        info!("Creating addresses for {}...", account_id);
        let count = seed_addresses(&pool, account_id).await?;
        info!("  Created {} addresses", count);
    }

    let mut roles = vec!["customer"];
    if cli.admin {
        roles.push(ADMIN_ROLE);
    }
    let token = JwtAuth::new(&cfg.jwt_secret).issue(
        account_id,
        &roles,
        Duration::from_secs(cli.token_ttl_hours * 3600),
    )?;

    println!("account_id: {account_id}");
    println!("token: {token}");
    Ok(())
}

async fn seed_products(db: &db::DbPool) -> Result<usize> {
    let now = Utc::now();
    let mut created = 0;
    for &(id, name, price, stock) in PRODUCTS {
        if product::Entity::find_by_id(id).one(db).await?.is_some() {
            continue;
        }
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price_minor: Set(money::to_minor(price)?),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .with_context(|| format!("inserting product {id}"))?;
        created += 1;
    }
    Ok(created)
}

async fn seed_provinces(db: &db::DbPool) -> Result<usize> {
    let mut created = 0;
    for &(id, name, zone) in PROVINCES {
        if province::Entity::find_by_id(id).one(db).await?.is_some() {
            continue;
        }
        province::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            zone: Set(zone.map(str::to_string)),
        }
        .insert(db)
        .await?;
        created += 1;
    }
    Ok(created)
}

async fn seed_stores(db: &db::DbPool) -> Result<usize> {
    let mut created = 0;
    for &(id, name, active) in STORES {
        if store::Entity::find_by_id(id).one(db).await?.is_some() {
            continue;
        }
        store::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            active: Set(active),
        }
        .insert(db)
        .await?;
        created += 1;
    }
    Ok(created)
}

async fn seed_addresses(db: &db::DbPool, account_id: Uuid) -> Result<usize> {
    // Address ids are global, so derive them from the account to keep reruns idempotent.
    let base = (account_id.as_u128() % 1_000_000) as i32 * 10;
    let rows = [
        (base + 1, 1, "12 Ayala Ave, Makati", true),
        (base + 2, 3, "88 Osmena Blvd, Cebu City", false),
    ];

    let mut created = 0;
    for (id, province_id, line, is_default) in rows {
        if address::Entity::find_by_id(id).one(db).await?.is_some() {
            continue;
        }
        address::ActiveModel {
            id: Set(id),
            account_id: Set(account_id),
            province_id: Set(province_id),
            city_id: Set(province_id * 100 + 1),
            barangay_id: Set(province_id * 10_000 + 1),
            line: Set(line.to_string()),
            phone: Set("+639171234567".to_string()),
            is_default: Set(is_default),
        }
        .insert(db)
        .await?;
        created += 1;
    }
    Ok(created)
}
