//! Stock reservation at order finalization.
//!
//! Reservations run inside the caller's transaction, so a failure on any
//! product rolls back the decrements already applied to the others.

use std::collections::BTreeMap;

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};

use crate::entities::product;
use crate::errors::ServiceError;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Quantity of one product to take from or return to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct StockReservationGuard {
    max_attempts: u32,
}

impl Default for StockReservationGuard {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Merges lines per product; iteration is in ascending product id.
fn merge(lines: &[StockLine]) -> BTreeMap<i32, i64> {
    let mut merged = BTreeMap::new();
    for line in lines {
        *merged.entry(line.product_id).or_insert(0_i64) += i64::from(line.quantity);
    }
    merged
}

impl StockReservationGuard {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decrements stock for every line. Returns the number of units reserved.
    pub async fn reserve<C>(&self, conn: &C, lines: &[StockLine]) -> Result<i64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut units = 0;
        for (product_id, quantity) in merge(lines) {
            self.reserve_one(conn, product_id, quantity).await?;
            units += quantity;
        }
        counter!("storefront_stock.units_reserved", units as u64);
        Ok(units)
    }

    async fn reserve_one<C>(&self, conn: &C, product_id: i32, quantity: i64) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        for attempt in 1..=self.max_attempts {
            let observed = product::Entity::find_by_id(product_id)
                .one(conn)
                .await?
                .ok_or(ServiceError::InsufficientStock(product_id))?;

            let remaining = i64::from(observed.stock) - quantity;
            if remaining < 0 {
                debug!(product_id, requested = quantity, available = observed.stock, "stock shortfall");
                return Err(ServiceError::InsufficientStock(product_id));
            }
            let remaining = i32::try_from(remaining)
                .map_err(|_| ServiceError::InsufficientStock(product_id))?;

            let result = product::Entity::update_many()
                .col_expr(product::Column::Stock, Expr::value(remaining))
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::Stock.eq(observed.stock))
                .exec(conn)
                .await?;

            if result.rows_affected == 1 {
                return Ok(());
            }

            counter!("storefront_stock.reservation_retries", 1);
            warn!(product_id, attempt, "stock changed concurrently, retrying reservation");
        }

        Err(ServiceError::Conflict(format!(
            "stock for product {product_id} is changing too quickly, try again"
        )))
    }

    /// Returns every line's quantity to stock.
    pub async fn release<C>(&self, conn: &C, lines: &[StockLine]) -> Result<i64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut units = 0;
        for (product_id, quantity) in merge(lines) {
            product::Entity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .exec(conn)
                .await?;
            units += quantity;
        }
        counter!("storefront_stock.units_released", units as u64);
        Ok(units)
    }
}
