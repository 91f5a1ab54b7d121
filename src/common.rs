//! Types and helpers shared by services and handlers.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::ServiceError;

/// Money helpers. Amounts are persisted as integer minor units (centavos).
pub mod money {
    use super::*;

    pub const MINOR_UNIT_SCALE: u32 = 2;

    pub fn from_minor(minor: i64) -> Decimal {
        Decimal::new(minor, MINOR_UNIT_SCALE)
    }

    /// Rounds half away from zero to the minor unit.
    pub fn to_minor(amount: Decimal) -> Result<i64, ServiceError> {
        let scaled = amount
            .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero)
            * Decimal::from(10_i64.pow(MINOR_UNIT_SCALE));
        scaled
            .to_i64()
            .ok_or_else(|| ServiceError::InternalError(format!("amount {amount} out of range")))
    }

    /// `quantity × unit price` in minor units, refusing to overflow.
    pub fn line_total_minor(unit_price_minor: i64, quantity: i32) -> Result<i64, ServiceError> {
        unit_price_minor
            .checked_mul(i64::from(quantity))
            .ok_or_else(|| ServiceError::ValidationError("line total is too large".to_string()))
    }
}

/// Query parameters for paginated listings
#[derive(Debug, Clone, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Clamps page to at least 1 and `per_page` to `1..=max_per_page`.
    pub fn normalized(&self, max_per_page: u64) -> (u64, u64) {
        (self.page.max(1), self.per_page.clamp(1, max_per_page.max(1)))
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}
