//! Interfaces to the systems checkout depends on but does not own.
//!
//! The catalog, address book, geography reference data, store directory and
//! payment processor are all reached through the traits below so services can
//! be exercised against any backing implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::money;
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;

mod database;
pub mod payment_gateway;

pub use database::{DbAddressBook, DbCatalog, DbGeography, DbStoreDirectory};
pub use payment_gateway::{GatewayError, HttpPaymentGateway, SandboxPaymentGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price_minor: i64,
    pub stock: i32,
}

impl Product {
    pub fn price(&self) -> Decimal {
        money::from_minor(self.price_minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub id: i32,
    pub account_id: Uuid,
    pub province_id: i32,
    pub city_id: i32,
    pub barangay_id: i32,
    pub line: String,
    pub phone: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Store {
    pub store_id: i32,
    pub store_name: String,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: i32) -> Result<Option<Product>, ServiceError>;

    /// Missing ids are simply absent from the result.
    async fn get_products(&self, ids: &[i32]) -> Result<HashMap<i32, Product>, ServiceError>;

    /// Overwrites the sellable quantity of a product.
    async fn set_stock(&self, id: i32, stock: i32) -> Result<Product, ServiceError>;

    async fn count(&self) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Returns the address only if it belongs to `owner`.
    async fn get_address(&self, id: i32, owner: Uuid) -> Result<Option<Address>, ServiceError>;
}

#[async_trait]
pub trait Geography: Send + Sync {
    /// Delivery zone of an address, `None` when the location is not routable.
    async fn zone_for(&self, address_id: i32) -> Result<Option<String>, ServiceError>;
}

#[async_trait]
pub trait StoreDirectory: Send + Sync {
    async fn list_stores(&self) -> Result<Vec<Store>, ServiceError>;
}

/// External payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payment and returns the URL the customer must be sent to.
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, GatewayError>;
}
