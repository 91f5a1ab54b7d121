use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{Address, AddressBook, Catalog, Geography, Product, Store, StoreDirectory};
use crate::entities::{address, product, province, store};
use crate::errors::ServiceError;

impl From<product::Model> for Product {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price_minor: model.price_minor,
            stock: model.stock,
        }
    }
}

impl From<address::Model> for Address {
    fn from(model: address::Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            province_id: model.province_id,
            city_id: model.city_id,
            barangay_id: model.barangay_id,
            line: model.line,
            phone: model.phone,
            is_default: model.is_default,
        }
    }
}

/// Catalog backed by the local `products` table.
#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    async fn get_product(&self, id: i32) -> Result<Option<Product>, ServiceError> {
        Ok(product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .map(Product::from))
    }

    async fn get_products(&self, ids: &[i32]) -> Result<HashMap<i32, Product>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = product::Entity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|m| (m.id, Product::from(m))).collect())
    }

    #[instrument(skip(self))]
    async fn set_stock(&self, id: i32, stock: i32) -> Result<Product, ServiceError> {
        if stock < 0 {
            return Err(ServiceError::ValidationError(
                "stock cannot be negative".to_string(),
            ));
        }
        let existing = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        let previous = existing.stock;
        let mut active: product::ActiveModel = existing.into();
        active.stock = Set(stock);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(product_id = id, previous, stock, "product stock overwritten");
        Ok(updated.into())
    }

    async fn count(&self) -> Result<u64, ServiceError> {
        Ok(product::Entity::find().count(&*self.db).await?)
    }
}

#[derive(Clone)]
pub struct DbAddressBook {
    db: Arc<DatabaseConnection>,
}

impl DbAddressBook {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AddressBook for DbAddressBook {
    async fn get_address(&self, id: i32, owner: Uuid) -> Result<Option<Address>, ServiceError> {
        Ok(address::Entity::find_by_id(id)
            .filter(address::Column::AccountId.eq(owner))
            .one(&*self.db)
            .await?
            .map(Address::from))
    }
}

/// Resolves zones through the address's province.
#[derive(Clone)]
pub struct DbGeography {
    db: Arc<DatabaseConnection>,
}

impl DbGeography {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Geography for DbGeography {
    async fn zone_for(&self, address_id: i32) -> Result<Option<String>, ServiceError> {
        let Some((_, province)) = address::Entity::find_by_id(address_id)
            .find_also_related(province::Entity)
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        Ok(province
            .and_then(|p| p.zone)
            .map(|zone| zone.trim().to_ascii_lowercase())
            .filter(|zone| !zone.is_empty()))
    }
}

#[derive(Clone)]
pub struct DbStoreDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbStoreDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StoreDirectory for DbStoreDirectory {
    async fn list_stores(&self) -> Result<Vec<Store>, ServiceError> {
        let rows = store::Entity::find()
            .filter(store::Column::Active.eq(true))
            .order_by_asc(store::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|s| Store {
                store_id: s.id,
                store_name: s.name,
            })
            .collect())
    }
}
