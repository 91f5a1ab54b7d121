use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::account_locks::AccountLocks;
use crate::collaborators::{Catalog, Product};
use crate::common::money;
use crate::entities::{cart, cart_item, checkout_session};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// A cart line priced from the live catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: i32,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_subtotal: Decimal,
    pub available_stock: i32,
    /// The catalog no longer holds enough stock for this line.
    pub exceeds_stock: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
    pub total: Decimal,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart contents joined with their catalog products, in insertion order.
#[derive(Debug, Clone)]
pub(crate) struct CartSnapshot {
    pub revision: i64,
    pub lines: Vec<(cart_item::Model, Product)>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subtotal_minor(&self) -> Result<i64, ServiceError> {
        subtotal_minor(self.lines.iter().map(|(item, product)| (item.quantity, product)))
    }
}

fn subtotal_minor<'a>(
    mut lines: impl Iterator<Item = (i32, &'a Product)>,
) -> Result<i64, ServiceError> {
    lines.try_fold(0_i64, |acc, (quantity, product)| {
        let line = money::line_total_minor(product.price_minor, quantity)?;
        acc.checked_add(line)
            .ok_or_else(|| ServiceError::ValidationError("cart total is too large".to_string()))
    })
}

fn build_view(
    items: &[cart_item::Model],
    products: &HashMap<i32, Product>,
) -> Result<CartView, ServiceError> {
    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal = 0_i64;
    for item in items {
        let Some(product) = products.get(&item.product_id) else {
            warn!(product_id = item.product_id, "cart references a product missing from the catalog");
            continue;
        };
        let line_minor = money::line_total_minor(product.price_minor, item.quantity)?;
        subtotal = subtotal
            .checked_add(line_minor)
            .ok_or_else(|| ServiceError::ValidationError("cart total is too large".to_string()))?;
        lines.push(CartLine {
            product_id: product.id,
            name: product.name.clone(),
            quantity: item.quantity,
            unit_price: product.price(),
            line_subtotal: money::from_minor(line_minor),
            available_stock: product.stock,
            exceeds_stock: item.quantity > product.stock,
        });
    }
    let subtotal = money::from_minor(subtotal);
    Ok(CartView {
        items: lines,
        subtotal,
        total: subtotal,
    })
}

/// Mutation applied to a single cart line.
enum LineChange {
    Upsert { quantity: i32, position: i64, new: bool },
    Remove,
}

/// Per-account shopping cart.
///
/// Every mutation holds the account lock, persists the line change together
/// with the recomputed subtotal and a new cart revision, and abandons the
/// active checkout session when the cart ends up empty.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn Catalog>,
    event_sender: Arc<EventSender>,
    locks: AccountLocks,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn Catalog>,
        event_sender: Arc<EventSender>,
        locks: AccountLocks,
    ) -> Self {
        Self {
            db,
            catalog,
            event_sender,
            locks,
        }
    }

    /// Adds `quantity` units, merging into an existing line for the product.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        account_id: Uuid,
        product_id: i32,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }
        let _guard = self.locks.acquire(account_id).await;

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut items = load_items(&*self.db, account_id).await?;
        let next_position = items.iter().map(|i| i.position).max().map_or(0, |p| p + 1);

        let (new_quantity, position, new) = match items.iter().find(|i| i.product_id == product_id) {
            Some(existing) => (
                existing.quantity.checked_add(quantity).ok_or(ServiceError::OutOfStock {
                    product_id,
                    requested: i32::MAX,
                    available: product.stock,
                })?,
                existing.position,
                false,
            ),
            None => (quantity, next_position, true),
        };
        ensure_in_stock(&product, new_quantity)?;

        apply_line(&mut items, account_id, product_id, new_quantity, position);
        let view = self
            .persist(
                account_id,
                &items,
                product_id,
                LineChange::Upsert {
                    quantity: new_quantity,
                    position,
                    new,
                },
            )
            .await?;

        counter!("storefront_cart.items_added", 1);
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                account_id,
                product_id,
                quantity,
            })
            .await;
        info!(%account_id, product_id, quantity = new_quantity, "cart line updated");
        Ok(view)
    }

    /// Replaces the quantity of an existing line.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        account_id: Uuid,
        product_id: i32,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }
        let _guard = self.locks.acquire(account_id).await;

        let mut items = load_items(&*self.db, account_id).await?;
        let position = items
            .iter()
            .find(|i| i.product_id == product_id)
            .map(|i| i.position)
            .ok_or(ServiceError::ItemNotFound(product_id))?;

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        ensure_in_stock(&product, quantity)?;

        apply_line(&mut items, account_id, product_id, quantity, position);
        let view = self
            .persist(
                account_id,
                &items,
                product_id,
                LineChange::Upsert {
                    quantity,
                    position,
                    new: false,
                },
            )
            .await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                account_id,
                product_id,
                quantity,
            })
            .await;
        Ok(view)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        account_id: Uuid,
        product_id: i32,
    ) -> Result<CartView, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let mut items = load_items(&*self.db, account_id).await?;
        let before = items.len();
        items.retain(|i| i.product_id != product_id);
        if items.len() == before {
            return Err(ServiceError::ItemNotFound(product_id));
        }

        let view = self
            .persist(account_id, &items, product_id, LineChange::Remove)
            .await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                account_id,
                product_id,
            })
            .await;
        Ok(view)
    }

    /// Empties the cart. Also abandons any checkout in progress.
    #[instrument(skip(self))]
    pub async fn clear(&self, account_id: Uuid) -> Result<CartView, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let txn = self.db.begin().await?;
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::AccountId.eq(account_id))
            .exec(&txn)
            .await?;
        bump_cart(&txn, account_id, 0).await?;
        let abandoned = abandon_session(&txn, account_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(account_id))
            .await;
        if abandoned {
            self.event_sender
                .send_or_log(Event::CheckoutAbandoned(account_id))
                .await;
        }
        info!(%account_id, "cart cleared");
        build_view(&[], &HashMap::new())
    }

    /// Current cart priced from the live catalog.
    #[instrument(skip(self))]
    pub async fn view(&self, account_id: Uuid) -> Result<CartView, ServiceError> {
        let items = load_items(&*self.db, account_id).await?;
        let products = self.products_for(&items).await?;
        build_view(&items, &products)
    }

    /// Cart contents with their products. Callers hold the account lock.
    pub(crate) async fn snapshot(&self, account_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let revision = cart::Entity::find_by_id(account_id)
            .one(&*self.db)
            .await?
            .map_or(0, |c| c.revision);
        let items = load_items(&*self.db, account_id).await?;
        let mut products = self.products_for(&items).await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = products
                .remove(&item.product_id)
                .ok_or(ServiceError::InsufficientStock(item.product_id))?;
            lines.push((item, product));
        }
        Ok(CartSnapshot { revision, lines })
    }

    async fn products_for(
        &self,
        items: &[cart_item::Model],
    ) -> Result<HashMap<i32, Product>, ServiceError> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i32> = items.iter().map(|i| i.product_id).collect();
        self.catalog.get_products(&ids).await
    }

    /// Writes one line change plus the derived cart totals atomically.
    async fn persist(
        &self,
        account_id: Uuid,
        items_after: &[cart_item::Model],
        product_id: i32,
        change: LineChange,
    ) -> Result<CartView, ServiceError> {
        let products = self.products_for(items_after).await?;
        let view = build_view(items_after, &products)?;
        let subtotal = money::to_minor(view.subtotal)?;

        let txn = self.db.begin().await?;
        match change {
            LineChange::Upsert {
                quantity,
                position,
                new: true,
            } => {
                cart_item::ActiveModel {
                    account_id: Set(account_id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    position: Set(position),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
            LineChange::Upsert { quantity, .. } => {
                cart_item::Entity::update_many()
                    .col_expr(cart_item::Column::Quantity, Expr::value(quantity))
                    .filter(cart_item::Column::AccountId.eq(account_id))
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .exec(&txn)
                    .await?;
            }
            LineChange::Remove => {
                cart_item::Entity::delete_many()
                    .filter(cart_item::Column::AccountId.eq(account_id))
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .exec(&txn)
                    .await?;
            }
        }
        bump_cart(&txn, account_id, subtotal).await?;
        let abandoned = if items_after.is_empty() {
            abandon_session(&txn, account_id).await?
        } else {
            false
        };
        txn.commit().await?;

        if abandoned {
            self.event_sender
                .send_or_log(Event::CheckoutAbandoned(account_id))
                .await;
        }
        Ok(view)
    }
}

fn ensure_in_stock(product: &Product, quantity: i32) -> Result<(), ServiceError> {
    if quantity > product.stock {
        return Err(ServiceError::OutOfStock {
            product_id: product.id,
            requested: quantity,
            available: product.stock,
        });
    }
    Ok(())
}

fn apply_line(
    items: &mut Vec<cart_item::Model>,
    account_id: Uuid,
    product_id: i32,
    quantity: i32,
    position: i64,
) {
    match items.iter_mut().find(|i| i.product_id == product_id) {
        Some(item) => item.quantity = quantity,
        None => items.push(cart_item::Model {
            account_id,
            product_id,
            quantity,
            position,
            created_at: Utc::now(),
        }),
    }
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    account_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::AccountId.eq(account_id))
        .order_by_asc(cart_item::Column::Position)
        .all(conn)
        .await?)
}

/// Stores the subtotal and advances the revision, creating the cart on first use.
pub(crate) async fn bump_cart<C: ConnectionTrait>(
    conn: &C,
    account_id: Uuid,
    subtotal_minor: i64,
) -> Result<i64, ServiceError> {
    let now = Utc::now();
    match cart::Entity::find_by_id(account_id).one(conn).await? {
        Some(existing) => {
            let revision = existing.revision + 1;
            let mut active: cart::ActiveModel = existing.into();
            active.subtotal_minor = Set(subtotal_minor);
            active.revision = Set(revision);
            active.updated_at = Set(now);
            active.update(conn).await?;
            Ok(revision)
        }
        None => {
            cart::ActiveModel {
                account_id: Set(account_id),
                subtotal_minor: Set(subtotal_minor),
                revision: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?;
            Ok(1)
        }
    }
}

/// Deletes the account's checkout session. Returns whether one existed.
pub(crate) async fn abandon_session<C: ConnectionTrait>(
    conn: &C,
    account_id: Uuid,
) -> Result<bool, ServiceError> {
    let result = checkout_session::Entity::delete_by_id(account_id)
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}
