//! Post-creation order lifecycle: customer cancellation, administrator
//! status changes and order reads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Expr, Func, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::account_locks::AccountLocks;
use super::stock::{StockLine, StockReservationGuard};
use crate::collaborators::Catalog;
use crate::common::{money, Page, PaginationParams};
use crate::entities::{
    order, order_item, order_status_history, DeliveryMethod, PaymentMethod, PaymentStatus,
    ShippingStatus, StatusActor, StatusKind,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Administrator transition table. `pickup` selects Collected over Delivered.
pub fn is_valid_admin_transition(from: ShippingStatus, to: ShippingStatus, pickup: bool) -> bool {
    use ShippingStatus::*;
    matches!(
        (from, to),
        (Processing, PreparingForShipment)
            | (Processing, Cancelled)
            | (PreparingForShipment, InTransit)
            | (InTransit, DeliveryFailed)
    ) || (from == InTransit && to == Delivered && !pickup)
        || (from == InTransit && to == Collected && pickup)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_subtotal: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: money::from_minor(item.unit_price_minor),
            line_subtotal: money::from_minor(item.line_subtotal_minor),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub total: Decimal,
    pub delivery_method: DeliveryMethod,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderSummary {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            total: money::from_minor(order.total_minor),
            delivery_method: order.delivery_method,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            shipping_status: order.shipping_status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetails {
    pub id: Uuid,
    pub account_id: Uuid,
    pub address_id: i32,
    pub items: Vec<OrderItemView>,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
    pub delivery_method: DeliveryMethod,
    pub pickup_store_id: Option<i32>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderDetails {
    pub fn new(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            account_id: order.account_id,
            address_id: order.address_id,
            items: items.into_iter().map(OrderItemView::from).collect(),
            subtotal: money::from_minor(order.subtotal_minor),
            shipping_fee: money::from_minor(order.shipping_fee_minor),
            total: money::from_minor(order.total_minor),
            delivery_method: order.delivery_method,
            pickup_store_id: order.pickup_store_id,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            shipping_status: order.shipping_status,
            payment_url: order.payment_url,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusHistoryEntry {
    pub sequence: i32,
    pub kind: StatusKind,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: StatusActor,
    pub account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<order_status_history::Model> for StatusHistoryEntry {
    fn from(row: order_status_history::Model) -> Self {
        Self {
            sequence: row.sequence,
            kind: row.kind,
            from_status: row.from_status,
            to_status: row.to_status,
            actor: row.actor,
            account_id: row.account_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_products: u64,
    /// Orders still in Processing
    pub pending_orders: u64,
    /// Sum of totals over orders that are neither cancelled nor failed payment
    pub total_revenue: Decimal,
}

/// Administrator listing filters.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<ShippingStatus>,
    /// A full order id, or part of an item's product name
    pub search: Option<String>,
}

/// Appends one row to the status audit trail.
pub(crate) async fn record_transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    kind: StatusKind,
    from_status: Option<String>,
    to_status: String,
    actor: StatusActor,
    account_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    // Callers hold the owner's account lock, so the count is stable.
    let recorded = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(order_id))
        .count(conn)
        .await?;
    let sequence = i32::try_from(recorded + 1)
        .map_err(|_| ServiceError::InternalError("status history is too long".to_string()))?;

    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        sequence: Set(sequence),
        kind: Set(kind),
        from_status: Set(from_status),
        to_status: Set(to_status),
        actor: Set(actor),
        account_id: Set(account_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?)
}

pub(crate) fn stock_lines(items: &[order_item::Model]) -> Vec<StockLine> {
    items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect()
}

/// Returns the order's units to stock unless that already happened.
/// Returns the number of units released.
pub(crate) async fn release_order_stock<C: ConnectionTrait>(
    conn: &C,
    stock: &StockReservationGuard,
    order: &order::Model,
) -> Result<i64, ServiceError> {
    if order.stock_released {
        return Ok(0);
    }
    let items = load_items(conn, order.id).await?;
    let units = stock.release(conn, &stock_lines(&items)).await?;
    order::Entity::update_many()
        .col_expr(order::Column::StockReleased, Expr::value(true))
        .filter(order::Column::Id.eq(order.id))
        .exec(conn)
        .await?;
    Ok(units)
}

#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn Catalog>,
    stock: StockReservationGuard,
    event_sender: Arc<EventSender>,
    locks: AccountLocks,
    max_page_size: u64,
}

impl OrderLifecycleService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn Catalog>,
        stock: StockReservationGuard,
        event_sender: Arc<EventSender>,
        locks: AccountLocks,
        max_page_size: u64,
    ) -> Self {
        Self {
            db,
            catalog,
            stock,
            event_sender,
            locks,
            max_page_size,
        }
    }

    /// Customer cancellation, allowed only while the order is Processing.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        account_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let txn = self.db.begin().await?;
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::AccountId.eq(account_id))
            .one(&txn)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;

        if order.shipping_status != ShippingStatus::Processing {
            return Err(ServiceError::NotCancellable {
                order_id,
                current: order.shipping_status,
            });
        }

        let (order, released) = self
            .apply_shipping_status(
                &txn,
                order,
                ShippingStatus::Cancelled,
                StatusActor::Customer,
                account_id,
            )
            .await?;
        let items = load_items(&txn, order_id).await?;
        txn.commit().await?;

        counter!("storefront_orders.cancelled", 1, "actor" => "customer");
        self.emit_status_change(order_id, ShippingStatus::Processing, ShippingStatus::Cancelled, released)
            .await;
        info!(%order_id, %account_id, "order cancelled by customer");
        Ok(OrderDetails::new(order, items))
    }

    /// Administrator status change following [`is_valid_admin_transition`].
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        admin_id: Uuid,
        order_id: Uuid,
        new_status: ShippingStatus,
    ) -> Result<OrderDetails, ServiceError> {
        let owner = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| order_not_found(order_id))?
            .account_id;
        let _guard = self.locks.acquire(owner).await;

        let txn = self.db.begin().await?;
        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;

        let current = order.shipping_status;
        if !is_valid_admin_transition(current, new_status, order.delivery_method.is_pickup()) {
            return Err(ServiceError::InvalidTransition {
                current: current.to_string(),
                requested: new_status.to_string(),
            });
        }

        let (order, released) = self
            .apply_shipping_status(&txn, order, new_status, StatusActor::Administrator, admin_id)
            .await?;
        let items = load_items(&txn, order_id).await?;
        txn.commit().await?;

        counter!("storefront_orders.status_changed", 1, "status" => new_status.to_string());
        self.emit_status_change(order_id, current, new_status, released)
            .await;
        info!(%order_id, from = %current, to = %new_status, "order status updated by administrator");
        Ok(OrderDetails::new(order, items))
    }

    async fn apply_shipping_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        new_status: ShippingStatus,
        actor: StatusActor,
        actor_id: Uuid,
    ) -> Result<(order::Model, i64), ServiceError> {
        let released = if new_status == ShippingStatus::Cancelled {
            release_order_stock(conn, &self.stock, &order).await?
        } else {
            0
        };
        let from = order.shipping_status;
        let order_id = order.id;
        let stock_released = order.stock_released || new_status == ShippingStatus::Cancelled;

        let mut active: order::ActiveModel = order.into();
        active.shipping_status = Set(new_status);
        active.stock_released = Set(stock_released);
        active.updated_at = Set(Utc::now());
        let updated = active.update(conn).await?;

        record_transition(
            conn,
            order_id,
            StatusKind::Shipping,
            Some(from.to_string()),
            new_status.to_string(),
            actor,
            Some(actor_id),
        )
        .await?;
        Ok((updated, released))
    }

    async fn emit_status_change(
        &self,
        order_id: Uuid,
        old_status: ShippingStatus,
        new_status: ShippingStatus,
        released_units: i64,
    ) {
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        if new_status == ShippingStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled(order_id))
                .await;
        }
        if released_units > 0 {
            self.event_sender
                .send_or_log(Event::StockReleased {
                    order_id,
                    units: released_units,
                })
                .await;
        }
    }

    /// The account's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        account_id: Uuid,
        params: &PaginationParams,
    ) -> Result<Page<OrderSummary>, ServiceError> {
        let (page, per_page) = params.normalized(self.max_page_size);
        let paginator = order::Entity::find()
            .filter(order::Column::AccountId.eq(account_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok(Page::new(orders, total, page, per_page).map(OrderSummary::from))
    }

    /// One of the account's orders. Orders of other accounts are not found.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        account_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::AccountId.eq(account_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        let items = load_items(&*self.db, order_id).await?;
        Ok(OrderDetails::new(order, items))
    }

    #[instrument(skip(self))]
    pub async fn admin_get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        let items = load_items(&*self.db, order_id).await?;
        Ok(OrderDetails::new(order, items))
    }

    /// All orders, newest first, optionally filtered by status and search text.
    #[instrument(skip(self))]
    pub async fn admin_list(
        &self,
        filter: &OrderFilter,
        params: &PaginationParams,
    ) -> Result<Page<OrderSummary>, ServiceError> {
        let (page, per_page) = params.normalized(self.max_page_size);

        let mut query = order::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::ShippingStatus.eq(status));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(search_condition(search));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok(Page::new(orders, total, page, per_page).map(OrderSummary::from))
    }

    /// Status audit trail, oldest first.
    #[instrument(skip(self))]
    pub async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;

        let rows = order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::Sequence)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(StatusHistoryEntry::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<OrderStats, ServiceError> {
        let total_orders = order::Entity::find().count(&*self.db).await?;
        let pending_orders = order::Entity::find()
            .filter(order::Column::ShippingStatus.eq(ShippingStatus::Processing))
            .count(&*self.db)
            .await?;
        let total_products = self.catalog.count().await?;

        let revenue: Option<Option<i64>> = order::Entity::find()
            .select_only()
            .column_as(
                Expr::col(order::Column::TotalMinor)
                    .sum()
                    .cast_as(Alias::new("BIGINT")),
                "revenue",
            )
            .filter(order::Column::ShippingStatus.ne(ShippingStatus::Cancelled))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Failed))
            .into_tuple()
            .one(&*self.db)
            .await?;

        Ok(OrderStats {
            total_orders,
            total_products,
            pending_orders,
            total_revenue: money::from_minor(revenue.flatten().unwrap_or(0)),
        })
    }
}

fn order_not_found(order_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", order_id))
}

/// A full order id matches that order; anything else matches item product names.
fn search_condition(search: &str) -> Condition {
    if let Ok(order_id) = Uuid::parse_str(search) {
        return Condition::all().add(order::Column::Id.eq(order_id));
    }

    let pattern = format!("%{}%", search.to_lowercase());
    let matching_orders = Query::select()
        .column(order_item::Column::OrderId)
        .from(order_item::Entity)
        .and_where(
            Expr::expr(Func::lower(Expr::col(order_item::Column::ProductName))).like(pattern),
        )
        .to_owned();
    Condition::all().add(order::Column::Id.in_subquery(matching_orders))
}
