//! Order finalization, payment processor hand-off and payment callbacks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::account_locks::{AccountGuard, AccountLocks};
use super::cart::{bump_cart, CartSnapshot};
use super::order_lifecycle::{load_items, record_transition, release_order_stock, stock_lines};
use super::stock::{StockLine, StockReservationGuard};
use crate::collaborators::PaymentGateway;
use crate::common::money;
use crate::entities::{
    cart_item, checkout_session, order, order_item, CheckoutState, PaymentMethod, PaymentStatus,
    ShippingStatus, StatusActor, StatusKind,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Result of submitting payment. `payment_url` is present when the customer
/// must complete payment at the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentInitiation {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

/// Outcome reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentResult {
    #[serde(alias = "paid", alias = "Paid")]
    Paid,
    #[serde(alias = "failed", alias = "Failed")]
    Failed,
}

impl From<PaymentResult> for PaymentStatus {
    fn from(result: PaymentResult) -> Self {
        match result {
            PaymentResult::Paid => PaymentStatus::Paid,
            PaymentResult::Failed => PaymentStatus::Failed,
        }
    }
}

/// How an order's payment completes, chosen from the payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentFlow {
    /// Settled outside the processor (cash on delivery). The order id is the whole answer.
    Immediate,
    /// Completed at the processor; the customer is sent to a hosted page.
    Redirect,
}

impl PaymentFlow {
    pub fn for_method(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::CashOnDelivery => Self::Immediate,
            PaymentMethod::Wallet | PaymentMethod::Card => Self::Redirect,
        }
    }
}

#[derive(Clone)]
pub struct PaymentDispatcher {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    stock: StockReservationGuard,
    event_sender: Arc<EventSender>,
    locks: AccountLocks,
    timeout: Duration,
}

impl PaymentDispatcher {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        stock: StockReservationGuard,
        event_sender: Arc<EventSender>,
        locks: AccountLocks,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            stock,
            event_sender,
            locks,
            timeout,
        }
    }

    /// Turns a checkout session into an order on a dedicated task.
    ///
    /// The account guard moves into the task, so the account stays locked
    /// until the transaction has committed or rolled back even if the caller
    /// goes away.
    pub(crate) async fn submit(
        &self,
        guard: AccountGuard,
        session: checkout_session::Model,
        cart: CartSnapshot,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, ServiceError> {
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            dispatcher.finalize(session, cart, method).await
        });
        handle.await.map_err(|e| {
            error!(error = %e, "checkout finalization task failed");
            ServiceError::InternalError(format!("finalization task failed: {e}"))
        })?
    }

    #[instrument(skip(self, session, cart), fields(account_id = %session.account_id))]
    async fn finalize(
        &self,
        session: checkout_session::Model,
        cart: CartSnapshot,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, ServiceError> {
        let account_id = session.account_id;
        let address_id = session.address_id.ok_or(ServiceError::AddressNotSet {
            current: session.state,
        })?;
        let (delivery_method, shipping_fee_minor) = session
            .delivery_method
            .zip(session.shipping_fee_minor)
            .ok_or(ServiceError::ShippingNotSet {
                current: session.state,
            })?;

        let subtotal_minor = cart.subtotal_minor()?;
        let total_minor = subtotal_minor
            .checked_add(shipping_fee_minor)
            .ok_or_else(|| ServiceError::ValidationError("order total is too large".to_string()))?;
        let lines: Vec<StockLine> = cart
            .lines
            .iter()
            .map(|(item, _)| StockLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let units = self.stock.reserve(&txn, &lines).await?;

        order::ActiveModel {
            id: Set(order_id),
            account_id: Set(account_id),
            address_id: Set(address_id),
            subtotal_minor: Set(subtotal_minor),
            shipping_fee_minor: Set(shipping_fee_minor),
            total_minor: Set(total_minor),
            delivery_method: Set(delivery_method),
            pickup_store_id: Set(session.pickup_store_id),
            payment_method: Set(method),
            payment_status: Set(PaymentStatus::Pending),
            shipping_status: Set(ShippingStatus::Processing),
            payment_url: Set(None),
            payment_reference: Set(None),
            stock_released: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (position, (item, product)) in cart.lines.iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                quantity: Set(item.quantity),
                unit_price_minor: Set(product.price_minor),
                line_subtotal_minor: Set(money::line_total_minor(
                    product.price_minor,
                    item.quantity,
                )?),
                position: Set(i32::try_from(position).unwrap_or(i32::MAX)),
            }
            .insert(&txn)
            .await?;
        }

        record_transition(
            &txn,
            order_id,
            StatusKind::Shipping,
            None,
            ShippingStatus::Processing.to_string(),
            StatusActor::Customer,
            Some(account_id),
        )
        .await?;
        record_transition(
            &txn,
            order_id,
            StatusKind::Payment,
            None,
            PaymentStatus::Pending.to_string(),
            StatusActor::Customer,
            Some(account_id),
        )
        .await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::AccountId.eq(account_id))
            .exec(&txn)
            .await?;
        bump_cart(&txn, account_id, 0).await?;
        checkout_session::Entity::delete_by_id(account_id)
            .exec(&txn)
            .await?;

        let payment_url = match PaymentFlow::for_method(method) {
            PaymentFlow::Immediate => None,
            PaymentFlow::Redirect => {
                let url = self
                    .initiate(order_id, money::from_minor(total_minor), method)
                    .await?;
                set_payment_url(&txn, order_id, &url).await?;
                Some(url)
            }
        };

        txn.commit().await?;

        counter!("storefront_orders.created", 1, "payment_method" => method.to_string());
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                account_id,
                total_minor,
                payment_method: method,
            })
            .await;
        self.event_sender
            .send_or_log(Event::StockReserved { order_id, units })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                account_id,
                order_id,
            })
            .await;
        if let Some(url) = &payment_url {
            self.event_sender
                .send_or_log(Event::PaymentInitiated {
                    order_id,
                    payment_url: url.clone(),
                })
                .await;
        }

        info!(%order_id, %account_id, total_minor, %method, "order placed");
        Ok(PaymentInitiation {
            order_id,
            payment_url,
        })
    }

    /// Calls the processor, bounded by the configured timeout.
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, ServiceError> {
        match tokio::time::timeout(self.timeout, self.gateway.initiate(order_id, amount, method))
            .await
        {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(e)) => {
                counter!("storefront_payments.initiation_failures", 1, "reason" => "gateway");
                warn!(%order_id, error = %e, "payment initiation failed");
                Err(e.into_service_error(self.timeout))
            }
            Err(_) => {
                counter!("storefront_payments.initiation_failures", 1, "reason" => "timeout");
                warn!(%order_id, timeout_secs = self.timeout.as_secs(), "payment initiation timed out");
                Err(ServiceError::PaymentTimeout(self.timeout.as_secs()))
            }
        }
    }

    /// Applies a processor callback to the order's payment status.
    #[instrument(skip(self))]
    pub async fn handle_callback(
        &self,
        order_id: Uuid,
        result: PaymentResult,
        reference: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let owner = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?
            .account_id;
        let _guard = self.locks.acquire(owner).await;

        let txn = self.db.begin().await?;
        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let target = PaymentStatus::from(result);
        if PaymentFlow::for_method(order.payment_method) != PaymentFlow::Redirect {
            warn!(
                %order_id,
                method = %order.payment_method,
                result = %target,
                "payment callback for an order settled outside the processor rejected"
            );
            return Err(ServiceError::InvalidTransition {
                current: order.payment_status.to_string(),
                requested: target.to_string(),
            });
        }
        if order.shipping_status == ShippingStatus::Cancelled {
            warn!(%order_id, result = %target, "payment callback for a cancelled order ignored");
            return Ok(order);
        }

        let current = order.payment_status;
        if current == target {
            info!(%order_id, status = %current, "duplicate payment callback");
            return Ok(order);
        }
        if current != PaymentStatus::Pending {
            return Err(ServiceError::InvalidTransition {
                current: current.to_string(),
                requested: target.to_string(),
            });
        }

        // Goods past Processing have left the shelf; their units stay reserved.
        let release = target == PaymentStatus::Failed
            && order.shipping_status == ShippingStatus::Processing;
        if target == PaymentStatus::Failed && !release {
            warn!(
                %order_id,
                shipping_status = %order.shipping_status,
                "payment failed after fulfilment started; stock kept reserved"
            );
        }
        let released = if release {
            release_order_stock(&txn, &self.stock, &order).await?
        } else {
            0
        };
        let stock_released = order.stock_released || release;

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(target);
        active.stock_released = Set(stock_released);
        if reference.is_some() {
            active.payment_reference = Set(reference);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        record_transition(
            &txn,
            order_id,
            StatusKind::Payment,
            Some(current.to_string()),
            target.to_string(),
            StatusActor::PaymentProcessor,
            None,
        )
        .await?;
        txn.commit().await?;

        counter!("storefront_payments.callbacks", 1, "result" => target.to_string());
        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status: current,
                new_status: target,
            })
            .await;
        if released > 0 {
            self.event_sender
                .send_or_log(Event::StockReleased {
                    order_id,
                    units: released,
                })
                .await;
        }
        info!(%order_id, from = %current, to = %target, "payment status updated");
        Ok(updated)
    }

    /// Starts a new payment attempt for an order whose payment failed.
    #[instrument(skip(self))]
    pub async fn retry_payment(
        &self,
        account_id: Uuid,
        order_id: Uuid,
    ) -> Result<PaymentInitiation, ServiceError> {
        let guard = self.locks.acquire(account_id).await;
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            dispatcher.reinitiate(account_id, order_id).await
        });
        handle.await.map_err(|e| {
            error!(error = %e, "payment retry task failed");
            ServiceError::InternalError(format!("payment retry task failed: {e}"))
        })?
    }

    async fn reinitiate(
        &self,
        account_id: Uuid,
        order_id: Uuid,
    ) -> Result<PaymentInitiation, ServiceError> {
        let txn = self.db.begin().await?;
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::AccountId.eq(account_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_status != PaymentStatus::Failed
            || order.shipping_status != ShippingStatus::Processing
            || PaymentFlow::for_method(order.payment_method) != PaymentFlow::Redirect
        {
            return Err(ServiceError::InvalidTransition {
                current: order.payment_status.to_string(),
                requested: PaymentStatus::Pending.to_string(),
            });
        }

        let reserved = if order.stock_released {
            let items = load_items(&txn, order_id).await?;
            self.stock.reserve(&txn, &stock_lines(&items)).await?
        } else {
            0
        };

        let total = money::from_minor(order.total_minor);
        let method = order.payment_method;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Pending);
        active.stock_released = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        record_transition(
            &txn,
            order_id,
            StatusKind::Payment,
            Some(PaymentStatus::Failed.to_string()),
            PaymentStatus::Pending.to_string(),
            StatusActor::Customer,
            Some(account_id),
        )
        .await?;

        let url = self.initiate(order_id, total, method).await?;
        set_payment_url(&txn, order_id, &url).await?;
        txn.commit().await?;

        counter!("storefront_payments.retries", 1);
        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status: PaymentStatus::Failed,
                new_status: PaymentStatus::Pending,
            })
            .await;
        if reserved > 0 {
            self.event_sender
                .send_or_log(Event::StockReserved {
                    order_id,
                    units: reserved,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                order_id,
                payment_url: url.clone(),
            })
            .await;
        info!(%order_id, "payment retry initiated");
        Ok(PaymentInitiation {
            order_id,
            payment_url: Some(url),
        })
    }
}

async fn set_payment_url<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    url: &str,
) -> Result<(), ServiceError> {
    order::Entity::update_many()
        .col_expr(order::Column::PaymentUrl, Expr::value(url.to_string()))
        .filter(order::Column::Id.eq(order_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Returns the session if it has reached the payment step.
pub(crate) fn ensure_payment_ready(
    session: Option<checkout_session::Model>,
) -> Result<checkout_session::Model, ServiceError> {
    match session {
        None => Err(ServiceError::ShippingNotSet {
            current: CheckoutState::AddressPending,
        }),
        Some(s) if s.state < CheckoutState::PaymentPending || s.shipping_fee_minor.is_none() => {
            Err(ServiceError::ShippingNotSet { current: s.state })
        }
        Some(s) => Ok(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GatewayError, MockPaymentGateway};
    use crate::db::establish_connection;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    async fn dispatcher(gateway: MockPaymentGateway, timeout: Duration) -> PaymentDispatcher {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        let (tx, _rx) = mpsc::channel(16);
        PaymentDispatcher::new(
            Arc::new(db),
            Arc::new(gateway),
            StockReservationGuard::default(),
            Arc::new(EventSender::new(tx)),
            AccountLocks::new(),
            timeout,
        )
    }

    #[tokio::test]
    async fn initiate_maps_gateway_rejection() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initiate()
            .times(1)
            .returning(|_, _, _| Err(GatewayError::Rejected("card declined".into())));

        let err = dispatcher(gateway, Duration::from_secs(1))
            .await
            .initiate(Uuid::new_v4(), dec!(100), PaymentMethod::Card)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PaymentGateway(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn initiate_passes_amount_and_method() {
        let order_id = Uuid::new_v4();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initiate()
            .withf(move |id, amount, method| {
                *id == order_id && *amount == dec!(1150.00) && *method == PaymentMethod::Wallet
            })
            .returning(|_, _, _| Ok("https://pay.test/abc".to_string()));

        let url = dispatcher(gateway, Duration::from_secs(1))
            .await
            .initiate(order_id, dec!(1150.00), PaymentMethod::Wallet)
            .await
            .unwrap();
        assert_eq!(url, "https://pay.test/abc");
    }

    #[test]
    fn payment_requires_shipping_step() {
        assert!(matches!(
            ensure_payment_ready(None),
            Err(ServiceError::ShippingNotSet {
                current: CheckoutState::AddressPending
            })
        ));
    }

    #[test]
    fn only_cash_on_delivery_skips_the_processor() {
        assert_eq!(
            PaymentFlow::for_method(PaymentMethod::CashOnDelivery),
            PaymentFlow::Immediate
        );
        assert_eq!(PaymentFlow::for_method(PaymentMethod::Wallet), PaymentFlow::Redirect);
        assert_eq!(PaymentFlow::for_method(PaymentMethod::Card), PaymentFlow::Redirect);
    }

    #[test]
    fn callback_results_accept_lowercase() {
        let parsed: PaymentResult = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(parsed, PaymentResult::Paid);
        assert_eq!(PaymentStatus::from(PaymentResult::Failed), PaymentStatus::Failed);
    }
}
