//! Checkout session state machine.
//!
//! A session moves AddressPending → ShippingPending → PaymentPending and is
//! deleted once the order is placed or checkout is abandoned. Reads never
//! create a session.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::account_locks::AccountLocks;
use super::cart::{abandon_session, CartService};
use super::payment::{ensure_payment_ready, PaymentDispatcher, PaymentInitiation};
use super::shipping::ShippingFeeCalculator;
use crate::collaborators::{AddressBook, Geography, StoreDirectory};
use crate::common::money;
use crate::entities::{checkout_session, CheckoutState, DeliveryMethod, PaymentMethod};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Furthest step reached plus the stored selections and live totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutDetails {
    pub state: CheckoutState,
    pub address_id: Option<i32>,
    pub delivery_method: Option<DeliveryMethod>,
    pub pickup_store_id: Option<i32>,
    pub payment_method: Option<PaymentMethod>,
    pub subtotal: Decimal,
    pub shipping_fee: Option<Decimal>,
    /// `subtotal + shipping_fee`, once the fee is known
    pub total: Option<Decimal>,
}

impl CheckoutDetails {
    fn new(session: Option<&checkout_session::Model>, subtotal: Decimal) -> Self {
        let shipping_fee = session
            .and_then(|s| s.shipping_fee_minor)
            .map(money::from_minor);
        Self {
            state: session.map_or(CheckoutState::AddressPending, |s| s.state),
            address_id: session.and_then(|s| s.address_id),
            delivery_method: session.and_then(|s| s.delivery_method),
            pickup_store_id: session.and_then(|s| s.pickup_store_id),
            payment_method: session.and_then(|s| s.payment_method),
            subtotal,
            shipping_fee,
            total: shipping_fee.map(|fee| subtotal + fee),
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    cart: CartService,
    addresses: Arc<dyn AddressBook>,
    geography: Arc<dyn Geography>,
    stores: Arc<dyn StoreDirectory>,
    calculator: ShippingFeeCalculator,
    payments: PaymentDispatcher,
    event_sender: Arc<EventSender>,
    locks: AccountLocks,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        cart: CartService,
        addresses: Arc<dyn AddressBook>,
        geography: Arc<dyn Geography>,
        stores: Arc<dyn StoreDirectory>,
        calculator: ShippingFeeCalculator,
        payments: PaymentDispatcher,
        event_sender: Arc<EventSender>,
        locks: AccountLocks,
    ) -> Self {
        Self {
            db,
            cart,
            addresses,
            geography,
            stores,
            calculator,
            payments,
            event_sender,
            locks,
        }
    }

    async fn load_session(
        &self,
        account_id: Uuid,
    ) -> Result<Option<checkout_session::Model>, ServiceError> {
        Ok(checkout_session::Entity::find_by_id(account_id)
            .one(&*self.db)
            .await?)
    }

    /// Fee for delivering to `address_id` with `method`.
    async fn fee_for(
        &self,
        address_id: i32,
        method: DeliveryMethod,
        pickup_store_id: Option<i32>,
    ) -> Result<Decimal, ServiceError> {
        if method.is_pickup() {
            let stores = self.stores.list_stores().await?;
            return self
                .calculator
                .compute_fee(None, address_id, method, pickup_store_id, &stores);
        }
        let zone = self.geography.zone_for(address_id).await?;
        self.calculator
            .compute_fee(zone.as_deref(), address_id, method, pickup_store_id, &[])
    }

    #[instrument(skip(self))]
    pub async fn details(&self, account_id: Uuid) -> Result<CheckoutDetails, ServiceError> {
        let session = self.load_session(account_id).await?;
        let subtotal = self.cart.view(account_id).await?.subtotal;
        Ok(CheckoutDetails::new(session.as_ref(), subtotal))
    }

    /// Selects the delivery address, starting a session if none is active.
    #[instrument(skip(self))]
    pub async fn set_address(
        &self,
        account_id: Uuid,
        address_id: i32,
    ) -> Result<CheckoutDetails, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let cart = self.cart.snapshot(account_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        self.addresses
            .get_address(address_id, account_id)
            .await?
            .ok_or(ServiceError::AddressNotOwned(address_id))?;

        let session = self.load_session(account_id).await?;

        // A home delivery already chosen is re-priced for the new address.
        let recomputed_fee = match session
            .as_ref()
            .and_then(|s| s.delivery_method)
            .filter(|m| !m.is_pickup())
        {
            Some(method) => Some(money::to_minor(self.fee_for(address_id, method, None).await?)?),
            None => None,
        };

        let now = Utc::now();
        let saved = match session {
            Some(existing) => {
                let state = existing.state.max(CheckoutState::ShippingPending);
                let mut active: checkout_session::ActiveModel = existing.into();
                active.address_id = Set(Some(address_id));
                if let Some(fee) = recomputed_fee {
                    active.shipping_fee_minor = Set(Some(fee));
                }
                active.state = Set(state);
                active.cart_revision = Set(cart.revision);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                checkout_session::ActiveModel {
                    account_id: Set(account_id),
                    id: Set(Uuid::new_v4()),
                    cart_revision: Set(cart.revision),
                    address_id: Set(Some(address_id)),
                    delivery_method: Set(None),
                    pickup_store_id: Set(None),
                    shipping_fee_minor: Set(None),
                    payment_method: Set(None),
                    state: Set(CheckoutState::ShippingPending),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        self.event_sender
            .send_or_log(Event::CheckoutAddressSelected {
                account_id,
                address_id,
            })
            .await;
        info!(%account_id, address_id, state = %saved.state, "checkout address selected");
        Ok(CheckoutDetails::new(Some(&saved), money::from_minor(cart.subtotal_minor()?)))
    }

    /// Selects the delivery method and stores the resulting fee.
    #[instrument(skip(self))]
    pub async fn set_shipping(
        &self,
        account_id: Uuid,
        method: DeliveryMethod,
        pickup_store_id: Option<i32>,
    ) -> Result<CheckoutDetails, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let session = self.load_session(account_id).await?;
        let (session, address_id) = match session {
            Some(s) => match s.address_id {
                Some(address_id) => (s, address_id),
                None => return Err(ServiceError::AddressNotSet { current: s.state }),
            },
            None => {
                return Err(ServiceError::AddressNotSet {
                    current: CheckoutState::AddressPending,
                })
            }
        };

        let cart = self.cart.snapshot(account_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let fee = money::to_minor(self.fee_for(address_id, method, pickup_store_id).await?)?;
        let state = session.state.max(CheckoutState::PaymentPending);

        let mut active: checkout_session::ActiveModel = session.into();
        active.delivery_method = Set(Some(method));
        active.pickup_store_id = Set(pickup_store_id.filter(|_| method.is_pickup()));
        active.shipping_fee_minor = Set(Some(fee));
        active.state = Set(state);
        active.cart_revision = Set(cart.revision);
        active.updated_at = Set(Utc::now());
        let saved = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CheckoutShippingSelected {
                account_id,
                delivery_method: method,
                shipping_fee_minor: fee,
            })
            .await;
        info!(%account_id, %method, fee_minor = fee, "checkout delivery method selected");
        Ok(CheckoutDetails::new(Some(&saved), money::from_minor(cart.subtotal_minor()?)))
    }

    /// Read-only fee quote. The session is not touched.
    #[instrument(skip(self))]
    pub async fn quote_shipping(
        &self,
        account_id: Uuid,
        address_id: i32,
        method: DeliveryMethod,
        pickup_store_id: Option<i32>,
    ) -> Result<Decimal, ServiceError> {
        self.addresses
            .get_address(address_id, account_id)
            .await?
            .ok_or(ServiceError::AddressNotOwned(address_id))?;
        let fee = self.fee_for(address_id, method, pickup_store_id).await?;
        Ok(money::from_minor(money::to_minor(fee)?))
    }

    /// Places the order and, for wallet and card, hands off to the processor.
    #[instrument(skip(self))]
    pub async fn set_payment(
        &self,
        account_id: Uuid,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, ServiceError> {
        let guard = self.locks.acquire(account_id).await;

        let mut session = ensure_payment_ready(self.load_session(account_id).await?)?;

        let cart = self.cart.snapshot(account_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        session.payment_method = Some(method);
        self.payments.submit(guard, session, cart, method).await
    }

    /// Drops the active session, if any.
    #[instrument(skip(self))]
    pub async fn abandon(&self, account_id: Uuid) -> Result<CheckoutDetails, ServiceError> {
        let _guard = self.locks.acquire(account_id).await;

        let existed = abandon_session(&*self.db, account_id).await?;
        if existed {
            self.event_sender
                .send_or_log(Event::CheckoutAbandoned(account_id))
                .await;
            info!(%account_id, "checkout abandoned");
        }

        let subtotal = self.cart.view(account_id).await?.subtotal;
        Ok(CheckoutDetails {
            state: CheckoutState::Abandoned,
            ..CheckoutDetails::new(None, subtotal)
        })
    }
}
