pub mod account_locks;
pub mod cart;
pub mod checkout;
pub mod order_lifecycle;
pub mod payment;
pub mod shipping;
pub mod stock;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::collaborators::{
    AddressBook, Catalog, DbAddressBook, DbCatalog, DbGeography, DbStoreDirectory, Geography,
    PaymentGateway, StoreDirectory,
};
use crate::config::AppConfig;
use crate::events::EventSender;

pub use account_locks::AccountLocks;
pub use cart::{CartLine, CartService, CartView};
pub use checkout::{CheckoutDetails, CheckoutService};
pub use order_lifecycle::{
    is_valid_admin_transition, OrderDetails, OrderFilter, OrderLifecycleService, OrderStats,
    OrderSummary, StatusHistoryEntry,
};
pub use payment::{PaymentDispatcher, PaymentInitiation, PaymentResult};
pub use shipping::{ShippingFeeCalculator, ShippingRateTable};
pub use stock::{StockLine, StockReservationGuard};

/// External systems the services are wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub addresses: Arc<dyn AddressBook>,
    pub geography: Arc<dyn Geography>,
    pub stores: Arc<dyn StoreDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl Collaborators {
    /// Reference data read from the storefront database, payments through `gateway`.
    pub fn from_database(db: Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            catalog: Arc::new(DbCatalog::new(db.clone())),
            addresses: Arc::new(DbAddressBook::new(db.clone())),
            geography: Arc::new(DbGeography::new(db.clone())),
            stores: Arc::new(DbStoreDirectory::new(db)),
            gateway,
        }
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentDispatcher>,
    pub orders: Arc<OrderLifecycleService>,
    pub catalog: Arc<dyn Catalog>,
    pub stores: Arc<dyn StoreDirectory>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        collaborators: Collaborators,
    ) -> Self {
        let locks = AccountLocks::new();
        let stock = StockReservationGuard::default();

        let cart = CartService::new(
            db.clone(),
            collaborators.catalog.clone(),
            event_sender.clone(),
            locks.clone(),
        );
        let payments = PaymentDispatcher::new(
            db.clone(),
            collaborators.gateway.clone(),
            stock.clone(),
            event_sender.clone(),
            locks.clone(),
            config.payment.timeout(),
        );
        let checkout = CheckoutService::new(
            db.clone(),
            cart.clone(),
            collaborators.addresses.clone(),
            collaborators.geography.clone(),
            collaborators.stores.clone(),
            ShippingFeeCalculator::new(ShippingRateTable::from(&config.shipping)),
            payments.clone(),
            event_sender.clone(),
            locks.clone(),
        );
        let orders = OrderLifecycleService::new(
            db,
            collaborators.catalog.clone(),
            stock,
            event_sender,
            locks,
            config.api_max_page_size,
        );

        Self {
            cart: Arc::new(cart),
            checkout: Arc::new(checkout),
            payments: Arc::new(payments),
            orders: Arc::new(orders),
            catalog: collaborators.catalog,
            stores: collaborators.stores,
        }
    }
}
