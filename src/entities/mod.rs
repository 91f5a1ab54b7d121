//! Persistence model for the storefront.
//!
//! Money columns hold integer minor units (centavos); conversion to
//! [`rust_decimal::Decimal`] happens in [`crate::common::money`].

pub mod address;
pub mod cart;
pub mod cart_item;
pub mod checkout_session;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod product;
pub mod province;
pub mod store;

pub use checkout_session::{CheckoutState, DeliveryMethod, PaymentMethod};
pub use order::{PaymentStatus, ShippingStatus};
pub use order_status_history::{StatusActor, StatusKind};
