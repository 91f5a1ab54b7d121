use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Progress of an account's checkout.
///
/// Only the three pending states are ever persisted: a session row is deleted
/// when checkout completes or is abandoned.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutState {
    #[sea_orm(string_value = "ADDRESS_PENDING")]
    AddressPending,
    #[sea_orm(string_value = "SHIPPING_PENDING")]
    ShippingPending,
    #[sea_orm(string_value = "PAYMENT_PENDING")]
    PaymentPending,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "ABANDONED")]
    Abandoned,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    #[sea_orm(string_value = "STANDARD_DELIVERY")]
    #[serde(alias = "Standard Delivery", alias = "STANDARD")]
    StandardDelivery,
    #[sea_orm(string_value = "PRIORITY_DELIVERY")]
    #[serde(alias = "Priority Delivery", alias = "PRIORITY")]
    PriorityDelivery,
    #[sea_orm(string_value = "PICKUP_DELIVERY")]
    #[serde(alias = "Pickup Delivery", alias = "PICKUP")]
    PickupDelivery,
}

impl DeliveryMethod {
    pub fn is_pickup(self) -> bool {
        matches!(self, Self::PickupDelivery)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "CASH_ON_DELIVERY")]
    #[serde(alias = "Cash on delivery (COD)", alias = "COD")]
    CashOnDelivery,
    #[sea_orm(string_value = "WALLET")]
    #[serde(alias = "Maya")]
    Wallet,
    #[sea_orm(string_value = "CARD")]
    #[serde(alias = "Credit/Debit Card")]
    Card,
}

impl PaymentMethod {
    /// Wallet and card payments complete out of band at the payment processor.
    pub fn requires_redirect(self) -> bool {
        !matches!(self, Self::CashOnDelivery)
    }
}

/// Active checkout session, at most one per account.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: Uuid,
    pub id: Uuid,
    /// Cart revision the latest accepted step was validated against.
    pub cart_revision: i64,
    #[sea_orm(nullable)]
    pub address_id: Option<i32>,
    #[sea_orm(nullable)]
    pub delivery_method: Option<DeliveryMethod>,
    #[sea_orm(nullable)]
    pub pickup_store_id: Option<i32>,
    #[sea_orm(nullable)]
    pub shipping_fee_minor: Option<i64>,
    #[sea_orm(nullable)]
    pub payment_method: Option<PaymentMethod>,
    pub state: CheckoutState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
