pub mod admin;
pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod stores;
