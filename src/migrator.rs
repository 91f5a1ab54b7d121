use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_reference_tables::Migration),
            Box::new(m20240601_000002_create_cart_tables::Migration),
            Box::new(m20240601_000003_create_checkout_sessions_table::Migration),
            Box::new(m20240601_000004_create_order_tables::Migration),
        ]
    }
}

// Catalog, store directory, geography and address book. These are owned by
// other services in production; the tables exist here so the collaborators
// have a local backing store.
mod m20240601_000001_create_reference_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_reference_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::PriceMinor).big_integer().not_null())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Stores::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Stores::Id).integer().primary_key().not_null())
                        .col(ColumnDef::new(Stores::Name).string().not_null())
                        .col(
                            ColumnDef::new(Stores::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Provinces::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Provinces::Id)
                                .integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Provinces::Name).string().not_null())
                        .col(ColumnDef::new(Provinces::Zone).string_len(32).null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Addresses::Id)
                                .integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Addresses::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Addresses::ProvinceId).integer().not_null())
                        .col(ColumnDef::new(Addresses::CityId).integer().not_null())
                        .col(ColumnDef::new(Addresses::BarangayId).integer().not_null())
                        .col(ColumnDef::new(Addresses::Line).string().not_null())
                        .col(ColumnDef::new(Addresses::Phone).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Addresses::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_addresses_account_id")
                        .table(Addresses::Table)
                        .col(Addresses::AccountId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Provinces::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Stores::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Name,
        PriceMinor,
        Stock,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Stores {
        Table,
        Id,
        Name,
        Active,
    }

    #[derive(DeriveIden)]
    enum Provinces {
        Table,
        Id,
        Name,
        Zone,
    }

    #[derive(DeriveIden)]
    enum Addresses {
        Table,
        Id,
        AccountId,
        ProvinceId,
        CityId,
        BarangayId,
        Line,
        Phone,
        IsDefault,
    }
}

mod m20240601_000002_create_cart_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Carts::AccountId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::SubtotalMinor)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Carts::Revision)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::AccountId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(CartItems::Position).big_integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(CartItems::AccountId)
                                .col(CartItems::ProductId),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        AccountId,
        SubtotalMinor,
        Revision,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        AccountId,
        ProductId,
        Quantity,
        Position,
        CreatedAt,
    }
}

mod m20240601_000003_create_checkout_sessions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_checkout_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutSessions::AccountId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::Id).uuid().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::CartRevision)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::AddressId).integer().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::DeliveryMethod)
                                .string_len(32)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::PickupStoreId)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::ShippingFeeMinor)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::PaymentMethod)
                                .string_len(32)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::State)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CheckoutSessions {
        Table,
        AccountId,
        Id,
        CartRevision,
        AddressId,
        DeliveryMethod,
        PickupStoreId,
        ShippingFeeMinor,
        PaymentMethod,
        State,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Orders::AddressId).integer().not_null())
                        .col(ColumnDef::new(Orders::SubtotalMinor).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingFeeMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::TotalMinor).big_integer().not_null())
                        .col(ColumnDef::new(Orders::DeliveryMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PickupStoreId).integer().null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::ShippingStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentUrl).string().null())
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(
                            ColumnDef::new(Orders::StockReleased)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_account_id")
                        .table(Orders::Table)
                        .col(Orders::AccountId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_shipping_status")
                        .table(Orders::Table)
                        .col(Orders::ShippingStatus)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::LineSubtotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Position).integer().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderStatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatusHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::Sequence)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::Kind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::FromStatus)
                                .string_len(32)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::ToStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::Actor)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::AccountId).uuid().null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_status_history_order_sequence")
                        .table(OrderStatusHistory::Table)
                        .col(OrderStatusHistory::OrderId)
                        .col(OrderStatusHistory::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStatusHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        AccountId,
        AddressId,
        SubtotalMinor,
        ShippingFeeMinor,
        TotalMinor,
        DeliveryMethod,
        PickupStoreId,
        PaymentMethod,
        PaymentStatus,
        ShippingStatus,
        PaymentUrl,
        PaymentReference,
        StockReleased,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductName,
        Quantity,
        UnitPriceMinor,
        LineSubtotalMinor,
        Position,
    }

    #[derive(DeriveIden)]
    enum OrderStatusHistory {
        Table,
        Id,
        OrderId,
        Sequence,
        Kind,
        FromStatus,
        ToStatus,
        Actor,
        AccountId,
        CreatedAt,
    }
}

/// Connects to `db_url` and applies all pending migrations.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
