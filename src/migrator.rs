//! Schema migrations, inline in the crate so `run_migrations` needs no
//! separate binary. The last migration installs the storage-level stock
//! guard: a trigger on invoice_items that re-runs the reservation check
//! inside the database, using the same predicate text as the application
//! layer, as defense-in-depth against writers that bypass the services.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_assets_table::Migration),
            Box::new(m20240101_000002_create_invoices_table::Migration),
            Box::new(m20240101_000003_create_invoice_items_table::Migration),
            Box::new(m20240101_000004_create_transactions_table::Migration),
            Box::new(m20240101_000005_create_invoice_returns_table::Migration),
            Box::new(m20240101_000006_create_return_items_table::Migration),
            Box::new(m20240101_000007_create_customer_credits_table::Migration),
            Box::new(m20240101_000008_create_credit_applications_table::Migration),
            Box::new(m20240101_000009_create_indexes::Migration),
            Box::new(m20240101_000010_create_stock_guard_trigger::Migration),
        ]
    }
}

mod m20240101_000001_create_assets_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_assets_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Assets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Assets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Assets::Sku).string().not_null())
                        .col(ColumnDef::new(Assets::Name).string().not_null())
                        .col(
                            ColumnDef::new(Assets::OnHand)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Assets::OnHand).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Assets::Status)
                                .string()
                                .not_null()
                                .default("in_stock"),
                        )
                        .col(ColumnDef::new(Assets::ConditionOverride).string().null())
                        .col(
                            ColumnDef::new(Assets::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Assets::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Assets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Assets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Assets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Assets {
        Table,
        Id,
        Sku,
        Name,
        OnHand,
        Status,
        ConditionOverride,
        UnitPrice,
        Currency,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_invoices_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_invoices_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::InvoiceNumber).string().not_null())
                        .col(ColumnDef::new(Invoices::CustomerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Invoices::Status)
                                .string()
                                .not_null()
                                .default("unpaid"),
                        )
                        .col(ColumnDef::new(Invoices::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Invoices::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::AmountPaid)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::BalanceDue)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_invoices_invoice_number")
                        .table(Invoices::Table)
                        .col(Invoices::InvoiceNumber)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Invoices {
        Table,
        Id,
        InvoiceNumber,
        CustomerId,
        Status,
        Currency,
        TotalAmount,
        AmountPaid,
        BalanceDue,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240101_000003_create_invoice_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_invoice_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InvoiceItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(InvoiceItems::AssetId).uuid().not_null())
                        .col(
                            ColumnDef::new(InvoiceItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(InvoiceItems::Quantity).gte(1)),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::LineTotal)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::QuantityReturnedTotal)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::VoidedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::VoidedBy).string().null())
                        .col(
                            ColumnDef::new(InvoiceItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_items_invoice_id")
                                .from(InvoiceItems::Table, InvoiceItems::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_items_asset_id")
                                .from(InvoiceItems::Table, InvoiceItems::AssetId)
                                .to(Assets::Table, Assets::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoiceItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum InvoiceItems {
        Table,
        Id,
        InvoiceId,
        AssetId,
        Quantity,
        UnitPrice,
        LineTotal,
        QuantityReturnedTotal,
        VoidedAt,
        VoidedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Assets {
        Table,
        Id,
    }
}

mod m20240101_000004_create_transactions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::InvoiceId).uuid().not_null())
                        .col(
                            ColumnDef::new(Transactions::TransactionType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::Amount)
                                .decimal_len(16, 4)
                                .not_null()
                                .check(Expr::col(Transactions::Amount).gt(0)),
                        )
                        .col(ColumnDef::new(Transactions::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Transactions::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::OtherMethodNote)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Transactions::Comment).text().not_null())
                        .col(ColumnDef::new(Transactions::ReturnId).uuid().null())
                        .col(
                            ColumnDef::new(Transactions::VoidedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Transactions::VoidedBy).string().null())
                        .col(ColumnDef::new(Transactions::VoidReason).text().null())
                        .col(
                            ColumnDef::new(Transactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transactions_invoice_id")
                                .from(Transactions::Table, Transactions::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Transactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Transactions {
        Table,
        Id,
        InvoiceId,
        TransactionType,
        Amount,
        Currency,
        PaymentMethod,
        OtherMethodNote,
        Comment,
        ReturnId,
        VoidedAt,
        VoidedBy,
        VoidReason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
    }
}

mod m20240101_000005_create_invoice_returns_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_invoice_returns_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InvoiceReturns::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceReturns::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceReturns::InvoiceId).uuid().not_null())
                        .col(
                            ColumnDef::new(InvoiceReturns::Status)
                                .string()
                                .not_null()
                                .default("draft"),
                        )
                        .col(
                            ColumnDef::new(InvoiceReturns::ReturnType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceReturns::RestockCondition)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceReturns::RefundAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InvoiceReturns::Currency).string().not_null())
                        .col(
                            ColumnDef::new(InvoiceReturns::FinalizedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceReturns::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceReturns::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_returns_invoice_id")
                                .from(InvoiceReturns::Table, InvoiceReturns::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoiceReturns::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum InvoiceReturns {
        Table,
        Id,
        InvoiceId,
        Status,
        ReturnType,
        RestockCondition,
        RefundAmount,
        Currency,
        FinalizedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
    }
}

mod m20240101_000006_create_return_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_return_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnItems::ReturnId).uuid().not_null())
                        .col(
                            ColumnDef::new(ReturnItems::InvoiceItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnItems::AssetId).uuid().not_null())
                        .col(
                            ColumnDef::new(ReturnItems::QuantityReturned)
                                .integer()
                                .not_null()
                                .check(Expr::col(ReturnItems::QuantityReturned).gte(1)),
                        )
                        .col(
                            ColumnDef::new(ReturnItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_items_return_id")
                                .from(ReturnItems::Table, ReturnItems::ReturnId)
                                .to(InvoiceReturns::Table, InvoiceReturns::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_items_invoice_item_id")
                                .from(ReturnItems::Table, ReturnItems::InvoiceItemId)
                                .to(InvoiceItems::Table, InvoiceItems::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum ReturnItems {
        Table,
        Id,
        ReturnId,
        InvoiceItemId,
        AssetId,
        QuantityReturned,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InvoiceReturns {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum InvoiceItems {
        Table,
        Id,
    }
}

mod m20240101_000007_create_customer_credits_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_customer_credits_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CustomerCredits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CustomerCredits::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::CustomerId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::SourceReturnId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::OriginalAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::RemainingAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .check(Expr::col(CustomerCredits::RemainingAmount).gte(0)),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::Currency)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerCredits::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CustomerCredits::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum CustomerCredits {
        Table,
        Id,
        CustomerId,
        SourceReturnId,
        OriginalAmount,
        RemainingAmount,
        Currency,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000008_create_credit_applications_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000008_create_credit_applications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CreditApplications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CreditApplications::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::CreditId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::InvoiceId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::TransactionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::Amount)
                                .decimal_len(16, 4)
                                .not_null()
                                .check(Expr::col(CreditApplications::Amount).gt(0)),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::VoidedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::VoidedBy)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CreditApplications::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_credit_applications_credit_id")
                                .from(CreditApplications::Table, CreditApplications::CreditId)
                                .to(CustomerCredits::Table, CustomerCredits::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_credit_applications_invoice_id")
                                .from(CreditApplications::Table, CreditApplications::InvoiceId)
                                .to(Invoices::Table, Invoices::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CreditApplications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum CreditApplications {
        Table,
        Id,
        CreditId,
        InvoiceId,
        TransactionId,
        Amount,
        VoidedAt,
        VoidedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CustomerCredits {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
    }
}

mod m20240101_000009_create_indexes {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000009_create_indexes"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // The reserved-sum join is the hottest query in the system; both
            // lookup directions get covered.
            manager
                .create_index(
                    Index::create()
                        .name("idx_invoice_items_asset_id")
                        .table(Alias::new("invoice_items"))
                        .col(Alias::new("asset_id"))
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_invoice_items_invoice_id")
                        .table(Alias::new("invoice_items"))
                        .col(Alias::new("invoice_id"))
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_transactions_invoice_id")
                        .table(Alias::new("transactions"))
                        .col(Alias::new("invoice_id"))
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_return_items_return_id")
                        .table(Alias::new("return_items"))
                        .col(Alias::new("return_id"))
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_credit_applications_credit_id")
                        .table(Alias::new("credit_applications"))
                        .col(Alias::new("credit_id"))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for name in [
                "idx_invoice_items_asset_id",
                "idx_invoice_items_invoice_id",
                "idx_transactions_invoice_id",
                "idx_return_items_return_id",
                "idx_credit_applications_credit_id",
            ] {
                manager
                    .drop_index(Index::drop().name(name).to_owned())
                    .await?;
            }
            Ok(())
        }
    }
}

mod m20240101_000010_create_stock_guard_trigger {
    use sea_orm_migration::prelude::*;

    use crate::services::availability::ACTIVE_RESERVATION_PREDICATE;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000010_create_stock_guard_trigger"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let conn = manager.get_connection();
            match manager.get_database_backend() {
                sea_orm::DbBackend::Postgres => {
                    conn.execute_unprepared(&postgres_function_sql()).await?;
                    conn.execute_unprepared(
                        "CREATE TRIGGER trg_invoice_items_stock_guard \
                         AFTER INSERT OR UPDATE OF quantity, voided_at, invoice_id \
                         ON invoice_items \
                         FOR EACH ROW EXECUTE FUNCTION invoice_items_stock_guard()",
                    )
                    .await?;
                }
                _ => {
                    conn.execute_unprepared(&sqlite_trigger_sql(
                        "trg_invoice_items_stock_guard_insert",
                        "AFTER INSERT ON invoice_items",
                    ))
                    .await?;
                    conn.execute_unprepared(&sqlite_trigger_sql(
                        "trg_invoice_items_stock_guard_update",
                        "AFTER UPDATE OF quantity, voided_at, invoice_id ON invoice_items",
                    ))
                    .await?;
                }
            }
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let conn = manager.get_connection();
            match manager.get_database_backend() {
                sea_orm::DbBackend::Postgres => {
                    conn.execute_unprepared(
                        "DROP TRIGGER IF EXISTS trg_invoice_items_stock_guard ON invoice_items",
                    )
                    .await?;
                    conn.execute_unprepared("DROP FUNCTION IF EXISTS invoice_items_stock_guard()")
                        .await?;
                }
                _ => {
                    conn.execute_unprepared(
                        "DROP TRIGGER IF EXISTS trg_invoice_items_stock_guard_insert",
                    )
                    .await?;
                    conn.execute_unprepared(
                        "DROP TRIGGER IF EXISTS trg_invoice_items_stock_guard_update",
                    )
                    .await?;
                }
            }
            Ok(())
        }
    }

    /// Plpgsql function performing the same lock-and-recompute as the
    /// application guard, with the same predicate text.
    fn postgres_function_sql() -> String {
        format!(
            "CREATE OR REPLACE FUNCTION invoice_items_stock_guard() RETURNS trigger AS $guard$ \
             DECLARE \
                 asset_on_hand integer; \
                 active_reserved bigint; \
             BEGIN \
                 IF NEW.voided_at IS NOT NULL THEN \
                     RETURN NEW; \
                 END IF; \
                 SELECT on_hand INTO asset_on_hand FROM assets WHERE id = NEW.asset_id FOR UPDATE; \
                 IF asset_on_hand IS NULL THEN \
                     RAISE EXCEPTION 'INSUFFICIENT_STOCK: unknown asset %', NEW.asset_id; \
                 END IF; \
                 SELECT COALESCE(SUM(ii.quantity), 0) INTO active_reserved \
                 FROM invoice_items ii \
                 INNER JOIN invoices inv ON inv.id = ii.invoice_id \
                 WHERE ii.asset_id = NEW.asset_id AND {predicate}; \
                 IF active_reserved > asset_on_hand THEN \
                     RAISE EXCEPTION 'INSUFFICIENT_STOCK: asset % reserved % exceeds on-hand %', \
                         NEW.asset_id, active_reserved, asset_on_hand; \
                 END IF; \
                 RETURN NEW; \
             END; \
             $guard$ LANGUAGE plpgsql",
            predicate = ACTIVE_RESERVATION_PREDICATE,
        )
    }

    fn sqlite_trigger_sql(name: &str, event: &str) -> String {
        format!(
            "CREATE TRIGGER {name} \
             {event} \
             WHEN NEW.voided_at IS NULL \
             BEGIN \
                 SELECT RAISE(ABORT, 'INSUFFICIENT_STOCK: active reservations exceed on-hand') \
                 WHERE ( \
                     SELECT COALESCE(SUM(ii.quantity), 0) \
                     FROM invoice_items ii \
                     INNER JOIN invoices inv ON inv.id = ii.invoice_id \
                     WHERE ii.asset_id = NEW.asset_id AND {predicate} \
                 ) > (SELECT on_hand FROM assets WHERE id = NEW.asset_id); \
             END",
            name = name,
            event = event,
            predicate = ACTIVE_RESERVATION_PREDICATE,
        )
    }
}
