//! Migration to create the connections table.
//!
//! A connection is the durable record of one owner being linked to one
//! external third-party account, with status and non-secret metadata.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(Connections::ProviderKey).text().not_null())
                    .col(ColumnDef::new(Connections::DisplayName).text().null())
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("connected"),
                    )
                    .col(
                        ColumnDef::new(Connections::IsDefault)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Connections::LastError).text().null())
                    .col(
                        ColumnDef::new(Connections::LastActivityAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connections::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup index for the connect/reconnect path and owner dashboards
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_owner_provider")
                    .table(Connections::Table)
                    .col(Connections::OwnerId)
                    .col(Connections::ProviderKey)
                    .to_owned(),
            )
            .await?;

        // Scheduler candidate scans filter on status
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_status")
                    .table(Connections::Table)
                    .col(Connections::Status)
                    .to_owned(),
            )
            .await?;

        // At most one default connection per (owner, provider); partial
        // indexes need raw SQL on both backends
        let backend = manager.get_database_backend();
        manager
            .get_connection()
            .execute(Statement::from_string(
                backend,
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_default_guard \
                 ON connections (owner_id, provider_key) \
                 WHERE is_default"
                    .to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .get_connection()
            .execute(Statement::from_string(
                backend,
                "DROP INDEX IF EXISTS idx_connections_default_guard".to_string(),
            ))
            .await?;

        manager
            .drop_index(Index::drop().name("idx_connections_owner_provider").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_connections_status").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    OwnerId,
    ProviderKey,
    DisplayName,
    Status,
    IsDefault,
    LastError,
    LastActivityAt,
    LastSyncedAt,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
