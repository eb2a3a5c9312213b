//! Migration to create the mirrored_records table.
//!
//! Externally sourced entities (videos, orders) mirrored per connection,
//! keyed by the upstream's immutable identifier so repeated syncs update in
//! place instead of duplicating.

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
                    .table(MirroredRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MirroredRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MirroredRecords::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MirroredRecords::ExternalId).text().not_null())
                    .col(ColumnDef::new(MirroredRecords::Kind).text().not_null())
                    .col(
                        ColumnDef::new(MirroredRecords::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MirroredRecords::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MirroredRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MirroredRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mirrored_records_connection_id")
                            .from(MirroredRecords::Table, MirroredRecords::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The idempotent upsert key
        manager
            .create_index(
                Index::create()
                    .name("uq_mirrored_records_connection_external")
                    .table(MirroredRecords::Table)
                    .col(MirroredRecords::ConnectionId)
                    .col(MirroredRecords::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Keyset listing newest-first needs a composite with DESC, raw SQL
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_mirrored_records_connection_updated ON mirrored_records (connection_id, updated_at DESC, id DESC)".to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_mirrored_records_connection_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_mirrored_records_connection_updated")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MirroredRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MirroredRecords {
    Table,
    Id,
    ConnectionId,
    ExternalId,
    Kind,
    Payload,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
