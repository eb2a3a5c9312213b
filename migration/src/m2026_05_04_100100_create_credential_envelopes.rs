//! Migration to create the credential_envelopes table.
//!
//! One row per connection holding the authenticated-encryption envelope for
//! that connection's third-party secret, plus a non-reversible masked
//! preview for display. Plaintext never persists.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CredentialEnvelopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CredentialEnvelopes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::ConnectionId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::Envelope)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::MaskedPreview)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::RotatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CredentialEnvelopes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credential_envelopes_connection_id")
                            .from(
                                CredentialEnvelopes::Table,
                                CredentialEnvelopes::ConnectionId,
                            )
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CredentialEnvelopes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CredentialEnvelopes {
    Table,
    Id,
    ConnectionId,
    Envelope,
    MaskedPreview,
    ExpiresAt,
    RotatedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
