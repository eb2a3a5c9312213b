//! Database migrations for the Syncline service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_05_04_100000_create_connections;
mod m2026_05_04_100100_create_credential_envelopes;
mod m2026_05_04_100200_create_sync_states;
mod m2026_05_04_100300_create_mirrored_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_05_04_100000_create_connections::Migration),
            Box::new(m2026_05_04_100100_create_credential_envelopes::Migration),
            Box::new(m2026_05_04_100200_create_sync_states::Migration),
            Box::new(m2026_05_04_100300_create_mirrored_records::Migration),
        ]
    }
}
