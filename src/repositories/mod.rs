//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities. `ActiveModel` values never leave this layer; list
//! operations use keyset pagination with a `limit + 1` overflow probe.

pub mod connection;
pub mod credential_envelope;
pub mod mirrored_record;
pub mod sync_state;

pub use connection::ConnectionRepository;
pub use credential_envelope::CredentialEnvelopeRepository;
pub use mirrored_record::{MirroredRecordRepository, RecordUpsert, UpsertStats};
pub use sync_state::SyncStateRepository;
