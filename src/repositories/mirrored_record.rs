//! Mirrored record repository
//!
//! Storage for externally sourced records. The upsert is idempotent on
//! `(connection_id, external_id)`: new ids insert, changed payloads update in
//! place, identical payloads are left untouched. Upstream deletions are soft
//! deletes via `deleted_at`.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::mirrored_record::{self, Entity as MirroredRecord};

/// One record as normalized by a provider client, ready to apply
#[derive(Debug, Clone)]
pub struct RecordUpsert {
    /// Upstream's immutable identifier
    pub external_id: String,
    /// Provider record category ("video", "order", ...)
    pub kind: String,
    /// Normalized record body
    pub payload: JsonValue,
    /// True when upstream reports the record removed
    pub deleted: bool,
}

/// Counts of what an upsert batch actually did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl UpsertStats {
    /// Records that were written or confirmed present
    pub fn applied(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }
}

/// Repository for mirrored record database operations
#[derive(Debug, Clone)]
pub struct MirroredRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl MirroredRecordRepository {
    /// Creates a new MirroredRecordRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Applies one page of records idempotently.
    ///
    /// When the same `external_id` appears more than once in the batch the
    /// last occurrence wins. Inserts carry an ON CONFLICT UPDATE so a
    /// concurrent writer (webhook delivery) cannot fail the page.
    pub async fn upsert_batch(
        &self,
        connection_id: Uuid,
        records: &[RecordUpsert],
    ) -> Result<UpsertStats, DbErr> {
        let mut stats = UpsertStats::default();
        if records.is_empty() {
            return Ok(stats);
        }

        let mut latest: HashMap<&str, &RecordUpsert> = HashMap::new();
        for record in records {
            latest.insert(record.external_id.as_str(), record);
        }

        let existing = MirroredRecord::find()
            .filter(mirrored_record::Column::ConnectionId.eq(connection_id))
            .filter(
                mirrored_record::Column::ExternalId
                    .is_in(latest.keys().map(|id| id.to_string())),
            )
            .all(&*self.db)
            .await?;
        let mut by_external: HashMap<String, mirrored_record::Model> = existing
            .into_iter()
            .map(|model| (model.external_id.clone(), model))
            .collect();

        let now = Utc::now().fixed_offset();
        let mut inserts: Vec<mirrored_record::ActiveModel> = Vec::new();

        for record in latest.into_values() {
            match by_external.remove(&record.external_id) {
                None => {
                    inserts.push(mirrored_record::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        connection_id: Set(connection_id),
                        external_id: Set(record.external_id.clone()),
                        kind: Set(record.kind.clone()),
                        payload: Set(record.payload.clone()),
                        deleted_at: Set(record.deleted.then_some(now)),
                        created_at: Set(now),
                        updated_at: Set(now),
                    });
                    stats.inserted += 1;
                }
                Some(current) => {
                    let deleted_changed = current.deleted_at.is_some() != record.deleted;
                    let content_changed =
                        current.payload != record.payload || current.kind != record.kind;
                    if !deleted_changed && !content_changed {
                        stats.skipped += 1;
                        continue;
                    }

                    let deleted_at = if record.deleted {
                        current.deleted_at.or(Some(now))
                    } else {
                        None
                    };
                    MirroredRecord::update_many()
                        .col_expr(mirrored_record::Column::Kind, Expr::value(record.kind.clone()))
                        .col_expr(
                            mirrored_record::Column::Payload,
                            Expr::value(record.payload.clone()),
                        )
                        .col_expr(mirrored_record::Column::DeletedAt, Expr::value(deleted_at))
                        .col_expr(mirrored_record::Column::UpdatedAt, Expr::value(now))
                        .filter(mirrored_record::Column::Id.eq(current.id))
                        .exec(&*self.db)
                        .await?;
                    stats.updated += 1;
                }
            }
        }

        if !inserts.is_empty() {
            MirroredRecord::insert_many(inserts)
                .on_conflict(
                    OnConflict::columns([
                        mirrored_record::Column::ConnectionId,
                        mirrored_record::Column::ExternalId,
                    ])
                    .update_columns([
                        mirrored_record::Column::Kind,
                        mirrored_record::Column::Payload,
                        mirrored_record::Column::DeletedAt,
                        mirrored_record::Column::UpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec(&*self.db)
                .await?;
        }

        Ok(stats)
    }

    /// Fetches one record by its upstream identifier
    pub async fn get_by_external_id(
        &self,
        connection_id: Uuid,
        external_id: &str,
    ) -> Result<Option<mirrored_record::Model>, DbErr> {
        MirroredRecord::find()
            .filter(mirrored_record::Column::ConnectionId.eq(connection_id))
            .filter(mirrored_record::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await
    }

    /// Lists records for a connection newest-first with keyset pagination.
    ///
    /// `after` carries the `(updated_at, id)` keys of the last row from the
    /// previous page. Soft-deleted records are excluded unless requested.
    pub async fn list_by_connection(
        &self,
        connection_id: Uuid,
        limit: u64,
        after: Option<(DateTimeWithTimeZone, Uuid)>,
        include_deleted: bool,
    ) -> Result<(Vec<mirrored_record::Model>, Option<(DateTimeWithTimeZone, Uuid)>), DbErr> {
        if limit == 0 {
            return Ok((Vec::new(), after));
        }

        let mut query = MirroredRecord::find()
            .filter(mirrored_record::Column::ConnectionId.eq(connection_id))
            .order_by_desc(mirrored_record::Column::UpdatedAt)
            .order_by_desc(mirrored_record::Column::Id);

        if !include_deleted {
            query = query.filter(mirrored_record::Column::DeletedAt.is_null());
        }

        if let Some((updated_at, id)) = after {
            let condition = Condition::any()
                .add(mirrored_record::Column::UpdatedAt.lt(updated_at))
                .add(
                    Condition::all()
                        .add(mirrored_record::Column::UpdatedAt.eq(updated_at))
                        .add(mirrored_record::Column::Id.lt(id)),
                );
            query = query.filter(condition);
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;

        let next = if rows.len() as u64 > limit {
            rows.pop();
            rows.last().map(|last| (last.updated_at, last.id))
        } else {
            None
        };

        Ok((rows, next))
    }

    /// Counts live (not soft-deleted) records for a connection
    pub async fn count_live(&self, connection_id: Uuid) -> Result<u64, DbErr> {
        use sea_orm::PaginatorTrait;

        MirroredRecord::find()
            .filter(mirrored_record::Column::ConnectionId.eq(connection_id))
            .filter(mirrored_record::Column::DeletedAt.is_null())
            .count(&*self.db)
            .await
    }

    /// Deletes every record for a connection
    pub async fn delete_by_connection(&self, connection_id: Uuid) -> Result<u64, DbErr> {
        let result = MirroredRecord::delete_many()
            .filter(mirrored_record::Column::ConnectionId.eq(connection_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
