//! Sync runner
//!
//! Executes one leased sync run for a connection: reveal credentials, fetch
//! pages from the provider, apply them idempotently, and checkpoint after
//! every applied page. All checkpoint writes are fenced on the lease token;
//! a write that affects zero rows means the lease moved on and the run
//! aborts without touching anything further. A run never panics and never
//! returns an error to the scheduler loop; every ending is a [`RunOutcome`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::models::connection::{self, ConnectionStatus};
use crate::providers::{FetchRequest, PageCursor, ProviderError, ProviderRegistry, UpstreamRecord};
use crate::rate_limit::RateLimiter;
use crate::repositories::{
    ConnectionRepository, MirroredRecordRepository, RecordUpsert, SyncStateRepository,
};
use crate::vault::{Vault, VaultError};

/// How a sync run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The listing was drained; the cycle is `done`
    Completed { pages: u32, records: u64 },
    /// Page budget or shutdown stopped the run mid-cycle; status stays
    /// `running` and the next tick resumes from the persisted cursor
    Yielded { pages: u32 },
    /// Upstream or the local limiter throttled the run; `retry_after` was
    /// stamped and the connection sits out until it passes
    RateLimited { resume_after_secs: u64 },
    /// Credentials were rejected, expired, or unreadable; the connection is
    /// in `error` until an operator rotates or reconnects
    AuthFailed,
    /// Transient or malformed-response failure; the cycle is `error` with
    /// the cursor intact so the next attempt retries the same page
    Failed,
    /// A fenced write affected zero rows: another runner owns the lease now
    LeaseLost,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Yielded { .. } => "yielded",
            RunOutcome::RateLimited { .. } => "rate_limited",
            RunOutcome::AuthFailed => "auth_failed",
            RunOutcome::Failed => "failed",
            RunOutcome::LeaseLost => "lease_lost",
        }
    }
}

/// Executes leased sync runs against provider APIs
pub struct SyncRunner {
    connections: ConnectionRepository,
    sync_states: SyncStateRepository,
    records: MirroredRecordRepository,
    vault: Arc<dyn Vault>,
    providers: Arc<ProviderRegistry>,
    limiter: Arc<dyn RateLimiter>,
    config: SchedulerConfig,
}

impl SyncRunner {
    pub fn new(
        connections: ConnectionRepository,
        sync_states: SyncStateRepository,
        records: MirroredRecordRepository,
        vault: Arc<dyn Vault>,
        providers: Arc<ProviderRegistry>,
        limiter: Arc<dyn RateLimiter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            connections,
            sync_states,
            records,
            vault,
            providers,
            limiter,
            config,
        }
    }

    /// Runs one leased sync for the connection. The caller must have won the
    /// lease CAS with `token` before calling.
    #[instrument(skip(self, connection, cancel), fields(connection_id = %connection.id, provider = %connection.provider_key))]
    pub async fn run(
        &self,
        connection: &connection::Model,
        token: Uuid,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started = std::time::Instant::now();
        let provider_labels = vec![("provider", connection.provider_key.clone())];

        let outcome = match self.execute(connection, token, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // The checkpoint row is unreachable; the lease expires on its
                // own and the next acquisition resumes from the last fenced
                // write.
                warn!(connection_id = %connection.id, error = %error, "Sync run aborted on storage error");
                RunOutcome::Failed
            }
        };

        histogram!("sync_run_seconds", &provider_labels).record(started.elapsed().as_secs_f64());
        let outcome_labels = vec![
            ("provider", connection.provider_key.clone()),
            ("outcome", outcome.as_str().to_string()),
        ];
        counter!("sync_runs_total", &outcome_labels).increment(1);

        info!(
            connection_id = %connection.id,
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync run finished"
        );
        outcome
    }

    async fn execute(
        &self,
        connection: &connection::Model,
        token: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        let connection_id = connection.id;
        let provider_key = connection.provider_key.as_str();

        let Some(client) = self.providers.get(provider_key) else {
            return self
                .finish_failed(connection_id, token, "provider is not registered")
                .await;
        };

        let Some(state) = self.sync_states.get_by_connection(connection_id).await? else {
            warn!(connection_id = %connection_id, "Sync state row missing for leased run");
            return Ok(RunOutcome::Failed);
        };

        let revealed = match self.vault.reveal(connection_id).await {
            Ok(revealed) => revealed,
            Err(VaultError::NotFound(_)) => {
                return self
                    .finish_auth_failed(connection_id, token, "no credentials stored")
                    .await;
            }
            Err(VaultError::Crypto(error)) => {
                warn!(connection_id = %connection_id, error = %error, "Credential envelope could not be opened");
                return self
                    .finish_auth_failed(connection_id, token, "credential envelope could not be opened")
                    .await;
            }
            Err(VaultError::Database(error)) => return Err(error),
        };

        let now = Utc::now();
        if revealed.expires_at.is_some_and(|expiry| expiry <= now) {
            return self
                .finish_auth_failed(connection_id, token, "credentials expired")
                .await;
        }

        let last_synced_at = connection.last_synced_at.map(|t| t.with_timezone(&Utc));
        let mut cursor: Option<PageCursor> = state.next_page_cursor.clone().map(PageCursor::from);
        let mut pages_this_run: u32 = 0;
        let mut records_this_run: u64 = 0;
        let mut max_activity: Option<DateTime<Utc>> = None;
        let run_budget = Duration::from_secs(self.config.max_run_seconds);
        let started = std::time::Instant::now();

        loop {
            if pages_this_run >= self.config.max_pages_per_run {
                debug!(connection_id = %connection_id, pages = pages_this_run, "Page budget reached; yielding");
                return self.finish_yielded(connection_id, token, pages_this_run).await;
            }
            if cancel.is_cancelled() {
                debug!(connection_id = %connection_id, "Shutdown requested; yielding");
                return self.finish_yielded(connection_id, token, pages_this_run).await;
            }
            // Further writes past the budget would race the next lease
            // holder; the fence makes them no-ops, so stop here instead.
            if started.elapsed() >= run_budget {
                warn!(connection_id = %connection_id, "Run budget exhausted before the listing drained; yielding");
                return self.finish_yielded(connection_id, token, pages_this_run).await;
            }

            let decision = self
                .limiter
                .check(provider_key, &connection_id.to_string());
            if !decision.allowed {
                let hint = decision.retry_after.map(|d| d.as_secs().max(1));
                return self
                    .finish_rate_limited(connection_id, token, provider_key, hint)
                    .await;
            }

            let request = FetchRequest {
                cursor: cursor.clone(),
                page_size: self.config.page_size,
                last_synced_at,
            };

            let page = match client.fetch_page(&revealed.secret, &request).await {
                Ok(page) => page,
                Err(ProviderError::Unauthorized { status }) => {
                    return self
                        .finish_auth_failed(
                            connection_id,
                            token,
                            &format!("authentication failed: upstream returned status {}", status),
                        )
                        .await;
                }
                Err(ProviderError::RateLimited { retry_after_secs }) => {
                    return self
                        .finish_rate_limited(connection_id, token, provider_key, retry_after_secs)
                        .await;
                }
                Err(error @ (ProviderError::Transient { .. } | ProviderError::Malformed { .. })) => {
                    return self
                        .finish_failed(connection_id, token, &error.to_string())
                        .await;
                }
            };

            if page.is_empty() {
                // Empty pages end the cycle without counting toward
                // `pages_fetched`.
                return self
                    .finish_completed(
                        connection_id,
                        token,
                        pages_this_run,
                        records_this_run,
                        max_activity,
                    )
                    .await;
            }

            let (upserts, page_activity, skipped) = validated_upserts(page.records);
            if skipped > 0 {
                warn!(
                    connection_id = %connection_id,
                    skipped,
                    "Skipped records without an upstream identifier"
                );
            }
            max_activity = match (max_activity, page_activity) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };

            let stats = self.records.upsert_batch(connection_id, &upserts).await?;
            let next_json = page.next_cursor.clone().map(serde_json::Value::from);
            let persisted = self
                .sync_states
                .persist_progress(connection_id, token, next_json, stats.applied() as i32)
                .await?;
            if !persisted {
                debug!(connection_id = %connection_id, "Lease lost while persisting progress");
                return Ok(RunOutcome::LeaseLost);
            }

            pages_this_run += 1;
            records_this_run += stats.applied();
            let page_labels = vec![("provider", provider_key.to_string())];
            counter!("sync_pages_total", &page_labels).increment(1);
            counter!("sync_records_total", &page_labels).increment(stats.applied());

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    return self
                        .finish_completed(
                            connection_id,
                            token,
                            pages_this_run,
                            records_this_run,
                            max_activity,
                        )
                        .await;
                }
            }
        }
    }

    async fn finish_completed(
        &self,
        connection_id: Uuid,
        token: Uuid,
        pages: u32,
        records: u64,
        max_activity: Option<DateTime<Utc>>,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        if !self.sync_states.complete(connection_id, token).await? {
            return Ok(RunOutcome::LeaseLost);
        }
        self.connections
            .note_synced(connection_id, Utc::now(), max_activity)
            .await?;
        Ok(RunOutcome::Completed { pages, records })
    }

    async fn finish_yielded(
        &self,
        connection_id: Uuid,
        token: Uuid,
        pages: u32,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        if !self.sync_states.yield_run(connection_id, token).await? {
            return Ok(RunOutcome::LeaseLost);
        }
        Ok(RunOutcome::Yielded { pages })
    }

    async fn finish_rate_limited(
        &self,
        connection_id: Uuid,
        token: Uuid,
        provider_key: &str,
        retry_after_hint: Option<u64>,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        let resume_after_secs =
            backoff_seconds(self.config.rate_limit_backoff_secs, retry_after_hint, &mut thread_rng());
        let retry_at =
            (Utc::now() + chrono::Duration::seconds(resume_after_secs as i64)).fixed_offset();

        if !self
            .sync_states
            .pause_rate_limited(connection_id, token, retry_at)
            .await?
        {
            return Ok(RunOutcome::LeaseLost);
        }

        let labels = vec![("provider", provider_key.to_string())];
        counter!("rate_limited_total", &labels).increment(1);
        warn!(
            connection_id = %connection_id,
            resume_after_secs,
            "Run paused on rate limit"
        );
        Ok(RunOutcome::RateLimited { resume_after_secs })
    }

    async fn finish_auth_failed(
        &self,
        connection_id: Uuid,
        token: Uuid,
        message: &str,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        if !self.sync_states.fail(connection_id, token, message).await? {
            return Ok(RunOutcome::LeaseLost);
        }
        // Auth failures park the connection itself; the scheduler only
        // considers `connected` rows, so nothing retries until an operator
        // rotates credentials or reconnects.
        self.connections
            .set_status(connection_id, ConnectionStatus::Error, Some(message))
            .await?;
        warn!(connection_id = %connection_id, message, "Run failed on authentication");
        Ok(RunOutcome::AuthFailed)
    }

    async fn finish_failed(
        &self,
        connection_id: Uuid,
        token: Uuid,
        message: &str,
    ) -> Result<RunOutcome, sea_orm::DbErr> {
        if !self.sync_states.fail(connection_id, token, message).await? {
            return Ok(RunOutcome::LeaseLost);
        }
        warn!(connection_id = %connection_id, message, "Run failed");
        Ok(RunOutcome::Failed)
    }
}

/// Filters a batch of upstream records down to applicable upserts. Webhook
/// ingestion and polling both pass through here.
///
/// Returns the upserts, the newest upstream activity timestamp seen, and how
/// many records were dropped for lacking an external id.
pub(crate) fn validated_upserts(
    records: Vec<UpstreamRecord>,
) -> (Vec<RecordUpsert>, Option<DateTime<Utc>>, usize) {
    let mut upserts = Vec::with_capacity(records.len());
    let mut max_activity: Option<DateTime<Utc>> = None;
    let mut skipped = 0;

    for record in records {
        if record.external_id.is_empty() {
            skipped += 1;
            continue;
        }
        if let Some(activity) = record.activity_at {
            max_activity = Some(max_activity.map_or(activity, |current| current.max(activity)));
        }
        upserts.push(RecordUpsert {
            external_id: record.external_id,
            kind: record.kind,
            payload: record.payload,
            deleted: record.deleted,
        });
    }

    (upserts, max_activity, skipped)
}

/// Picks the pause length for a rate-limited run: the upstream hint when it
/// exceeds the configured backoff, plus up to 10% jitter so a fleet of
/// paused connections does not resume in lockstep.
fn backoff_seconds(configured: u64, hint: Option<u64>, rng: &mut impl Rng) -> u64 {
    let base = hint.unwrap_or(configured).max(configured).max(1);
    let jitter_cap = (base as f64 * 0.1).max(1.0);
    let jitter = rng.gen_range(0.0..jitter_cap);
    base + jitter as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(external_id: &str, activity: Option<DateTime<Utc>>) -> UpstreamRecord {
        UpstreamRecord {
            external_id: external_id.to_string(),
            kind: "video".to_string(),
            payload: json!({"id": external_id}),
            deleted: false,
            activity_at: activity,
        }
    }

    #[test]
    fn validated_upserts_drops_records_without_external_id() {
        let t1 = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0).unwrap();

        let (upserts, max_activity, skipped) = validated_upserts(vec![
            record("a", Some(t1)),
            record("", Some(t2 + chrono::Duration::days(1))),
            record("b", Some(t2)),
            record("c", None),
        ]);

        assert_eq!(upserts.len(), 3);
        assert_eq!(skipped, 1);
        // Activity from the dropped record does not count.
        assert_eq!(max_activity, Some(t2));
    }

    #[test]
    fn validated_upserts_empty_input() {
        let (upserts, max_activity, skipped) = validated_upserts(Vec::new());
        assert!(upserts.is_empty());
        assert_eq!(max_activity, None);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn backoff_prefers_larger_upstream_hint() {
        let mut rng = thread_rng();

        let with_hint = backoff_seconds(60, Some(300), &mut rng);
        assert!((300..=330).contains(&with_hint));

        // A hint below the configured floor does not shorten the pause.
        let short_hint = backoff_seconds(60, Some(5), &mut rng);
        assert!((60..=66).contains(&short_hint));

        let no_hint = backoff_seconds(60, None, &mut rng);
        assert!((60..=66).contains(&no_hint));
    }

    #[test]
    fn backoff_never_returns_zero() {
        let mut rng = thread_rng();
        assert!(backoff_seconds(0, None, &mut rng) >= 1);
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(RunOutcome::Completed { pages: 1, records: 2 }.as_str(), "completed");
        assert_eq!(RunOutcome::Yielded { pages: 1 }.as_str(), "yielded");
        assert_eq!(
            RunOutcome::RateLimited { resume_after_secs: 30 }.as_str(),
            "rate_limited"
        );
        assert_eq!(RunOutcome::AuthFailed.as_str(), "auth_failed");
        assert_eq!(RunOutcome::Failed.as_str(), "failed");
        assert_eq!(RunOutcome::LeaseLost.as_str(), "lease_lost");
    }
}
