//! # Sync Scheduler
//!
//! Background loop that keeps every connected integration fresh. Each tick
//! classifies connections into activity tiers, decides which are due, and
//! claims a run lease per due connection via compare-and-swap before handing
//! it to the [`SyncRunner`](crate::sync_runner::SyncRunner). The lease row is
//! the only coordination point, so multiple service instances can tick over
//! the same database without double-running a connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::prelude::DateTimeWithTimeZone;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::sync_state::{self, SyncStatus};
use crate::repositories::{ConnectionRepository, SyncStateRepository};
use crate::sync_runner::SyncRunner;
use crate::tier::{ActivityWindowPolicy, TierPolicy, sync_interval};

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    connections: ConnectionRepository,
    sync_states: SyncStateRepository,
    runner: Arc<SyncRunner>,
    tier_policy: ActivityWindowPolicy,
    semaphore: Arc<Semaphore>,
}

#[derive(Debug, Default)]
struct TickStats {
    candidates: u64,
    due: u64,
    claimed: u64,
    lease_contention: u64,
    skipped_not_due: u64,
    deferred_no_permit: u64,
    errors: u64,
}

impl SyncScheduler {
    /// Create a new scheduler instance.
    pub fn new(
        config: Arc<AppConfig>,
        connections: ConnectionRepository,
        sync_states: SyncStateRepository,
        runner: Arc<SyncRunner>,
    ) -> Self {
        let tier_policy = ActivityWindowPolicy::from_config(&config.scheduler);
        let semaphore = Arc::new(Semaphore::new(config.scheduler.max_concurrent_runs));
        Self {
            config,
            connections,
            sync_states,
            runner,
            tier_policy,
            semaphore,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_ms = self.config.scheduler.tick_interval_ms,
            concurrency = self.config.scheduler.max_concurrent_runs,
            "Starting sync scheduler"
        );
        let tick_interval = TokioDuration::from_millis(self.config.scheduler.tick_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    match self.tick(&shutdown).await {
                        Ok(stats) => {
                            debug!(
                                candidates = stats.candidates,
                                due = stats.due,
                                claimed = stats.claimed,
                                contention = stats.lease_contention,
                                not_due = stats.skipped_not_due,
                                deferred = stats.deferred_no_permit,
                                errors = stats.errors,
                                "Scheduler tick completed"
                            );
                        }
                        Err(err) => {
                            error!(error = %err, "Scheduler tick failed");
                        }
                    }
                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn tick(&self, shutdown: &CancellationToken) -> Result<TickStats, sea_orm::DbErr> {
        let now = Utc::now();
        let mut stats = TickStats::default();

        // Only `connected` rows are sync candidates; disconnected and errored
        // connections wait for an operator.
        let candidates = self.connections.list_connected().await?;
        stats.candidates = candidates.len() as u64;
        if candidates.is_empty() {
            return Ok(stats);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let mut states: HashMap<Uuid, sync_state::Model> = self
            .sync_states
            .find_by_connection_ids(&ids)
            .await?
            .into_iter()
            .map(|state| (state.connection_id, state))
            .collect();

        for connection in candidates {
            if shutdown.is_cancelled() {
                break;
            }

            let state = match states.remove(&connection.id) {
                Some(state) => state,
                None => match self.sync_states.get_or_create(connection.id).await {
                    Ok(state) => state,
                    Err(err) => {
                        stats.errors += 1;
                        error!(
                            error = %err,
                            connection_id = %connection.id,
                            "Failed to materialize sync state"
                        );
                        continue;
                    }
                },
            };

            let Some(prior_status) = SyncStatus::parse(&state.status) else {
                stats.errors += 1;
                warn!(
                    connection_id = %connection.id,
                    status = %state.status,
                    "Unrecognized sync status; skipping connection"
                );
                continue;
            };

            let tier = self.tier_policy.classify(&connection, now);
            let interval = sync_interval(&self.config.scheduler, &connection.provider_key, tier);
            if !run_due(
                &state,
                prior_status,
                interval,
                self.config.scheduler.retry_transient_errors,
                now,
            ) {
                stats.skipped_not_due += 1;
                continue;
            }
            stats.due += 1;

            // Take the permit before the lease so a claimed lease is never
            // left waiting on local capacity.
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                stats.deferred_no_permit += 1;
                debug!("Run capacity exhausted; deferring remaining due connections to next tick");
                break;
            };

            let token = Uuid::new_v4();
            let acquired = match self
                .sync_states
                .acquire_lease(
                    connection.id,
                    token,
                    prior_status,
                    self.config.scheduler.max_run_seconds,
                )
                .await
            {
                Ok(acquired) => acquired,
                Err(err) => {
                    stats.errors += 1;
                    error!(
                        error = %err,
                        connection_id = %connection.id,
                        "Lease acquisition failed"
                    );
                    continue;
                }
            };

            let labels = vec![("provider", connection.provider_key.clone())];
            if !acquired {
                stats.lease_contention += 1;
                counter!("sync_lease_contention_total", &labels).increment(1);
                debug!(
                    connection_id = %connection.id,
                    "Another runner holds the lease; skipping"
                );
                continue;
            }

            stats.claimed += 1;
            counter!("sync_runs_claimed_total", &labels).increment(1);
            info!(
                connection_id = %connection.id,
                provider = %connection.provider_key,
                tier = tier.as_str(),
                resumed = matches!(prior_status, SyncStatus::Running | SyncStatus::Error),
                "Claimed sync run"
            );

            let runner = Arc::clone(&self.runner);
            let cancel = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                runner.run(&connection, token, &cancel).await;
            });
        }

        gauge!("sync_scheduler_due_connections").set(stats.due as f64);
        Ok(stats)
    }
}

/// Decides whether a connection's sync state is due for a run.
///
/// A future `retry_after` gates every status. `idle` is due immediately,
/// `done` after its tier interval since the last finish, `error` likewise but
/// only when transient retries are enabled, and `running` only when the lease
/// is gone or expired (a crashed runner to take over from).
fn run_due(
    state: &sync_state::Model,
    status: SyncStatus,
    interval: std::time::Duration,
    retry_transient: bool,
    now: DateTime<Utc>,
) -> bool {
    if state
        .retry_after
        .is_some_and(|gate| gate.with_timezone(&Utc) > now)
    {
        return false;
    }

    match status {
        SyncStatus::Idle => true,
        SyncStatus::Running => !lease_is_live(state, now),
        SyncStatus::Done => interval_elapsed(state.finished_at, interval, now),
        SyncStatus::Error => retry_transient && interval_elapsed(state.finished_at, interval, now),
    }
}

fn lease_is_live(state: &sync_state::Model, now: DateTime<Utc>) -> bool {
    state.lease_owner_token.is_some()
        && state
            .lease_expires_at
            .is_some_and(|expiry| expiry.with_timezone(&Utc) > now)
}

fn interval_elapsed(
    finished_at: Option<DateTimeWithTimeZone>,
    interval: std::time::Duration,
    now: DateTime<Utc>,
) -> bool {
    match finished_at {
        None => true,
        Some(finished) => {
            finished.with_timezone(&Utc) + chrono::Duration::seconds(interval.as_secs() as i64)
                <= now
        }
    }
}
