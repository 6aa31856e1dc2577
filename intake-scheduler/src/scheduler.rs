//! The durable cron scheduler.

use crate::worker::SyncWorker;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use intake_core::cron::parse_schedule;
use intake_core::{ConnectorError, ConnectorId, SyncJobType, SyncMode};
use intake_store::{ScheduleStore, StateDb, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Grace period for missed fires. Older misfires are skipped, not run.
const MISFIRE_GRACE_SECS: i64 = 3600;

/// Scheduler tick interval.
const TICK_MILLIS: u64 = 1000;

/// A scheduled job definition with its computed next fire.
#[derive(Debug, Clone)]
pub struct ScheduledJobView {
    /// Schedule id.
    pub id: String,
    /// Connector synced by this schedule.
    pub connector_id: ConnectorId,
    /// Normalized cron expression.
    pub cron_expression: String,
    /// Sync mode of triggered runs.
    pub sync_mode: String,
    /// Whether firing is suspended.
    pub paused: bool,
    /// Next fire time (UTC), absent while paused.
    pub next_run_time: Option<DateTime<Utc>>,
}

struct ScheduleEntry {
    connector_id: ConnectorId,
    cron_expression: String,
    sync_mode: SyncMode,
    schedule: Schedule,
    paused: bool,
    next_fire: Option<DateTime<Utc>>,
}

/// Cron scheduler over the bounded worker pool.
///
/// Definitions persist in the state database and are reinstated on
/// [`start`](Self::start); missed fires within the grace window coalesce
/// into one run; `max_instances = 1` per connector is enforced against
/// the worker's in-flight set.
pub struct SyncScheduler {
    store: ScheduleStore,
    worker: Arc<SyncWorker>,
    entries: Arc<Mutex<HashMap<String, ScheduleEntry>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Build a scheduler over the shared state database.
    pub async fn new(db: &StateDb, worker: Arc<SyncWorker>) -> Result<Self, StoreError> {
        Ok(Self {
            store: ScheduleStore::new(db.pool().clone()).await?,
            worker,
            entries: Arc::new(Mutex::new(HashMap::new())),
            ticker: Mutex::new(None),
        })
    }

    /// Load persisted definitions and start the tick loop. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.lock().await;
            for definition in self.store.list().await? {
                match parse_schedule(&definition.cron_expression) {
                    Ok(schedule) => {
                        let next_fire = schedule.upcoming(Utc).next();
                        entries.insert(
                            definition.id.clone(),
                            ScheduleEntry {
                                connector_id: definition.connector_id,
                                cron_expression: definition.cron_expression,
                                sync_mode: SyncMode::parse(&definition.sync_mode),
                                schedule,
                                paused: definition.paused,
                                next_fire,
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(id = %definition.id, error = %e,
                            "skipping unparseable persisted schedule");
                    }
                }
            }
            tracing::info!(schedules = entries.len(), "scheduler recovered definitions");
        }

        let mut ticker = self.ticker.lock().await;
        if ticker.is_none() {
            let scheduler = Arc::clone(self);
            *ticker = Some(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_millis(TICK_MILLIS));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    scheduler.tick(Utc::now()).await;
                }
            }));
        }
        Ok(())
    }

    /// Stop the tick loop. Running jobs continue to completion.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
            tracing::info!("scheduler shut down");
        }
    }

    /// Add (or, with `replace_existing`, replace) a schedule. The cron
    /// expression is validated and normalized before anything persists.
    pub async fn add_job(
        &self,
        id: &str,
        connector_id: &ConnectorId,
        cron_expression: &str,
        sync_mode: SyncMode,
        replace_existing: bool,
    ) -> Result<(), ConnectorError> {
        let normalized = intake_core::normalize_cron(cron_expression)?;
        let schedule = parse_schedule(&normalized)?;

        let mut entries = self.entries.lock().await;
        if entries.contains_key(id) && !replace_existing {
            return Err(ConnectorError::Configuration(format!(
                "schedule '{id}' already exists"
            )));
        }
        self.store
            .upsert(id, connector_id, &normalized, sync_mode.as_str())
            .await
            .map_err(|e| ConnectorError::Other(Box::new(e)))?;

        let next_fire = schedule.upcoming(Utc).next();
        entries.insert(
            id.to_string(),
            ScheduleEntry {
                connector_id: connector_id.clone(),
                cron_expression: normalized.clone(),
                sync_mode,
                schedule,
                paused: false,
                next_fire,
            },
        );
        tracing::info!(id, cron = %normalized, "added scheduled job");
        Ok(())
    }

    /// Remove a schedule. Returns whether it existed.
    pub async fn remove_job(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.store.remove(id).await?;
        self.entries.lock().await.remove(id);
        if existed {
            tracing::info!(id, "removed scheduled job");
        }
        Ok(existed)
    }

    /// Pause a schedule. Returns whether it existed.
    pub async fn pause_job(&self, id: &str) -> Result<bool, StoreError> {
        self.set_paused(id, true).await
    }

    /// Resume a paused schedule. Returns whether it existed.
    pub async fn resume_job(&self, id: &str) -> Result<bool, StoreError> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: &str, paused: bool) -> Result<bool, StoreError> {
        let existed = self.store.set_paused(id, paused).await?;
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.paused = paused;
            entry.next_fire = if paused {
                None
            } else {
                entry.schedule.upcoming(Utc).next()
            };
        }
        Ok(existed)
    }

    /// Trigger a schedule immediately. Refused while a run for the same
    /// connector is in flight (`max_instances = 1` applies to manual
    /// triggers too).
    pub async fn run_now(&self, id: &str) -> Result<bool, StoreError> {
        let (connector_id, sync_mode) = {
            let entries = self.entries.lock().await;
            let Some(entry) = entries.get(id) else {
                return Ok(false);
            };
            (entry.connector_id.clone(), entry.sync_mode)
        };
        if self.worker.is_connector_running(&connector_id) {
            tracing::info!(id, "run_now refused: connector already syncing");
            return Ok(false);
        }
        self.worker
            .execute_sync(
                &connector_id,
                SyncJobType::Manual,
                sync_mode,
                Some("run_now"),
            )
            .await?;
        Ok(true)
    }

    /// One schedule with its next fire time.
    pub async fn get_job(&self, id: &str) -> Option<ScheduledJobView> {
        let entries = self.entries.lock().await;
        entries.get(id).map(|entry| ScheduledJobView {
            id: id.to_string(),
            connector_id: entry.connector_id.clone(),
            cron_expression: entry.cron_expression.clone(),
            sync_mode: entry.sync_mode.as_str().to_string(),
            paused: entry.paused,
            next_run_time: entry.next_fire,
        })
    }

    /// All schedules.
    pub async fn list_jobs(&self) -> Vec<ScheduledJobView> {
        let entries = self.entries.lock().await;
        let mut views: Vec<ScheduledJobView> = entries
            .iter()
            .map(|(id, entry)| ScheduledJobView {
                id: id.clone(),
                connector_id: entry.connector_id.clone(),
                cron_expression: entry.cron_expression.clone(),
                sync_mode: entry.sync_mode.as_str().to_string(),
                paused: entry.paused,
                next_run_time: entry.next_fire,
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Evaluate every schedule against the clock: dispatch due jobs
    /// (coalescing missed fires into one), skip misfires past the grace
    /// window, and advance next-fire times.
    async fn tick(&self, now: DateTime<Utc>) {
        let mut due: Vec<(String, ConnectorId, SyncMode)> = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            for (id, entry) in entries.iter_mut() {
                if entry.paused {
                    continue;
                }
                let Some(next_fire) = entry.next_fire else { continue };
                if next_fire > now {
                    continue;
                }

                let within_grace =
                    now - next_fire <= ChronoDuration::seconds(MISFIRE_GRACE_SECS);
                // Coalesce: however many fires were missed, advance past
                // all of them and dispatch at most one run.
                entry.next_fire = entry.schedule.after(&now).next();
                if within_grace {
                    due.push((id.clone(), entry.connector_id.clone(), entry.sync_mode));
                } else {
                    tracing::warn!(id, missed = %next_fire, "skipping misfire past grace window");
                }
            }
        }

        for (id, connector_id, sync_mode) in due {
            if self.worker.is_connector_running(&connector_id) {
                tracing::debug!(id, "skipping fire: previous run still active");
                continue;
            }
            match self
                .worker
                .execute_sync(&connector_id, SyncJobType::Scheduled, sync_mode, Some("scheduler"))
                .await
            {
                Ok(job_id) => {
                    tracing::info!(id, job_id = %job_id, "dispatched scheduled sync");
                }
                Err(e) => {
                    tracing::error!(id, error = %e, "failed to dispatch scheduled sync");
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SyncScheduler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine as _;
    use intake_credentials::CredentialStore;

    async fn scheduler() -> (StateDb, Arc<SyncScheduler>) {
        let db = StateDb::in_memory().await.unwrap();
        let credentials = Arc::new(
            CredentialStore::new(db.pool().clone(), Some(&URL_SAFE.encode([9u8; 32])))
                .await
                .unwrap(),
        );
        let worker = Arc::new(SyncWorker::new(db.clone(), credentials).await.unwrap());
        let scheduler = Arc::new(SyncScheduler::new(&db, worker).await.unwrap());
        (db, scheduler)
    }

    #[tokio::test]
    async fn add_validates_and_normalizes_cron() {
        let (_db, scheduler) = scheduler().await;
        scheduler
            .add_job(
                "sched-c1",
                &ConnectorId::new("c1"),
                "0   */6   *   *   *",
                SyncMode::Incremental,
                true,
            )
            .await
            .unwrap();

        let view = scheduler.get_job("sched-c1").await.unwrap();
        assert_eq!(view.cron_expression, "0 */6 * * *");
        assert!(view.next_run_time.is_some());

        let error = scheduler
            .add_job(
                "sched-bad",
                &ConnectorId::new("c1"),
                "invalid cron",
                SyncMode::Full,
                true,
            )
            .await;
        assert!(error.is_err());
    }

    #[tokio::test]
    async fn duplicate_requires_replace_existing() {
        let (_db, scheduler) = scheduler().await;
        scheduler
            .add_job("s", &ConnectorId::new("c1"), "0 * * * *", SyncMode::Full, true)
            .await
            .unwrap();
        assert!(scheduler
            .add_job("s", &ConnectorId::new("c1"), "0 * * * *", SyncMode::Full, false)
            .await
            .is_err());
        assert!(scheduler
            .add_job("s", &ConnectorId::new("c1"), "30 * * * *", SyncMode::Full, true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn pause_clears_next_fire_and_resume_restores() {
        let (_db, scheduler) = scheduler().await;
        scheduler
            .add_job("s", &ConnectorId::new("c1"), "0 * * * *", SyncMode::Full, true)
            .await
            .unwrap();

        assert!(scheduler.pause_job("s").await.unwrap());
        let paused = scheduler.get_job("s").await.unwrap();
        assert!(paused.paused);
        assert!(paused.next_run_time.is_none());

        assert!(scheduler.resume_job("s").await.unwrap());
        let resumed = scheduler.get_job("s").await.unwrap();
        assert!(!resumed.paused);
        assert!(resumed.next_run_time.is_some());
    }

    #[tokio::test]
    async fn definitions_survive_restart() {
        let (db, scheduler) = scheduler().await;
        scheduler
            .add_job("s", &ConnectorId::new("c1"), "0 * * * *", SyncMode::Incremental, true)
            .await
            .unwrap();

        // A fresh scheduler over the same database recovers the schedule.
        let credentials = Arc::new(
            CredentialStore::new(db.pool().clone(), Some(&URL_SAFE.encode([9u8; 32])))
                .await
                .unwrap(),
        );
        let worker = Arc::new(SyncWorker::new(db.clone(), credentials).await.unwrap());
        let recovered = Arc::new(SyncScheduler::new(&db, worker).await.unwrap());
        recovered.start().await.unwrap();

        let view = recovered.get_job("s").await.unwrap();
        assert_eq!(view.cron_expression, "0 * * * *");
        assert_eq!(view.sync_mode, "incremental");
        recovered.shutdown().await;
    }

    #[tokio::test]
    async fn remove_unknown_is_false() {
        let (_db, scheduler) = scheduler().await;
        assert!(!scheduler.remove_job("ghost").await.unwrap());
        assert!(!scheduler.pause_job("ghost").await.unwrap());
        assert!(!scheduler.run_now("ghost").await.unwrap());
    }
}
