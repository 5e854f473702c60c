//! Periodic scheduler for named interval jobs.
//!
//! Entries (`id`, interval, last run) persist in `schedule.json` so
//! cadence survives restarts; the job closures are rebound by id at
//! startup with [`Scheduler::schedule`]. A coarse ticker fires due entries
//! on their own tasks and records `last_run` when each job finishes.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::models::schedule::ScheduledEntry;
use crate::persistence::snapshot::JsonSnapshot;
use crate::{AppError, Result};

/// A job body; receives the scheduler's cancellation token.
pub type Job =
    Arc<dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`Job`].
pub fn job<F, Fut>(body: F) -> Job
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |cancel| Box::pin(body(cancel)))
}

struct Slot {
    entry: ScheduledEntry,
    job: Option<Job>,
    running: bool,
}

/// Interval job runner.
pub struct Scheduler {
    slots: Mutex<BTreeMap<String, Slot>>,
    snapshot: JsonSnapshot,
    tick: Duration,
}

impl Scheduler {
    /// Load persisted entries from `path`. Loaded entries have no job until
    /// rebound with [`Scheduler::schedule`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but is unreadable.
    pub fn load(path: impl Into<PathBuf>, tick: Duration) -> Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let entries: Vec<ScheduledEntry> = snapshot.load()?;
        let slots = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.id.clone(),
                    Slot {
                        entry,
                        job: None,
                        running: false,
                    },
                )
            })
            .collect();

        Ok(Self {
            slots: Mutex::new(slots),
            snapshot,
            tick,
        })
    }

    fn persist(&self, slots: &BTreeMap<String, Slot>) -> Result<()> {
        let entries: Vec<&ScheduledEntry> = slots.values().map(|slot| &slot.entry).collect();
        self.snapshot.save(&entries)
    }

    /// Register or rebind `id`.
    ///
    /// Idempotent: an existing entry keeps its `last_run` and takes the new
    /// interval and job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a zero interval, or `AppError::Io` if
    /// the entries cannot be persisted.
    pub async fn schedule(&self, id: &str, interval: Duration, job: Job) -> Result<()> {
        if interval.is_zero() {
            return Err(AppError::Config(format!("job {id}: interval must be positive")));
        }
        let interval_seconds = interval.as_secs().max(1);

        let mut slots = self.slots.lock().await;
        match slots.get_mut(id) {
            Some(slot) => {
                slot.entry.interval_seconds = interval_seconds;
                slot.job = Some(job);
            }
            None => {
                slots.insert(
                    id.to_owned(),
                    Slot {
                        entry: ScheduledEntry {
                            id: id.to_owned(),
                            interval_seconds,
                            last_run: None,
                        },
                        job: Some(job),
                        running: false,
                    },
                );
            }
        }
        self.persist(&slots)?;
        info!(job = id, interval_seconds, "job scheduled");
        Ok(())
    }

    /// Remove `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the entries cannot be persisted.
    pub async fn unschedule(&self, id: &str) -> Result<bool> {
        let mut slots = self.slots.lock().await;
        let existed = slots.remove(id).is_some();
        if existed {
            self.persist(&slots)?;
        }
        Ok(existed)
    }

    /// Snapshot of every entry, sorted by id.
    pub async fn entries(&self) -> Vec<ScheduledEntry> {
        self.slots
            .lock()
            .await
            .values()
            .map(|slot| slot.entry.clone())
            .collect()
    }

    /// Fire every due entry that has a job and is not already running.
    ///
    /// Returns the ids fired. Each job runs on its own task; its `last_run`
    /// is recorded when it finishes, including when it panics.
    pub async fn run_due(self: &Arc<Self>, now: DateTime<Utc>, cancel: &CancellationToken) -> Vec<String> {
        let mut fired = Vec::new();
        let mut slots = self.slots.lock().await;

        for (id, slot) in slots.iter_mut() {
            let Some(job) = slot.job.clone() else {
                continue;
            };
            if slot.running || !slot.entry.is_due(now) {
                continue;
            }
            slot.running = true;
            fired.push(id.clone());

            let scheduler = Arc::clone(self);
            let token = cancel.child_token();
            let job_id = id.clone();
            tokio::spawn(
                async move {
                    debug!("job started");
                    if let Err(err) = tokio::spawn(job(token)).await {
                        error!(job = %job_id, %err, "scheduled job panicked");
                    }
                    scheduler.finish(&job_id).await;
                }
                .instrument(info_span!("scheduled_job", job = %id)),
            );
        }
        fired
    }

    async fn finish(&self, id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id) {
            slot.running = false;
            slot.entry.last_run = Some(Utc::now());
        }
        if let Err(err) = self.persist(&slots) {
            error!(job = id, %err, "failed to persist schedule");
        }
        debug!(job = id, "job finished");
    }

    /// Spawn the ticker loop. The first check happens one tick after start.
    #[must_use]
    pub fn spawn_scheduler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + scheduler.tick, scheduler.tick);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let fired = scheduler.run_due(Utc::now(), &cancel).await;
                            if !fired.is_empty() {
                                info!(jobs = ?fired, "scheduled jobs fired");
                            }
                        }
                    }
                }
                info!("scheduler stopped");
            }
            .instrument(info_span!("scheduler")),
        )
    }
}
