use crate::config::SchedulerSettings;
use crate::schedule::beyond_grace;
use crate::service::{PlaylistService, RefreshOutcome};
use crate::store::{Heartbeat, HeartbeatOutcome, ManagedPlaylist};
use crate::sync::Lease;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DUE_CHECK_LEASE: &str = "due_check";
// Outlives any sane due check; frees the guard if the holder dies mid-run
const DUE_CHECK_LEASE_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueCheckReport {
    pub due: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Coalesced with another refresh, no longer due, or held by another process
    pub unchanged: usize,
    pub beyond_grace: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueCheckOutcome {
    Completed(DueCheckReport),
    /// Another due check was still in progress
    Skipped,
    /// The due set could not be read
    Failed(String),
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RefreshScheduler {
    service: Arc<PlaylistService>,
    settings: SchedulerSettings,
    check_guard: AsyncMutex<()>,
    running: Mutex<Option<Running>>,
}

impl RefreshScheduler {
    pub fn new(service: Arc<PlaylistService>, settings: SchedulerSettings) -> Arc<Self> {
        Arc::new(RefreshScheduler {
            service,
            settings,
            check_guard: AsyncMutex::new(()),
            running: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SchedulerState {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.as_ref() {
            Some(task) if !task.handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// Start ticking; the first due check runs immediately. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("Scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let interval = self.settings.tick_interval.max(std::time::Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.run_due_check().await;
                    }
                }
            }
            info!("Scheduler loop stopped");
        });

        info!(
            tick_secs = interval.as_secs(),
            grace_days = self.settings.grace_period.num_days(),
            concurrency = self.settings.max_concurrency,
            "Scheduler started"
        );
        *running = Some(Running { cancel, handle });
    }

    /// Stop ticking; a due check in progress is allowed to finish
    pub async fn stop(&self) {
        let task = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    }

    /// One due check; shares the re-entrancy guard with the timer and with
    /// every other process using the same database
    pub async fn run_due_check(&self) -> DueCheckOutcome {
        let Ok(_guard) = self.check_guard.try_lock() else {
            warn!("Due check already in progress, skipping");
            self.heartbeat(self.service.now(), HeartbeatOutcome::Skipped, &DueCheckReport::default());
            return DueCheckOutcome::Skipped;
        };

        let lease = Lease::try_acquire(
            self.service.store(),
            DUE_CHECK_LEASE,
            self.service.lease_holder(),
            Duration::minutes(DUE_CHECK_LEASE_MINUTES),
        );
        let _lease = match lease {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                warn!("Due check running in another process, skipping");
                self.heartbeat(self.service.now(), HeartbeatOutcome::Skipped, &DueCheckReport::default());
                return DueCheckOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim the due check lease");
                self.heartbeat(self.service.now(), HeartbeatOutcome::Failed, &DueCheckReport::default());
                return DueCheckOutcome::Failed(format!("{e:#}"));
            }
        };

        let now = self.service.now();
        let due = match self.service.store().list_due(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to load due playlists");
                self.heartbeat(now, HeartbeatOutcome::Failed, &DueCheckReport::default());
                return DueCheckOutcome::Failed(format!("{e:#}"));
            }
        };

        let report = self.refresh_all(due, now).await;
        self.heartbeat(now, HeartbeatOutcome::Completed, &report);

        if report.due > 0 {
            info!(
                due = report.due,
                refreshed = report.refreshed,
                failed = report.failed,
                unchanged = report.unchanged,
                "Due check finished"
            );
        } else {
            debug!("Due check finished, nothing due");
        }
        DueCheckOutcome::Completed(report)
    }

    async fn refresh_all(&self, due: Vec<ManagedPlaylist>, now: DateTime<Utc>) -> DueCheckReport {
        let mut report = DueCheckReport {
            due: due.len(),
            beyond_grace: due
                .iter()
                .filter(|p| {
                    p.next_due
                        .is_some_and(|d| beyond_grace(d, now, self.settings.grace_period))
                })
                .count(),
            ..DueCheckReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for playlist in due {
            let service = Arc::clone(&self.service);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = service.refresh_scheduled(&playlist).await;
                (playlist.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(RefreshOutcome::Refreshed(_)))) => report.refreshed += 1,
                Ok((_, Ok(RefreshOutcome::Coalesced(_) | RefreshOutcome::NotDue(_) | RefreshOutcome::Busy(_)))) => {
                    report.unchanged += 1
                }
                Ok((id, Err(e))) => {
                    warn!(id, error = %e, "Scheduled refresh failed, will retry next tick");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Scheduled refresh task panicked");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn heartbeat(&self, at: DateTime<Utc>, outcome: HeartbeatOutcome, report: &DueCheckReport) {
        let heartbeat = Heartbeat {
            at,
            outcome,
            due: report.due,
            refreshed: report.refreshed,
            failed: report.failed,
        };
        if let Err(e) = self.service.store().record_heartbeat(&heartbeat) {
            warn!(error = %e, "Failed to record scheduler heartbeat");
        }
    }
}
