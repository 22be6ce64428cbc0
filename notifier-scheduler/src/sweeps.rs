use chrono::{DateTime, Duration, Utc};
use notifier_core::types::IMMEDIATE_WINDOW_SECS;
use notifier_core::{Notification, NotificationStore, NotifierError};
use notifier_delivery::{DispatchOutcome, Dispatcher};
use std::sync::Arc;
use uuid::Uuid;

pub const SWEEP_BATCH_SIZE: i64 = 100;
/// Upper bound on the retention window, well inside what `chrono::Duration` can hold.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Per-run tally, logged by the interval tasks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, result: Result<DispatchOutcome, NotifierError>, id: Uuid) {
        match result {
            Ok(DispatchOutcome::Sent) => self.sent += 1,
            Ok(DispatchOutcome::Failed(_)) => self.failed += 1,
            Ok(DispatchOutcome::Skipped) => self.skipped += 1,
            Err(e) => {
                self.errors += 1;
                tracing::error!(notification_id = %id, "Sweep dispatch error: {}", e);
            }
        }
    }
}

pub struct Sweeper {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
    retention: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dispatcher: Arc<Dispatcher>,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            dispatcher,
            retention: Duration::days(retention_days.clamp(1, MAX_RETENTION_DAYS)),
        }
    }

    async fn dispatch_each(&self, notifications: Vec<Notification>) -> SweepReport {
        let mut report = SweepReport {
            selected: notifications.len(),
            ..Default::default()
        };
        for notification in notifications {
            let id = notification.id;
            report.record(self.dispatcher.dispatch(notification).await, id);
        }
        report
    }

    /// PENDING rows whose schedule arrived, plus unscheduled rows whose
    /// immediate dispatch never completed.
    pub async fn due_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, NotifierError> {
        let orphaned_before = now - Duration::seconds(IMMEDIATE_WINDOW_SECS);
        let due = self
            .store
            .find_due(now, orphaned_before, SWEEP_BATCH_SIZE)
            .await?;
        Ok(self.dispatch_each(due).await)
    }

    /// RETRYING rows under the ceiling whose backoff has elapsed.
    pub async fn retry_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, NotifierError> {
        let retrying = self
            .store
            .find_retrying(self.dispatcher.policy().max_retries, SWEEP_BATCH_SIZE)
            .await?;
        let elapsed: Vec<Notification> = retrying
            .into_iter()
            .filter(|n| n.scheduled_at.map_or(true, |at| at <= now))
            .collect();
        Ok(self.dispatch_each(elapsed).await)
    }

    /// Settled notifications older than the retention window. Nothing is deleted.
    pub async fn retention_sweep(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, NotifierError> {
        let cutoff = now - self.retention;
        let candidates = self
            .store
            .find_completed_before(cutoff, self.dispatcher.policy().max_retries, SWEEP_BATCH_SIZE)
            .await?;
        if !candidates.is_empty() {
            tracing::info!(
                count = candidates.len(),
                %cutoff,
                "Notifications eligible for cleanup"
            );
        }
        Ok(candidates)
    }
}
