//! Reminder scheduling.
//!
//! Turns a due date into a notification trigger. Triggers are tried in the
//! configured strategy order (relative seconds, absolute date, calendar
//! fields by default); each strategy is attempted at most once and the ladder
//! stops at the first acceptance or at a rejection not caused by the trigger
//! itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::{ScheduleError, TriggerRejection};
use crate::notify::{
    CalendarFields, NotificationContent, NotificationId, NotificationService, PendingNotification,
    ReminderTrigger, TriggerKind,
};

#[derive(Clone)]
pub struct ReminderScheduler {
    service: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    strategies: Vec<TriggerKind>,
}

/// Whole seconds from `now` until `target`, rounded towards negative infinity.
pub fn seconds_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let delta = target - now;
    let seconds = delta.num_seconds();
    if delta.subsec_nanos() < 0 {
        seconds - 1
    } else {
        seconds
    }
}

impl ReminderScheduler {
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self {
            service,
            clock: Arc::new(SystemClock),
            strategies: TriggerKind::ALL.to_vec(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the trigger ladder. Order is preserved; duplicates are dropped.
    pub fn with_strategies(mut self, strategies: impl IntoIterator<Item = TriggerKind>) -> Self {
        self.strategies.clear();
        for kind in strategies {
            if !self.strategies.contains(&kind) {
                self.strategies.push(kind);
            }
        }
        self
    }

    pub fn strategies(&self) -> &[TriggerKind] {
        &self.strategies
    }

    /// Schedule a reminder firing at `target`.
    pub async fn schedule(
        &self,
        title: &str,
        body: &str,
        target: DateTime<Utc>,
    ) -> Result<NotificationId, ScheduleError> {
        let now = self.clock.now();
        let seconds = seconds_until(target, now);
        if seconds < 0 {
            log::warn!("Not scheduling reminder for '{title}': due {}s ago", -seconds);
            return Err(ScheduleError::PastDue {
                seconds_late: -seconds,
            });
        }

        let content = NotificationContent::task_reminder(title, body);
        let mut attempts = Vec::new();

        for &kind in &self.strategies {
            let trigger = match self.trigger_for(kind, target, now, seconds) {
                Ok(trigger) => trigger,
                Err(reason) => {
                    log::debug!("Skipping {kind} trigger for '{title}': {reason}");
                    attempts.push((kind, reason));
                    continue;
                }
            };

            match self.service.schedule(content.clone(), trigger).await {
                Ok(id) => {
                    log::info!("Scheduled reminder {id} for '{title}' at {target} via {kind}");
                    return Ok(id);
                }
                Err(reason) => {
                    log::debug!("{kind} trigger for '{title}' rejected: {reason}");
                    let escalate = reason.is_trigger_related();
                    attempts.push((kind, reason));
                    if !escalate {
                        break;
                    }
                }
            }
        }

        let err = ScheduleError::Scheduling { attempts };
        log::warn!("Failed to schedule reminder for '{title}': {err}");
        Err(err)
    }

    fn trigger_for(
        &self,
        kind: TriggerKind,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
        seconds: i64,
    ) -> Result<ReminderTrigger, TriggerRejection> {
        match kind {
            TriggerKind::RelativeSeconds => Ok(ReminderTrigger::RelativeSeconds {
                seconds: seconds.max(1).unsigned_abs(),
            }),
            _ if target <= now => Err(TriggerRejection::NotInFuture),
            TriggerKind::AbsoluteDate => Ok(ReminderTrigger::AbsoluteDate { at: target }),
            TriggerKind::CalendarFields => Ok(ReminderTrigger::CalendarFields(
                CalendarFields::from_instant(target, self.clock.local_offset(target)),
            )),
        }
    }

    /// Cancel a reminder. Failures are logged, never returned.
    pub async fn cancel(&self, id: &NotificationId) {
        match self.service.cancel(id).await {
            Ok(()) => log::debug!("Cancelled reminder {id}"),
            Err(e) => log::warn!("Failed to cancel reminder {id}: {e}"),
        }
    }

    /// Cancel every outstanding reminder, best effort.
    pub async fn cancel_all(&self) {
        match self.service.cancel_all().await {
            Ok(()) => log::info!("Cancelled all reminders"),
            Err(e) => log::warn!("Failed to cancel all reminders: {e}"),
        }
    }

    /// List scheduled reminders. Failures yield an empty list.
    pub async fn pending(&self) -> Vec<PendingNotification> {
        self.service.pending().await.unwrap_or_else(|e| {
            log::warn!("Failed to list pending reminders: {e}");
            Vec::new()
        })
    }
}
