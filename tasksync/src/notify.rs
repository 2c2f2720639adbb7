//! Local notification service contract and an in-process implementation.
//!
//! A [`NotificationService`] accepts a [`NotificationContent`] plus one of
//! three [`ReminderTrigger`] shapes and hands back an opaque
//! [`NotificationId`]. [`TokioNotifier`] arms one tokio timer per request and
//! broadcasts each fired notification on [`TokioNotifier::fired_rx`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{NotificationError, TriggerRejection};

/// Opaque handle returned by [`NotificationService::schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: Value,
    pub sound: bool,
    pub badge: Option<u32>,
}

impl NotificationContent {
    /// Content for a task due-date reminder.
    pub fn task_reminder(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: json!({ "type": "task" }),
            sound: true,
            badge: Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    RelativeSeconds,
    AbsoluteDate,
    CalendarFields,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 3] = [
        TriggerKind::RelativeSeconds,
        TriggerKind::AbsoluteDate,
        TriggerKind::CalendarFields,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::RelativeSeconds => "relative_seconds",
            TriggerKind::AbsoluteDate => "absolute_date",
            TriggerKind::CalendarFields => "calendar_fields",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown trigger kind: {0}")]
pub struct UnknownTriggerKind(pub String);

impl FromStr for TriggerKind {
    type Err = UnknownTriggerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownTriggerKind(s.to_string()))
    }
}

/// Wall-clock fields in the device's local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl CalendarFields {
    /// Decompose `at` in the given local offset. Seconds are always zero.
    pub fn from_instant(at: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = at.with_timezone(&offset);
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
            second: 0,
        }
    }

    /// The instant these fields name in `offset`, if they form a valid time.
    pub fn to_instant(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        offset
            .with_ymd_and_hms(
                self.year,
                self.month,
                self.day,
                self.hour,
                self.minute,
                self.second,
            )
            .single()
            .map(|local| local.with_timezone(&Utc))
    }

    /// The instant these fields name on `clock`'s local calendar.
    ///
    /// The offset is the one in effect at the named time, not at `now`, so a
    /// daylight-saving change in between does not shift the result.
    pub fn resolve(&self, clock: &dyn Clock, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let candidate = self.to_instant(clock.local_offset(now))?;
        let offset = clock.local_offset(candidate);
        let resolved = self.to_instant(offset)?;
        // In a skipped hour neither offset round-trips; keep the first guess.
        if clock.local_offset(resolved) == offset {
            Some(resolved)
        } else {
            Some(candidate)
        }
    }
}

/// When a notification should fire. Every shape is non-repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderTrigger {
    RelativeSeconds { seconds: u64 },
    AbsoluteDate { at: DateTime<Utc> },
    CalendarFields(CalendarFields),
}

impl ReminderTrigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            ReminderTrigger::RelativeSeconds { .. } => TriggerKind::RelativeSeconds,
            ReminderTrigger::AbsoluteDate { .. } => TriggerKind::AbsoluteDate,
            ReminderTrigger::CalendarFields(_) => TriggerKind::CalendarFields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub id: NotificationId,
    pub content: NotificationContent,
    pub trigger: ReminderTrigger,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredNotification {
    pub id: NotificationId,
    pub content: NotificationContent,
    pub fired_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    async fn schedule(
        &self,
        content: NotificationContent,
        trigger: ReminderTrigger,
    ) -> Result<NotificationId, TriggerRejection>;

    async fn cancel(&self, id: &NotificationId) -> Result<(), NotificationError>;

    async fn cancel_all(&self) -> Result<(), NotificationError>;

    async fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError>;
}

/// Timer-backed [`NotificationService`] running on the tokio runtime.
#[derive(Clone)]
pub struct TokioNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    clock: Arc<dyn Clock>,
    supported: Vec<TriggerKind>,
    armed: Mutex<HashMap<NotificationId, Armed>>,
    fired_tx: broadcast::Sender<FiredNotification>,
}

struct Armed {
    info: PendingNotification,
    timer: AbortHandle,
}

impl TokioNotifier {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, TriggerKind::ALL.to_vec())
    }

    /// A notifier that rejects every trigger kind not in `kinds`.
    pub fn supporting(clock: Arc<dyn Clock>, kinds: impl IntoIterator<Item = TriggerKind>) -> Self {
        Self::build(clock, kinds.into_iter().collect())
    }

    fn build(clock: Arc<dyn Clock>, supported: Vec<TriggerKind>) -> Self {
        let (fired_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(NotifierInner {
                clock,
                supported,
                armed: Mutex::new(HashMap::new()),
                fired_tx,
            }),
        }
    }

    /// Listen for notifications as they fire.
    pub fn fired_rx(&self) -> broadcast::Receiver<FiredNotification> {
        self.inner.fired_tx.subscribe()
    }

    fn fire_time(&self, trigger: &ReminderTrigger) -> Result<(DateTime<Utc>, Duration), TriggerRejection> {
        let now = self.inner.clock.now();
        let fire_at = match trigger {
            ReminderTrigger::RelativeSeconds { seconds: 0 } => {
                return Err(TriggerRejection::Invalid(
                    "relative delay must be at least one second".into(),
                ));
            }
            ReminderTrigger::RelativeSeconds { seconds } => {
                let delay = Duration::from_secs(*seconds);
                let fire_at = chrono::TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| TriggerRejection::Invalid("relative delay out of range".into()))?;
                return Ok((fire_at, delay));
            }
            ReminderTrigger::AbsoluteDate { at } => *at,
            ReminderTrigger::CalendarFields(fields) => fields
                .resolve(self.inner.clock.as_ref(), now)
                .ok_or_else(|| {
                    TriggerRejection::Invalid(format!("{fields:?} is not a valid local time"))
                })?,
        };
        if fire_at <= now {
            return Err(TriggerRejection::NotInFuture);
        }
        let delay = (fire_at - now)
            .to_std()
            .map_err(|e| TriggerRejection::Invalid(e.to_string()))?;
        Ok((fire_at, delay))
    }
}

impl Default for TokioNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifierInner {
    fn fire(&self, id: &NotificationId) {
        let armed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        let Some(armed) = armed else {
            return;
        };
        log::info!(
            "Reminder {} fired: {}",
            armed.info.id,
            armed.info.content.title
        );
        let _ = self.fired_tx.send(FiredNotification {
            id: armed.info.id,
            content: armed.info.content,
            fired_at: self.clock.now(),
        });
    }
}

#[async_trait::async_trait]
impl NotificationService for TokioNotifier {
    async fn schedule(
        &self,
        content: NotificationContent,
        trigger: ReminderTrigger,
    ) -> Result<NotificationId, TriggerRejection> {
        let kind = trigger.kind();
        if !self.inner.supported.contains(&kind) {
            return Err(TriggerRejection::Unsupported(kind));
        }
        let (fire_at, delay) = self.fire_time(&trigger)?;
        let id = NotificationId(Uuid::new_v4().to_string());

        // The map lock is held while arming so the timer cannot fire before
        // its entry exists.
        let mut armed = self.inner.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = self.inner.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(&timer_id);
        })
        .abort_handle();
        armed.insert(
            id.clone(),
            Armed {
                info: PendingNotification {
                    id: id.clone(),
                    content,
                    trigger,
                    fire_at,
                },
                timer,
            },
        );
        drop(armed);

        log::debug!("Armed {kind} notification {id} for {fire_at}");
        Ok(id)
    }

    async fn cancel(&self, id: &NotificationId) -> Result<(), NotificationError> {
        let armed = self
            .inner
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| NotificationError::UnknownId(id.to_string()))?;
        armed.timer.abort();
        log::debug!("Cancelled notification {id}");
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), NotificationError> {
        let drained: Vec<Armed> = self
            .inner
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, armed)| armed)
            .collect();
        for armed in &drained {
            armed.timer.abort();
        }
        log::debug!("Cancelled {} notifications", drained.len());
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError> {
        let mut pending: Vec<PendingNotification> = self
            .inner
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|armed| armed.info.clone())
            .collect();
        pending.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::clock::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn content() -> NotificationContent {
        NotificationContent::task_reminder("Dentist", "bring card")
    }

    #[test]
    fn test_task_reminder_content() {
        let c = content();
        assert_eq!(c.data, json!({"type": "task"}));
        assert!(c.sound);
        assert_eq!(c.badge, Some(1));
    }

    #[test]
    fn test_trigger_kind_parses_its_display_form() {
        for kind in TriggerKind::ALL {
            assert_eq!(kind.to_string().parse::<TriggerKind>(), Ok(kind));
        }
        assert!("hourly".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_calendar_fields_use_local_offset_and_drop_seconds() {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 23, 34, 56).unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let fields = CalendarFields::from_instant(at, plus_two);
        assert_eq!(
            fields,
            CalendarFields {
                year: 2026,
                month: 4,
                day: 2,
                hour: 1,
                minute: 34,
                second: 0,
            }
        );
        assert_eq!(
            fields.to_instant(plus_two),
            Some(Utc.with_ymd_and_hms(2026, 4, 1, 23, 34, 0).unwrap())
        );
    }

    /// UTC+1 until 13:00 UTC on the test day, UTC+2 afterwards.
    struct DstClock(DateTime<Utc>);

    impl DstClock {
        fn switch_at() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 4, 1, 13, 0, 0).unwrap()
        }
    }

    impl Clock for DstClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset {
            let hours = if at < Self::switch_at() { 1 } else { 2 };
            FixedOffset::east_opt(hours * 3600).unwrap()
        }
    }

    #[test]
    fn test_calendar_fields_resolve_across_offset_change() {
        let clock = DstClock(Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap());
        let target = Utc.with_ymd_and_hms(2026, 4, 1, 15, 0, 0).unwrap();
        let fields = CalendarFields::from_instant(target, clock.local_offset(target));
        assert_eq!(fields.hour, 17);
        assert_eq!(fields.resolve(&clock, clock.now()), Some(target));

        // Back across the change: fields named before the switch.
        let earlier = Utc.with_ymd_and_hms(2026, 4, 1, 12, 30, 0).unwrap();
        let fields = CalendarFields::from_instant(earlier, clock.local_offset(earlier));
        let later = DstClock(Utc.with_ymd_and_hms(2026, 4, 1, 14, 0, 0).unwrap());
        assert_eq!(fields.resolve(&later, later.now()), Some(earlier));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calendar_trigger_fires_at_named_local_time_after_offset_change() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(DstClock(now));
        let target = Utc.with_ymd_and_hms(2026, 4, 1, 15, 0, 0).unwrap();
        let fields = CalendarFields::from_instant(target, clock.local_offset(target));
        let notifier = TokioNotifier::with_clock(clock);
        let mut fired = notifier.fired_rx();

        notifier
            .schedule(content(), ReminderTrigger::CalendarFields(fields))
            .await
            .unwrap();
        let pending = notifier.pending().await.unwrap();
        assert_eq!(pending[0].fire_at, target);

        let early = tokio::time::timeout(Duration::from_secs(3 * 3600 - 1), fired.recv()).await;
        assert!(early.is_err());
        let note = tokio::time::timeout(Duration::from_secs(2), fired.recv())
            .await
            .expect("Reminder never fired")
            .unwrap();
        assert_eq!(note.content.title, "Dentist");
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_trigger_fires_after_delay() {
        let notifier = TokioNotifier::with_clock(clock());
        let mut fired = notifier.fired_rx();
        let id = notifier
            .schedule(content(), ReminderTrigger::RelativeSeconds { seconds: 10 })
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_secs(9), fired.recv()).await;
        assert!(early.is_err());

        let note = fired.recv().await.unwrap();
        assert_eq!(note.id, id);
        assert_eq!(note.content.title, "Dentist");
        assert!(notifier.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_kind_is_rejected() {
        let notifier = TokioNotifier::supporting(clock(), [TriggerKind::AbsoluteDate]);
        let err = notifier
            .schedule(content(), ReminderTrigger::RelativeSeconds { seconds: 5 })
            .await
            .unwrap_err();
        assert_eq!(err, TriggerRejection::Unsupported(TriggerKind::RelativeSeconds));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_target_must_be_in_future() {
        let clock = clock();
        let notifier = TokioNotifier::with_clock(clock.clone());
        let err = notifier
            .schedule(content(), ReminderTrigger::AbsoluteDate { at: clock.now() })
            .await
            .unwrap_err();
        assert_eq!(err, TriggerRejection::NotInFuture);

        let zero = notifier
            .schedule(content(), ReminderTrigger::RelativeSeconds { seconds: 0 })
            .await
            .unwrap_err();
        assert!(matches!(zero, TriggerRejection::Invalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let clock = clock();
        let notifier = TokioNotifier::with_clock(clock.clone());
        let mut fired = notifier.fired_rx();
        let at = clock.now() + TimeDelta::seconds(30);
        let id = notifier
            .schedule(content(), ReminderTrigger::AbsoluteDate { at })
            .await
            .unwrap();

        let pending = notifier.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, at);

        notifier.cancel(&id).await.unwrap();
        assert_eq!(
            notifier.cancel(&id).await,
            Err(NotificationError::UnknownId(id.to_string()))
        );
        let result = tokio::time::timeout(Duration::from_secs(60), fired.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_clears_pending() {
        let notifier = TokioNotifier::with_clock(clock());
        for seconds in [5, 10, 15] {
            notifier
                .schedule(content(), ReminderTrigger::RelativeSeconds { seconds })
                .await
                .unwrap();
        }
        assert_eq!(notifier.pending().await.unwrap().len(), 3);
        notifier.cancel_all().await.unwrap();
        assert!(notifier.pending().await.unwrap().is_empty());
    }
}
