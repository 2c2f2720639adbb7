//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object or an empty
//! environment yields [`TaskSyncConfig::default`].

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::notify::TriggerKind;
use crate::store::DEFAULT_COLLECTION;

pub const DEFAULT_REMINDER_PLACEHOLDER: &str = "Task reminder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSyncConfig {
    /// Document collection holding tasks.
    pub collection: String,
    /// Reminder body used when a task has no description.
    pub reminder_placeholder: String,
    /// Trigger ladder, tried in order.
    pub trigger_strategies: Vec<TriggerKind>,
    pub cancel_reminders_on_sign_out: bool,
}

impl Default for TaskSyncConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            reminder_placeholder: DEFAULT_REMINDER_PLACEHOLDER.to_string(),
            trigger_strategies: TriggerKind::ALL.to_vec(),
            cancel_reminders_on_sign_out: false,
        }
    }
}

impl TaskSyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `TASKSYNC_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from a variable lookup. Unset variables keep their
    /// defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `TASKSYNC_COLLECTION` | `collection` |
    /// | `TASKSYNC_REMINDER_PLACEHOLDER` | `reminder_placeholder` |
    /// | `TASKSYNC_TRIGGER_STRATEGIES` | `trigger_strategies` (comma separated) |
    /// | `TASKSYNC_CANCEL_REMINDERS_ON_SIGN_OUT` | `cancel_reminders_on_sign_out` |
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(collection) = lookup("TASKSYNC_COLLECTION") {
            config.collection = collection;
        }
        if let Some(placeholder) = lookup("TASKSYNC_REMINDER_PLACEHOLDER") {
            config.reminder_placeholder = placeholder;
        }
        if let Some(raw) = lookup("TASKSYNC_TRIGGER_STRATEGIES") {
            config.trigger_strategies = raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|e| invalid("TASKSYNC_TRIGGER_STRATEGIES", e))?;
        }
        if let Some(raw) = lookup("TASKSYNC_CANCEL_REMINDERS_ON_SIGN_OUT") {
            config.cancel_reminders_on_sign_out = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(invalid(
                        "TASKSYNC_CANCEL_REMINDERS_ON_SIGN_OUT",
                        format!("expected a boolean, got {other:?}"),
                    ));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(invalid("collection", "must not be empty"));
        }
        if self.trigger_strategies.is_empty() {
            return Err(invalid("trigger_strategies", "at least one strategy is required"));
        }
        for (i, kind) in self.trigger_strategies.iter().enumerate() {
            if self.trigger_strategies[..i].contains(kind) {
                return Err(invalid("trigger_strategies", format!("{kind} is listed twice")));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
