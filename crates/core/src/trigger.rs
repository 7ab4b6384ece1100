//! Automation trigger records.

use crate::hash::UInt160;
use serde::{Deserialize, Serialize};

/// Which way a price or threshold comparison fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

/// A user-registered condition. The four kinds are closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Fires every `interval_ms`, starting at `start_at_ms` when given.
    Time {
        interval_ms: u64,
        #[serde(default)]
        start_at_ms: Option<u64>,
    },
    /// Fires when the named feed crosses `threshold` in `direction`.
    Price {
        feed: String,
        threshold: u64,
        direction: Direction,
    },
    /// Fires when an on-chain balance or counter crosses `threshold`.
    Threshold {
        contract: UInt160,
        method: String,
        threshold: u64,
        direction: Direction,
    },
    /// Fires on a matching contract notification.
    Event {
        contract: UInt160,
        event_name: String,
    },
}

impl TriggerCondition {
    pub fn kind_str(&self) -> &'static str {
        match self {
            TriggerCondition::Time { .. } => "time",
            TriggerCondition::Price { .. } => "price",
            TriggerCondition::Threshold { .. } => "threshold",
            TriggerCondition::Event { .. } => "event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl TriggerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TriggerStatus::Cancelled | TriggerStatus::Expired)
    }
}

/// The persisted trigger row, mutated only by the automation scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub trigger_id: u64,
    pub owner_app_id: String,
    pub condition: TriggerCondition,
    pub callback_contract: UInt160,
    pub callback_method: String,
    pub status: TriggerStatus,
    pub max_executions: Option<u32>,
    pub executions_used: u32,
    pub last_executed_at_ms: Option<u64>,
    pub expires_at_ms: Option<u64>,
    /// Scheduling state: next fire time for time triggers.
    pub next_fire_ms: Option<u64>,
    /// Edge-trigger state: false once fired, true again after the
    /// condition stops holding.
    pub armed: bool,
}

impl TriggerRecord {
    /// Whether the trigger has exhausted its execution or time budget.
    pub fn exhausted(&self, now_ms: u64) -> bool {
        if let Some(max) = self.max_executions {
            if self.executions_used >= max {
                return true;
            }
        }
        matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}
