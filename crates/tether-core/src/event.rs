use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Lifecycle notifications emitted by the dispatcher.
///
/// Delivery is best-effort: publishing never blocks and a missing
/// subscriber is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TaskStarted {
        task_id: Uuid,
        task_name: String,
        started_at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: Uuid,
        task_name: String,
        summary: String,
        tokens_used: u64,
        duration_secs: f64,
    },
    TaskFailed {
        task_id: Uuid,
        task_name: String,
        error: String,
    },
    /// Fired when daily usage crosses a configured threshold.
    DailyBudgetWarning {
        level: BudgetWarningLevel,
        percent: u8,
        input_tokens: u64,
        output_tokens: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWarningLevel {
    Warning,
    Critical,
}

/// A broadcast-based event bus for dispatcher lifecycle pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
