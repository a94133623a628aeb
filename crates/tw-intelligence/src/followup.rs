//! Follow-up scheduling core.
//!
//! Periodic "how is this task going?" nudges for assigned subtasks.
//! Delivery itself (chat message, email) lives behind [`NotificationSink`]
//! and is out of scope here; this module owns the part that must be
//! correct: the idempotent "already notified" check, keyed by
//! `(task id, notification epoch)`. Two overlapping scheduler instances
//! sharing a ledger send at most one nudge per task per epoch — there is
//! no bare sleep loop to race against.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A task eligible for follow-up nudges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupTicket {
    pub task_id: String,
    pub title: String,
    pub assigned_to: String,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound delivery boundary. Implementations forward the nudge to a chat
/// channel, email, or anything else; best-effort only.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, ticket: &FollowupTicket) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// FollowupLedger
// ---------------------------------------------------------------------------

/// Epoch-keyed dedup ledger for follow-up notifications.
pub struct FollowupLedger {
    interval_secs: i64,
    seen: DashSet<(String, i64)>,
}

impl FollowupLedger {
    /// `interval_secs` is the follow-up cadence; one nudge per task is
    /// allowed within each interval-sized epoch.
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs: interval_secs.max(1),
            seen: DashSet::new(),
        }
    }

    /// The notification epoch containing `now`.
    pub fn epoch(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.interval_secs)
    }

    /// Atomically claim the `(task, epoch)` slot. Returns `true` exactly
    /// once per slot.
    fn claim(&self, task_id: &str, epoch: i64) -> bool {
        self.seen.insert((task_id.to_string(), epoch))
    }

    /// Release a claimed slot so a failed delivery can be retried within
    /// the same epoch.
    fn release(&self, task_id: &str, epoch: i64) {
        self.seen.remove(&(task_id.to_string(), epoch));
    }

    /// Run one follow-up sweep: notify each ticket at most once for the
    /// epoch containing `now`. Returns the number of nudges delivered.
    /// Delivery failures are logged and released for retry on the next
    /// sweep; they never abort the run.
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        tickets: &[FollowupTicket],
        sink: &dyn NotificationSink,
    ) -> usize {
        let epoch = self.epoch(now);
        let mut delivered = 0;

        for ticket in tickets {
            if !self.claim(&ticket.task_id, epoch) {
                debug!(task_id = %ticket.task_id, epoch, "already notified this epoch");
                continue;
            }
            match sink.notify(ticket).await {
                Ok(()) => {
                    debug!(task_id = %ticket.task_id, epoch, "follow-up sent");
                    delivered += 1;
                }
                Err(e) => {
                    warn!(task_id = %ticket.task_id, error = %e, "follow-up delivery failed");
                    self.release(&ticket.task_id, epoch);
                }
            }
        }

        delivered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
