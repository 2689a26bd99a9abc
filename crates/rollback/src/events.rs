//! Rollback events and their fixed lifecycle. An event is created the
//! instant a trigger fires, carries a frozen ordered snapshot of its actions,
//! and becomes immutable once it reaches a terminal state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::types::NotificationChannel;
use guard_core::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single ordered mitigation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackAction {
    pub order: u32,
    pub kind: RollbackActionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackActionKind {
    /// Force a named flag to 0% exposure.
    DisableFeature { flag: String },
    /// Lower a set of flags to at most the given percentage.
    ReduceRollout { flags: Vec<String>, percentage: u8 },
    /// Force every exposed flag to 0%.
    EmergencyRollback,
    Notify {
        channel: NotificationChannel,
        message: String,
    },
    /// Traffic redirection is not implemented; executing this action logs
    /// and skips it.
    Redirect { target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    System,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The lifecycle admits exactly three transitions.
    pub fn can_transition(&self, to: EventStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub trigger_name: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub triggered_by: TriggeredBy,
    /// Ordered snapshot frozen at creation; later trigger edits do not
    /// affect an event already in flight.
    pub actions: Vec<RollbackAction>,
    pub status: EventStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Aggregate counters for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Append-only event log, capped at a configured size.
pub struct EventHistory {
    events: DashMap<Uuid, RollbackEvent>,
    limit: usize,
}

impl EventHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            events: DashMap::new(),
            limit,
        }
    }

    pub fn insert(&self, event: RollbackEvent) {
        self.events.insert(event.id, event);
        if self.events.len() > self.limit {
            let oldest = self
                .events
                .iter()
                .min_by_key(|e| e.value().timestamp)
                .map(|e| *e.key());
            if let Some(id) = oldest {
                self.events.remove(&id);
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<RollbackEvent> {
        self.events.get(&id).map(|e| e.value().clone())
    }

    /// Advance an event through its lifecycle. Terminal events reject any
    /// further transition.
    pub fn transition(
        &self,
        id: Uuid,
        to: EventStatus,
        error: Option<String>,
    ) -> GuardResult<()> {
        let mut entry = self
            .events
            .get_mut(&id)
            .ok_or_else(|| GuardError::Validation(format!("unknown rollback event {id}")))?;
        if !entry.status.can_transition(to) {
            return Err(GuardError::Validation(format!(
                "invalid event transition {:?} -> {:?}",
                entry.status, to
            )));
        }
        entry.status = to;
        if to.is_terminal() {
            entry.completed_at = Some(Utc::now());
            entry.error = error;
        }
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Vec<RollbackEvent> {
        let mut events: Vec<_> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    pub fn stats(&self) -> RollbackStats {
        let mut stats = RollbackStats {
            total: 0,
            completed: 0,
            failed: 0,
            last_event_at: None,
        };
        for entry in self.events.iter() {
            let event = entry.value();
            stats.total += 1;
            match event.status {
                EventStatus::Completed => stats.completed += 1,
                EventStatus::Failed => stats.failed += 1,
                _ => {}
            }
            if stats.last_event_at.map_or(true, |t| event.timestamp > t) {
                stats.last_event_at = Some(event.timestamp);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: EventStatus) -> RollbackEvent {
        RollbackEvent {
            id: Uuid::new_v4(),
            trigger_id: Uuid::new_v4(),
            trigger_name: "t".into(),
            timestamp: Utc::now(),
            reason: "test".into(),
            triggered_by: TriggeredBy::System,
            actions: Vec::new(),
            status,
            completed_at: None,
            error: None,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let history = EventHistory::new(100);
        let e = event(EventStatus::Pending);
        let id = e.id;
        history.insert(e);

        history.transition(id, EventStatus::InProgress, None).unwrap();
        history.transition(id, EventStatus::Completed, None).unwrap();
        let done = history.get(id).unwrap();
        assert_eq!(done.status, EventStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_terminal_is_immutable() {
        let history = EventHistory::new(100);
        let e = event(EventStatus::Pending);
        let id = e.id;
        history.insert(e);

        history.transition(id, EventStatus::InProgress, None).unwrap();
        history
            .transition(id, EventStatus::Failed, Some("boom".into()))
            .unwrap();
        assert!(history.transition(id, EventStatus::InProgress, None).is_err());
        assert!(history.transition(id, EventStatus::Completed, None).is_err());
        assert_eq!(history.get(id).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_skipping_in_progress_is_rejected() {
        let history = EventHistory::new(100);
        let e = event(EventStatus::Pending);
        let id = e.id;
        history.insert(e);
        assert!(history.transition(id, EventStatus::Completed, None).is_err());
    }

    #[test]
    fn test_history_cap_drops_oldest() {
        let history = EventHistory::new(3);
        let mut first_id = None;
        for i in 0..4 {
            let mut e = event(EventStatus::Pending);
            e.timestamp = Utc::now() + chrono::Duration::seconds(i);
            if i == 0 {
                first_id = Some(e.id);
            }
            history.insert(e);
        }
        assert_eq!(history.recent(10).len(), 3);
        assert!(history.get(first_id.unwrap()).is_none());
    }

    #[test]
    fn test_stats_counts() {
        let history = EventHistory::new(100);
        let e1 = event(EventStatus::Pending);
        let id1 = e1.id;
        history.insert(e1);
        history.transition(id1, EventStatus::InProgress, None).unwrap();
        history.transition(id1, EventStatus::Completed, None).unwrap();
        history.insert(event(EventStatus::Pending));

        let stats = history.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert!(stats.last_event_at.is_some());
    }
}
