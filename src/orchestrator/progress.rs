//! Per-task progress registry
//!
//! Capabilities report through a [`ProgressFn`]; each report updates the
//! registry and is forwarded as an [`Event::Progress`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{Event, Phase, ProgressFn, TaskId};

/// Latest known progress of one running task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    /// Phase being executed
    pub phase: Phase,
    /// Bytes processed in this phase
    pub bytes_done: u64,
    /// Total bytes, when the capability knows it
    pub bytes_total: Option<u64>,
}

/// Shared map of running tasks to their progress
#[derive(Clone, Debug, Default)]
pub struct ProgressRegistry {
    entries: Arc<Mutex<HashMap<TaskId, TaskProgress>>>,
}

impl ProgressRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // Entries stay consistent even if a reporter panicked mid-update
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskProgress>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `id` entered `phase`, resetting its byte counters
    pub fn enter_phase(&self, id: &TaskId, phase: Phase) {
        self.lock().insert(
            id.clone(),
            TaskProgress {
                phase,
                bytes_done: 0,
                bytes_total: None,
            },
        );
    }

    /// Update byte counters for `id`
    pub fn update(&self, id: &TaskId, phase: Phase, bytes_done: u64, bytes_total: Option<u64>) {
        self.lock().insert(
            id.clone(),
            TaskProgress {
                phase,
                bytes_done,
                bytes_total,
            },
        );
    }

    /// Forget `id`
    pub fn remove(&self, id: &TaskId) {
        self.lock().remove(id);
    }

    /// Progress of `id`, if it is running
    pub fn get(&self, id: &TaskId) -> Option<TaskProgress> {
        self.lock().get(id).copied()
    }

    /// Every running task, sorted by id
    pub fn snapshot(&self) -> Vec<(TaskId, TaskProgress)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, progress)| (id.clone(), *progress))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Callback handed to a capability for one task phase
    pub fn reporter(
        &self,
        id: TaskId,
        phase: Phase,
        event_tx: broadcast::Sender<Event>,
    ) -> ProgressFn {
        let registry = self.clone();
        Arc::new(move |bytes_done, bytes_total| {
            registry.update(&id, phase, bytes_done, bytes_total);
            // No subscribers is fine
            let _ = event_tx.send(Event::Progress {
                id: id.clone(),
                phase,
                bytes_done,
                bytes_total,
            });
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_updates_registry_and_emits_event() {
        let registry = ProgressRegistry::new();
        let (tx, mut rx) = broadcast::channel(8);
        let id = TaskId::from("t1");
        registry.enter_phase(&id, Phase::Download);

        let report = registry.reporter(id.clone(), Phase::Download, tx);
        report(50, Some(100));

        assert_eq!(
            registry.get(&id),
            Some(TaskProgress {
                phase: Phase::Download,
                bytes_done: 50,
                bytes_total: Some(100),
            })
        );
        match rx.try_recv().unwrap() {
            Event::Progress {
                bytes_done,
                bytes_total,
                ..
            } => {
                assert_eq!(bytes_done, 50);
                assert_eq!(bytes_total, Some(100));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_enter_phase_resets_and_remove_forgets() {
        let registry = ProgressRegistry::new();
        let id = TaskId::from("t2");
        registry.update(&id, Phase::Download, 10, Some(10));
        registry.enter_phase(&id, Phase::Upload);
        assert_eq!(registry.get(&id).unwrap().bytes_done, 0);
        assert_eq!(registry.snapshot().len(), 1);

        registry.remove(&id);
        assert!(registry.get(&id).is_none());
        assert!(registry.snapshot().is_empty());
    }
}
