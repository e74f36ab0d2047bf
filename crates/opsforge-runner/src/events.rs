//! Task lifecycle events fanned out to SSE clients.

use serde::Serialize;
use tokio::sync::broadcast;

use opsforge_core::types::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    pub task: Task,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; lagging or absent receivers are not an error.
    pub fn publish(&self, kind: TaskEventKind, task: Task) {
        let _ = self.tx.send(TaskEvent {
            kind,
            task,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let task = Task::new("t", "a");
        broadcaster.publish(TaskEventKind::TaskCreated, task.clone());
        broadcaster.publish(TaskEventKind::TaskUpdated, task);

        assert_eq!(rx.recv().await.unwrap().kind, TaskEventKind::TaskCreated);
        assert_eq!(rx.recv().await.unwrap().kind, TaskEventKind::TaskUpdated);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(TaskEventKind::TaskFailed, Task::new("t", "a"));
    }

    #[test]
    fn event_serialization_shape() {
        let event = TaskEvent {
            kind: TaskEventKind::TaskCompleted,
            task: Task::new("t", "a"),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_completed");
        assert!(json["task"]["id"].is_string());
    }
}
