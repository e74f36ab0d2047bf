//! Persisted task store.
//!
//! Tasks live in memory and are mirrored to a JSON snapshot with a
//! debounced write-through; the snapshot is reloaded on startup. Tasks are
//! never deleted by the core.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use opsforge_core::types::{Task, TaskStatus};
use opsforge_core::{OpsforgeError, Result};

const SNAPSHOT_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct TaskStore {
    path: PathBuf,
    tasks: Mutex<HashMap<String, Task>>,
    flush_scheduled: AtomicBool,
}

impl TaskStore {
    /// Open the store, loading the snapshot when one exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tasks = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let list: Vec<Task> = serde_json::from_str(&raw).unwrap_or_default();
            list.into_iter()
                .map(|t| (t.id.to_string(), t))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
            flush_scheduled: AtomicBool::new(false),
        })
    }

    pub fn insert(self: &Arc<Self>, task: Task) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.insert(task.id.to_string(), task);
        }
        self.schedule_flush();
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut list: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Mutate one task under the lock. The closure's result is returned.
    pub fn update<R>(
        self: &Arc<Self>,
        id: &str,
        mutate: impl FnOnce(&mut Task) -> R,
    ) -> Result<R> {
        let result = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks.get_mut(id).ok_or_else(|| OpsforgeError::TaskNotFound {
                id: id.to_string(),
            })?;
            mutate(task)
        };
        self.schedule_flush();
        Ok(result)
    }

    /// Forward status transition with persistence. Fails on regressions.
    pub fn transition(self: &Arc<Self>, id: &str, next: TaskStatus) -> Result<()> {
        self.update(id, |task| task.transition(next))?
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(SNAPSHOT_DEBOUNCE).await;
            store.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = store.flush_now() {
                warn!(error = %e, "task snapshot flush failed");
            }
        });
    }

    /// Write the snapshot immediately (shutdown path).
    pub fn flush_now(&self) -> Result<()> {
        let list = self.list();
        let raw = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, raw)?;
        debug!(tasks = list.len(), "task snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Arc<TaskStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn insert_get_list_round_trip() {
        let (_dir, store) = store();
        let task = Task::new("fix it", "alice");
        let id = task.id.to_string();
        store.insert(task);

        assert!(store.get(&id).is_some());
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_reload() {
        let (dir, store) = store();
        let task = Task::new("persisted", "bob");
        let id = task.id.to_string();
        store.insert(task);
        store.flush_now().unwrap();

        let reloaded = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let task = reloaded.get(&id).unwrap();
        assert_eq!(task.prompt, "persisted");
        assert_eq!(task.created_by, "bob");
    }

    #[tokio::test]
    async fn transitions_are_monotonic() {
        let (_dir, store) = store();
        let task = Task::new("t", "a");
        let id = task.id.to_string();
        store.insert(task);

        store.transition(&id, TaskStatus::Running).unwrap();
        store.transition(&id, TaskStatus::Completed).unwrap();
        assert!(store.transition(&id, TaskStatus::Running).is_err());
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn update_missing_task_errors() {
        let (_dir, store) = store();
        assert!(store.update("nope", |t| t.output.push('x')).is_err());
    }
}
