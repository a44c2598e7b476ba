use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task entity. Every field is persisted encrypted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub priority: i64,
    pub estimate_hours: f64,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub notes: Option<String>,
    pub priority: i64,
    pub estimate_hours: f64,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

impl Task {
    pub fn new(input: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            notes: input.notes,
            priority: input.priority,
            estimate_hours: input.estimate_hours,
            done: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Simple repository contract for task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Task>>;
    async fn create(&self, input: NewTask) -> anyhow::Result<Task>;
    async fn set_done(&self, id: Uuid, done: bool) -> anyhow::Result<Task>;
    /// Remove a task; returns whether it existed.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_open_with_matching_timestamps() {
        let task = Task::new(NewTask {
            priority: 2,
            ..NewTask::titled("buy milk")
        });
        assert_eq!(task.title, "buy milk");
        assert_eq!(task.priority, 2);
        assert!(!task.done);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.notes.is_none());
    }
}
