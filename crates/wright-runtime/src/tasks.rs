use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work the model planned for itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ordered list of a session's tasks. Tasks are never deleted.
///
/// No internal locking: it lives inside the session state and is only
/// mutated by that session's own loop.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one pending task per entry, in input order.
    pub fn create<I, S>(&mut self, contents: I) -> Vec<Task>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut created = Vec::new();
        for content in contents {
            self.next_id += 1;
            let now = Utc::now();
            let task = Task {
                id: format!("task_{}", self.next_id),
                content: content.into(),
                status: TaskStatus::Pending,
                result: None,
                created_at: now,
                updated_at: now,
            };
            self.tasks.push(task.clone());
            created.push(task);
        }
        created
    }

    /// Update a task in place. Returns `None` for an unknown id.
    ///
    /// A `None` result leaves any previous result untouched. Re-applying an
    /// identical update changes nothing, `updated_at` included.
    pub fn update(&mut self, id: &str, status: TaskStatus, result: Option<String>) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == id)?;
        let result = result.or_else(|| task.result.clone());
        if task.status != status || task.result != result {
            task.status = status;
            task.result = result;
            task.updated_at = Utc::now();
        }
        Some(task.clone())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// One line per task, for the system prompt.
    pub fn render(&self) -> String {
        self.tasks
            .iter()
            .map(|t| format!("- [{}] {}: {}", t.status, t.id, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
