use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::datetime::{
    format_wire_date, format_wire_timestamp, parse_wire_date, parse_wire_timestamp,
};

/// Opaque task identifier. Ids minted by the store are the decimal
/// millisecond timestamp of creation, so they sort in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of ids that follow the millisecond scheme.
    pub fn as_millis(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(anyhow!(
                "unknown recurrence: {other} (expected none, daily or monthly)"
            )),
        }
    }
}

/// The user-editable part of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub title: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub recurrence: Recurrence,
}

impl TaskFields {
    pub fn new(title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date,
            recurrence: Recurrence::None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow!("task title cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub recurrence: Recurrence,
    /// Completion instant; a task is completed exactly when this is set.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, fields: TaskFields) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            due_date: fields.due_date,
            recurrence: fields.recurrence,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            recurrence: self.recurrence,
        }
    }

    /// Overwrites the editable fields; completion state is left alone.
    pub fn apply(&mut self, fields: TaskFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.due_date = fields.due_date;
        self.recurrence = fields.recurrence;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
    }

    pub fn reopen(&mut self) {
        self.completed_at = None;
    }

    /// Flips completion and returns the new completed state.
    pub fn toggle_complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_completed() {
            self.reopen();
            false
        } else {
            self.complete(now);
            true
        }
    }
}

/// Persisted shape of a task inside the `tasks` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub due_date: String,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_date: Option<String>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            description: Some(task.description.clone()),
            due_date: format_wire_date(task.due_date),
            recurrence: Some(task.recurrence.as_str().to_string()),
            completed: task.is_completed(),
            completed_date: task.completed_at.map(format_wire_timestamp),
        }
    }
}

impl TaskRecord {
    /// Converts a persisted record into a task.
    ///
    /// A record marked completed without a readable completion date keeps
    /// the invariant by either resetting (recurring tasks) or stamping the
    /// completion with `now` (one-off tasks).
    pub fn into_task(self, now: DateTime<Utc>) -> anyhow::Result<Task> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("task record has an empty id"));
        }

        let due_date = parse_wire_date(&self.due_date).ok_or_else(|| {
            anyhow!("task {} has an invalid dueDate: {:?}", self.id, self.due_date)
        })?;

        let recurrence = match self.recurrence.as_deref() {
            None => Recurrence::None,
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                warn!(id = %self.id, error = %err, "unknown recurrence, treating as none");
                Recurrence::None
            }),
        };

        let completed_at = if self.completed {
            match self.completed_date.as_deref().and_then(parse_wire_timestamp) {
                Some(at) => Some(at),
                None if recurrence.is_recurring() => {
                    warn!(
                        id = %self.id,
                        raw = ?self.completed_date,
                        "recurring task completed without a readable completedDate; resetting"
                    );
                    None
                }
                None => {
                    warn!(
                        id = %self.id,
                        raw = ?self.completed_date,
                        "completed task without a readable completedDate; stamping with load time"
                    );
                    Some(now)
                }
            }
        } else {
            None
        };

        Ok(Task {
            id: TaskId::new(self.id),
            title: self.title,
            description: self.description.unwrap_or_default(),
            due_date,
            recurrence,
            completed_at,
        })
    }
}

/// Strictly parses a JSON task array. Records that cannot be interpreted are
/// skipped; a value that is not an array of records is an error.
#[tracing::instrument(skip(raw, now))]
pub fn parse_task_list(raw: &str, now: DateTime<Utc>) -> anyhow::Result<Vec<Task>> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw).context("expected a JSON array of task objects")?;

    let total = values.len();
    let mut out = Vec::with_capacity(total);
    for (idx, value) in values.into_iter().enumerate() {
        let parsed = TaskRecord::deserialize(value)
            .context("record does not have the task shape")
            .and_then(|record| record.into_task(now));
        match parsed {
            Ok(task) => out.push(task),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(index = idx, error = %reason, "skipping unreadable task record");
            }
        }
    }

    debug!(total, kept = out.len(), "parsed task list");
    Ok(out)
}

/// Lenient variant used when loading from storage: anything malformed reads
/// as an empty list.
pub fn decode_task_list(raw: &str, now: DateTime<Utc>) -> Vec<Task> {
    match parse_task_list(raw, now) {
        Ok(tasks) => tasks,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(error = %reason, "stored tasks are malformed; starting with no tasks");
            Vec::new()
        }
    }
}

pub fn encode_task_list(tasks: &[Task]) -> anyhow::Result<String> {
    let records: Vec<TaskRecord> = tasks.iter().map(TaskRecord::from).collect();
    serde_json::to_string(&records).context("failed to serialize tasks")
}
