//! Task record and its client-editable attributes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::TaskError;
use super::ids::{TaskId, UserId};

pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_DESCRIPTION_CHARS: usize = 4096;

/// Task status.
///
/// Wire form is snake_case (`new`, `in_progress`, `done`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(TaskStatus::New),
            "in_progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(TaskError::WrongStatus(other.to_string())),
        }
    }
}

/// Client-editable part of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub status: TaskStatus,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl TaskAttributes {
    pub fn new(status: TaskStatus, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Checks title/description limits. Status is already typed.
    pub fn validate(&self) -> Result<(), TaskError> {
        let title_chars = self.title.trim().chars().count();
        if title_chars == 0 {
            return Err(TaskError::InvalidTitle("title is required".to_string()));
        }
        if title_chars > MAX_TITLE_CHARS {
            return Err(TaskError::InvalidTitle(format!(
                "title exceeds {MAX_TITLE_CHARS} characters"
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(TaskError::InvalidDescription(format!(
                "description exceeds {MAX_DESCRIPTION_CHARS} characters"
            )));
        }
        Ok(())
    }
}

/// Task record as held by a store.
///
/// `deleted` is the tombstone flag. Once set it is never cleared; the row is
/// invisible to reads and waits for the next compaction to be purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: UserId,
    pub attributes: TaskAttributes,
    #[serde(default)]
    pub deleted: bool,
}

impl Task {
    pub fn new(id: TaskId, owner_id: UserId, attributes: TaskAttributes) -> Self {
        Self {
            id,
            owner_id,
            attributes,
            deleted: false,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted
    }

    /// Active -> Tombstoned. Returns false if the task was already tombstoned.
    pub fn mark_deleted(&mut self) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        true
    }

    pub fn is_owned_by(&self, owner_id: UserId) -> bool {
        self.owner_id == owner_id
    }
}
