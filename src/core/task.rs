//! Task domain types served by [`crate::db::TaskDB`]

use crate::core::record::EntityId;
use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Task identifier
pub type TaskId = EntityId;

/// The versioned attributes of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub title: String,
    pub completed_at: Option<Timestamp>,
}

impl TaskPayload {
    /// Build a payload, rejecting blank titles
    pub fn new(title: impl Into<String>, completed_at: Option<Timestamp>) -> Result<Self> {
        let title = validate_title(title.into())?;
        Ok(Self {
            title,
            completed_at,
        })
    }
}

pub(crate) fn validate_title(title: String) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("task title must not be blank".to_string()));
    }
    Ok(trimmed.to_string())
}

/// A task as currently believed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub completed_at: Option<Timestamp>,
}

/// One segment of a task's valid-time timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistoryItem {
    pub title: String,
    pub completed_at: Option<Timestamp>,
    pub valid_from: Option<Timestamp>,
    pub valid_to: Option<Timestamp>,
}

/// A task's latest known state, with the instant it stopped being valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskWithDeletion {
    pub id: TaskId,
    pub title: String,
    pub completed_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
}
