use super::{ValidationError, require_text};
use crate::db::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TASKS_DATABASE: &str = "TarefasDB";
pub const TASKS_COLLECTION: &str = "tarefas";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "baixa")]
    Low,
    #[default]
    #[serde(alias = "media", alias = "média")]
    Medium,
    #[serde(alias = "alta")]
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "baixa" => Ok(Priority::Low),
            "medium" | "media" | "média" => Ok(Priority::Medium),
            "high" | "alta" => Ok(Priority::High),
            _ => Err(ValidationError::UnknownPriority(s.to_string())),
        }
    }
}

/// A to-do item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: None,
            title: title.into(),
            priority,
            completed: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.completed { "x" } else { " " };
        write!(f, "[{mark}] {} - priority: {}", self.title, self.priority)
    }
}
