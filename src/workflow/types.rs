/// Core workflow object definitions
///
/// Defines the unit of work driven through a Step Tree: the object itself, its status
/// and the typed side-channel the engine and actions own. These types are serialized
/// to JSON columns for persistence.

use crate::workflow::tree::{Arm, StepPath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a workflow object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    Created,
    Running,
    Halted,
    Waiting,
    Completed,
    Error,
}

impl ObjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Created => "CREATED",
            ObjectStatus::Running => "RUNNING",
            ObjectStatus::Halted => "HALTED",
            ObjectStatus::Waiting => "WAITING",
            ObjectStatus::Completed => "COMPLETED",
            ObjectStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(ObjectStatus::Created),
            "RUNNING" => Ok(ObjectStatus::Running),
            "HALTED" => Ok(ObjectStatus::Halted),
            "WAITING" => Ok(ObjectStatus::Waiting),
            "COMPLETED" => Ok(ObjectStatus::Completed),
            "ERROR" => Ok(ObjectStatus::Error),
            other => Err(format!("unknown object status: {}", other)),
        }
    }
}

/// Resume position of an object inside its Step Tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state", content = "path")]
pub enum Position {
    /// Not started yet
    #[default]
    Start,
    /// Paused at (or about to run) the step at this path
    At(StepPath),
    /// Terminal sentinel: the tree has been walked to the end
    Completed,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Start => f.write_str("start"),
            Position::At(path) => write!(f, "{}", path),
            Position::Completed => f.write_str("completed"),
        }
    }
}

/// What a WAITING object is suspended on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingFor {
    /// Result of the legacy ingestion of an upload
    Upload,
    /// The collector reporting the record as indexed
    Collector,
    /// A queued continuation, after a resolve or an accepted callback
    Continuation,
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitingFor::Upload => f.write_str("upload"),
            WaitingFor::Collector => f.write_str("collector"),
            WaitingFor::Continuation => f.write_str("continuation"),
        }
    }
}

/// Output of the relevance classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// "CORE", "Non-CORE" or "Rejected"
    pub decision: String,
    pub max_score: f64,
}

/// Typed side-channel owned by the engine and by resolved actions
///
/// Every documented key has a named field; task-specific scratch data goes into
/// `scratch` rather than new ad hoc keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraData {
    #[serde(default)]
    pub position: Position,

    /// Pending action name, present iff the object is HALTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_message: Option<String>,

    /// Present iff the object is WAITING
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<WaitingFor>,

    /// Present iff the object is in ERROR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Results cache keyed by task name
    #[serde(default)]
    pub task_results: BTreeMap<String, Value>,

    /// Arm each entered Branch routed to, keyed by the Branch path
    #[serde(default)]
    pub branch_arms: BTreeMap<String, Arm>,

    // Decision fields written by actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Record id assigned by the legacy system after ingestion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_prediction: Option<Prediction>,

    /// Free-form task scratch data
    #[serde(default)]
    pub scratch: Map<String, Value>,
}

impl ExtraData {
    pub fn clear_action(&mut self) {
        self.action = None;
        self.action_message = None;
    }
}

/// The unit of work: one submission under review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowObject {
    pub id: i64,
    /// Selects which Step Tree applies (e.g. "article", "author")
    pub workflow_kind: String,
    /// The record being curated; only task logic inspects its shape
    pub data: Value,
    pub extra_data: ExtraData,
    pub status: ObjectStatus,
    /// Originating object, if this one was spawned by another
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowObject {
    /// Pending action name when HALTED
    pub fn pending_action(&self) -> Option<&str> {
        self.extra_data.action.as_deref()
    }

    /// Whether the object is WAITING on exactly this
    pub fn is_waiting_for(&self, on: WaitingFor) -> bool {
        self.status == ObjectStatus::Waiting && self.extra_data.waiting_for == Some(on)
    }

    /// Move to ERROR with the given message; an empty message is replaced so the
    /// ERROR invariant always holds
    pub fn mark_error(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "unknown error".to_string();
        }
        self.extra_data.clear_action();
        self.extra_data.waiting_for = None;
        self.extra_data.error_message = Some(message);
        self.status = ObjectStatus::Error;
    }
}

/// Fields needed to create a new object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObject {
    pub workflow_kind: String,
    pub data: Value,
    #[serde(default)]
    pub parent_id: Option<i64>,
}
