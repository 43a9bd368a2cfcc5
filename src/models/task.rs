use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::resolver::Identity;

/// A task shared between the caller, the waiter thread and `stop`.
pub type SharedTask = Arc<Mutex<Task>>;

pub fn share(task: Task) -> SharedTask {
    Arc::new(Mutex::new(task))
}

/// Locks a shared task, recovering the data if a holder panicked.
pub fn lock(task: &SharedTask) -> MutexGuard<'_, Task> {
    task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    pub key: String,
    pub value: String,
}

impl Arg {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum TaskState {
    #[default]
    Prepare,
    SaveError,
    Saved,
    RoleError,
    StartError,
    Running,
    Timeout,
    Failed,
    Killed,
    Success,
}

impl TaskState {
    pub fn code(self) -> i64 {
        match self {
            TaskState::Prepare => 0,
            TaskState::SaveError => 1,
            TaskState::Saved => 2,
            TaskState::RoleError => 3,
            TaskState::StartError => 4,
            TaskState::Running => 5,
            TaskState::Timeout => 6,
            TaskState::Failed => 7,
            TaskState::Killed => 8,
            TaskState::Success => 9,
        }
    }

    /// Not yet spawned, or spawned and still waiting for an outcome.
    pub fn is_running(self) -> bool {
        matches!(self, TaskState::Prepare | TaskState::Saved | TaskState::Running)
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::SaveError
                | TaskState::RoleError
                | TaskState::StartError
                | TaskState::Timeout
                | TaskState::Failed
                | TaskState::Killed
                | TaskState::Success
        )
    }
}

impl From<TaskState> for i64 {
    fn from(state: TaskState) -> Self {
        state.code()
    }
}

impl TryFrom<i64> for TaskState {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => TaskState::Prepare,
            1 => TaskState::SaveError,
            2 => TaskState::Saved,
            3 => TaskState::RoleError,
            4 => TaskState::StartError,
            5 => TaskState::Running,
            6 => TaskState::Timeout,
            7 => TaskState::Failed,
            8 => TaskState::Killed,
            9 => TaskState::Success,
            other => return Err(format!("unknown task state code {other}")),
        })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Prepare => "prepare",
            TaskState::SaveError => "save-error",
            TaskState::Saved => "saved",
            TaskState::RoleError => "role-error",
            TaskState::StartError => "start-error",
            TaskState::Running => "running",
            TaskState::Timeout => "timeout",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
            TaskState::Success => "success",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// One shell script execution.
///
/// `idx` mirrors `id` as a string for clients that lose precision on 64-bit
/// integers. `timeout` is in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub idx: String,
    pub content: String,
    pub timeout: u64,
    pub role: String,
    pub args: Vec<Arg>,
    pub pool_attr: Vec<Arg>,
    pub global_args: Vec<Arg>,
    pub agent: Vec<Arg>,
    pub state: TaskState,
    pub pid: u32,
    pub path: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip)]
    pub user: Option<Identity>,
}

impl Task {
    pub fn new(id: i64) -> Option<Self> {
        if id <= 0 {
            return None;
        }
        Some(Self {
            id,
            idx: id.to_string(),
            ..Self::default()
        })
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Commits a state transition.
    ///
    /// Returns `false` without touching the task once it is finished, so a
    /// recorded outcome is never overwritten.
    pub fn finish(&mut self, state: TaskState) -> bool {
        if self.state.is_finished() {
            return false;
        }
        self.state = state;
        self.end_time = Utc::now();
        self.content.clear();
        if state.is_finished() || state == TaskState::Running {
            self.args = Vec::new();
            self.pool_attr = Vec::new();
            self.global_args = Vec::new();
            self.agent = Vec::new();
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}
