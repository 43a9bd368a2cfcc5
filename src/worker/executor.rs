use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};

use crate::error::ExecError;
use crate::identity::resolver;
use crate::models::config::ExecutorConfig;
use crate::models::task::{lock, Arg, SharedTask, Task, TaskState};
use crate::store::script_store::{Removal, ScriptStore};
use crate::worker::waiter::{kill_group, spawn_waiter};

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Nanosecond timestamp, bumped past the previous id when the clock repeats.
fn next_id() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let prev = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    now.max(prev.saturating_add(1))
}

/// Runs shell tasks as child processes under the configured bounds.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

/// A spawned task whose outcome is still being decided.
#[derive(Debug)]
pub struct Execution {
    id: i64,
    pid: u32,
    task: SharedTask,
    waiter: JoinHandle<TaskState>,
}

impl Execution {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_done(&self) -> bool {
        self.waiter.is_finished()
    }

    /// Blocks until the child is reaped and the final state is committed.
    pub fn wait(self) -> TaskState {
        match self.waiter.join() {
            Ok(state) => state,
            Err(_) => {
                error!("Task {}: waiter thread panicked.", self.id);
                lock(&self.task).state
            }
        }
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn initialize(&self, task: &mut Task) {
        task.id = next_id();
        task.idx = task.id.to_string();
        task.pid = 0;
        task.state = TaskState::Prepare;
        task.begin_time = Utc::now();
        task.end_time = task.begin_time;
        task.timeout = self.config.clamp_timeout(task.timeout);
        if task.path.is_empty() {
            task.path = self.config.default_path.clone();
        }
        if task.role.is_empty() {
            task.role = self.config.default_role.clone();
        }
    }

    pub fn set_path(&self, task: &mut Task, path: &str) {
        let path = path.trim();
        task.path = if path.is_empty() {
            self.config.default_path.clone()
        } else {
            path.to_string()
        };
        match ScriptStore::new(&task.path).ensure_dir() {
            Ok(true) => info!("Create path {}, success.", task.path),
            Ok(false) => {}
            Err(e) => error!("Create path {}, err: {}", task.path, e),
        }
    }

    pub fn check_identity(&self, task: &mut Task) -> bool {
        if !resolver::is_privileged() {
            error!("Task {}: role {} needs a root caller.", task.id, task.role);
            task.finish(TaskState::RoleError);
            return false;
        }
        match resolver::lookup(&task.role) {
            Ok(user) => {
                task.user = Some(user);
                true
            }
            Err(e) => {
                error!("Task {}: check role err: {}", task.id, e);
                task.finish(TaskState::RoleError);
                false
            }
        }
    }

    pub fn save(&self, task: &mut Task) -> bool {
        let store = ScriptStore::new(&task.path);
        match store.write_script(task.id, &task.content) {
            Ok(()) => {
                task.finish(TaskState::Saved);
                true
            }
            Err(e) => {
                error!("Task {}: save script err: {}", task.id, e);
                task.finish(TaskState::SaveError);
                false
            }
        }
    }

    /// Saves and spawns the task.
    ///
    /// Returns `None` when no child was spawned; the task then holds the
    /// failure state. Otherwise the outcome is decided on a waiter thread and
    /// becomes stable once [`Execution::wait`] returns.
    pub fn start(&self, shared: &SharedTask) -> Option<Execution> {
        let mut task = lock(shared);
        if task.state != TaskState::Prepare {
            warn!("Task {}: cannot start from state {}.", task.id, task.state);
            return None;
        }
        task.begin_time = Utc::now();
        if !self.save(&mut task) {
            return None;
        }

        let store = ScriptStore::new(&task.path);
        let output = match store.create_log(task.id).and_then(|out| {
            let err = out.try_clone()?;
            Ok((out, err))
        }) {
            Ok(files) => files,
            Err(e) => {
                error!("Task {}: create output err: {}", task.id, e);
                task.finish(TaskState::StartError);
                return None;
            }
        };
        // No deadline when the timeout reaches past what `Instant` can hold.
        let deadline = Instant::now().checked_add(Duration::from_secs(task.timeout));

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg(store.script_path(task.id)).process_group(0);
        if task.role != self.config.default_role {
            if !self.check_identity(&mut task) {
                return None;
            }
            if let Some(user) = &task.user {
                info!(
                    "Task {}: dropping to user {} ({}:{}).",
                    task.id, user.name, user.uid, user.gid
                );
                cmd.uid(user.uid).gid(user.gid);
            }
        }
        cmd.envs(build_env(&task))
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.0))
            .stderr(Stdio::from(output.1));

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Task {}: start shell err: {}", task.id, e);
                task.finish(TaskState::StartError);
                return None;
            }
        };
        task.finish(TaskState::Running);
        task.pid = child.id();
        let (id, pid) = (task.id, task.pid);
        drop(task);

        info!("Task {}: running as pid {}.", id, pid);
        Some(Execution {
            id,
            pid,
            task: Arc::clone(shared),
            waiter: spawn_waiter(Arc::clone(shared), child, deadline),
        })
    }

    /// Kills the task's whole process group on operator request.
    pub fn stop(&self, shared: &SharedTask) -> Result<(), ExecError> {
        let (id, pid) = {
            let task = lock(shared);
            if task.is_finished() {
                return Err(ExecError::NotRunning);
            }
            let elapsed = Utc::now().signed_duration_since(task.begin_time);
            let window = i64::try_from(self.config.stop_window).unwrap_or(i64::MAX);
            if elapsed.num_seconds() > window {
                return Err(ExecError::TimeExpired);
            }
            if task.pid == 0 {
                return Err(ExecError::NotRunning);
            }
            (task.id, task.pid)
        };

        if let Err(e) = kill_group(pid) {
            error!("Task {}: user demand kill it, err: {}", id, e);
            return Err(ExecError::Signal(e));
        }
        info!("Task {}: user demand kill it.", id);
        Ok(())
    }

    pub fn output(&self, task: &Task) -> io::Result<Vec<u8>> {
        ScriptStore::new(&task.path).read_output(task.id)
    }

    pub fn output_string(&self, task: &Task) -> io::Result<String> {
        let bytes = self.output(task)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn remove(&self, task: &Task) -> Removal {
        ScriptStore::new(&task.path).remove(task.id)
    }
}

/// Environment added to the inherited one. Later entries win on collision.
pub(crate) fn build_env(task: &Task) -> Vec<(String, String)> {
    let mut env = Vec::new();
    push_args(&mut env, &task.pool_attr, &["APP_", "POOL_"]);
    push_args(&mut env, &task.global_args, &["APP_", "GLOBAL_"]);
    push_args(&mut env, &task.args, &["APP_TASK_", "SH_ARG_"]);
    push_args(&mut env, &task.agent, &["AGENT_"]);
    env
}

fn push_args(env: &mut Vec<(String, String)>, args: &[Arg], prefixes: &[&str]) {
    for arg in args {
        let key = arg.key.to_uppercase();
        let value = arg.value.trim();
        for prefix in prefixes {
            env.push((format!("{}{}", prefix, key), value.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::share;

    fn executor() -> Executor {
        Executor::new(ExecutorConfig {
            max_timeout: Some(120),
            ..ExecutorConfig::default()
        })
    }

    #[test]
    fn initialize_fills_defaults() {
        let executor = executor();
        let mut task = Task::with_content("true");
        task.timeout = 3;
        task.pid = 77;
        task.state = TaskState::Failed;
        executor.initialize(&mut task);

        assert!(task.id > 0);
        assert_eq!(task.idx, task.id.to_string());
        assert_eq!(task.pid, 0);
        assert_eq!(task.state, TaskState::Prepare);
        assert_eq!(task.timeout, 10);
        assert_eq!(task.path, "./logs");
        assert_eq!(task.role, "root");
        assert_eq!(task.content, "true");
    }

    #[test]
    fn initialize_clamps_to_max_and_keeps_explicit_fields() {
        let executor = executor();
        let mut task = Task::with_content("true");
        task.timeout = 500;
        task.path = "/var/tmp/tunnel".to_string();
        task.role = "nobody".to_string();
        executor.initialize(&mut task);

        assert_eq!(task.timeout, 120);
        assert_eq!(task.path, "/var/tmp/tunnel");
        assert_eq!(task.role, "nobody");
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let executor = executor();
        let mut last = 0;
        for _ in 0..100 {
            let mut task = Task::default();
            executor.initialize(&mut task);
            assert!(task.id > last);
            last = task.id;
        }
    }

    #[test]
    fn env_uses_namespaces_in_order() {
        let mut task = Task::default();
        task.pool_attr = vec![Arg::new("zone", " east ")];
        task.global_args = vec![Arg::new("Tag", "blue")];
        task.args = vec![Arg::new("name", "build\n")];
        task.agent = vec![Arg::new("version", "1.2")];

        let env = build_env(&task);
        let expected: Vec<(String, String)> = [
            ("APP_ZONE", "east"),
            ("POOL_ZONE", "east"),
            ("APP_TAG", "blue"),
            ("GLOBAL_TAG", "blue"),
            ("APP_TASK_NAME", "build"),
            ("SH_ARG_NAME", "build"),
            ("AGENT_VERSION", "1.2"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(env, expected);
    }

    #[test]
    fn save_failure_is_terminal() {
        let executor = executor();
        let mut task = Task::with_content("true");
        executor.initialize(&mut task);
        task.path = "/nonexistent/shell-tunnel/dir".to_string();

        assert!(!executor.save(&mut task));
        assert_eq!(task.state, TaskState::SaveError);
        assert!(task.content.is_empty());
    }

    #[test]
    fn unknown_role_fails_identity_check() {
        let executor = executor();
        let mut task = Task::with_content("true");
        task.role = "no-such-user-for-shell-tunnel".to_string();
        executor.initialize(&mut task);

        assert!(!executor.check_identity(&mut task));
        assert_eq!(task.state, TaskState::RoleError);
        assert!(task.user.is_none());
    }

    #[test]
    fn root_role_resolves_only_for_root_caller() {
        let executor = executor();
        let mut task = Task::default();
        executor.initialize(&mut task);

        let ok = executor.check_identity(&mut task);
        assert_eq!(ok, resolver::is_privileged());
        if ok {
            assert_eq!(task.user.as_ref().map(|u| u.uid), Some(0));
        } else {
            assert_eq!(task.state, TaskState::RoleError);
        }
    }

    #[test]
    fn stop_refuses_finished_and_unspawned_tasks() {
        let executor = executor();
        let mut task = Task::default();
        executor.initialize(&mut task);
        let shared = share(task);
        assert!(matches!(executor.stop(&shared), Err(ExecError::NotRunning)));

        lock(&shared).finish(TaskState::Success);
        assert!(matches!(executor.stop(&shared), Err(ExecError::NotRunning)));
    }

    #[test]
    fn stop_refuses_stale_tasks() {
        let executor = executor();
        let mut task = Task::default();
        executor.initialize(&mut task);
        task.state = TaskState::Running;
        task.pid = 4_000_000;
        task.begin_time = Utc::now() - chrono::Duration::hours(2);
        let shared = share(task);

        assert!(matches!(executor.stop(&shared), Err(ExecError::TimeExpired)));
    }

    #[test]
    fn huge_stop_window_does_not_wrap() {
        let executor = Executor::new(ExecutorConfig {
            stop_window: u64::MAX,
            ..ExecutorConfig::default()
        });
        let mut task = Task::default();
        executor.initialize(&mut task);
        task.state = TaskState::Running;
        task.begin_time = Utc::now() - chrono::Duration::hours(2);
        let shared = share(task);

        // pid 0 is only checked after the window.
        assert!(matches!(executor.stop(&shared), Err(ExecError::NotRunning)));
    }

    #[test]
    fn set_path_trims_and_creates() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor();
        let mut task = Task::default();
        let target = dir.path().join("nested/logs");
        executor.set_path(&mut task, &format!("  {}  ", target.display()));

        assert_eq!(task.path, target.display().to_string());
        assert!(target.is_dir());
    }
}
