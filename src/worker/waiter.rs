use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{at, bounded, never, select};
use log::{debug, error, info, warn};

use crate::models::task::{lock, SharedTask, TaskState};

/// Sends SIGKILL to the process group led by `pid`.
pub(crate) fn kill_group(pid: u32) -> io::Result<()> {
    let pgid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if pgid <= 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn spawn_waiter(
    task: SharedTask,
    child: Child,
    deadline: Option<Instant>,
) -> JoinHandle<TaskState> {
    thread::spawn(move || wait_for_exit(task, child, deadline))
}

/// Races the child's exit against the deadline and commits the outcome.
fn wait_for_exit(task: SharedTask, mut child: Child, deadline: Option<Instant>) -> TaskState {
    let id = lock(&task).id;
    let pid = child.id();
    let (done_tx, done_rx) = bounded::<()>(1);

    let timer = match deadline {
        Some(deadline) => at(deadline),
        None => never(),
    };
    let watched = Arc::clone(&task);
    let watcher = thread::spawn(move || {
        select! {
            recv(timer) -> _ => {
                // The exit may have landed together with the deadline.
                if done_rx.try_recv().is_ok() {
                    return;
                }
                if let Err(e) = kill_group(pid) {
                    debug!("Task {}: kill on timeout: {}", id, e);
                }
                if lock(&watched).finish(TaskState::Timeout) {
                    warn!("Task {}: run timeout.", id);
                }
            }
            recv(done_rx) -> _ => {}
        }
    });

    let status = child.wait();
    let _ = done_tx.send(());
    if watcher.join().is_err() {
        error!("Task {}: timeout watcher panicked.", id);
    }

    if let Err(e) = &status {
        error!("Task {}: failed to wait for child process: {}", id, e);
    }
    let outcome = classify(&status);
    let mut task = lock(&task);
    if task.finish(outcome) {
        match outcome {
            TaskState::Killed => info!("Task {}: killed by user.", id),
            _ => info!("Task {}: finished {}.", id, outcome),
        }
    }
    task.state
}

fn classify(status: &io::Result<ExitStatus>) -> TaskState {
    match status {
        Ok(status) if status.success() => TaskState::Success,
        Ok(status) if status.signal() == Some(libc::SIGKILL) => TaskState::Killed,
        _ => TaskState::Failed,
    }
}
