use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, MutexGuard},
    thread::JoinHandle,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use crate::error::ExecError;
use crate::models::message::TaskMessage;
use crate::models::task::{lock, share, SharedTask, Task, TaskState};
use crate::store::script_store::Removal;
use crate::worker::executor::Executor;
use crate::worker::worker::spawn_worker_thread;

pub struct TaskManager {
    executor: Executor,
    tasks: Arc<Mutex<HashMap<i64, SharedTask>>>,
    sender: Sender<TaskMessage>,
    receiver: Receiver<TaskMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new(executor: Executor) -> Self {
        let (sender, receiver) = unbounded();
        TaskManager {
            executor,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            sender,
            receiver,
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let handle = spawn_worker_thread(
            self.executor.clone(),
            self.receiver.clone(),
            Arc::clone(&self.tasks),
        );
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Stops accepting work and waits for every started task to settle.
    pub fn shutdown(&self) {
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = self.sender.send(TaskMessage::Shutdown);
            if handle.join().is_err() {
                warn!("Worker thread panicked.");
            }
        }
    }

    pub fn create_task(&self, content: String, timeout: u64) -> i64 {
        let mut task = Task::with_content(content);
        task.timeout = timeout;
        self.executor.initialize(&mut task);
        let path = task.path.clone();
        self.executor.set_path(&mut task, &path);

        let id = task.id;
        self.tasks().insert(id, share(task));
        info!("Task {} created.", id);
        id
    }

    pub fn run_task(&self, id: i64) -> bool {
        if !self.tasks().contains_key(&id) {
            return false;
        }
        self.sender.send(TaskMessage::Run(id)).is_ok()
    }

    pub fn stop_task(&self, id: i64) -> Option<Result<(), ExecError>> {
        let task = self.task(id)?;
        Some(self.executor.stop(&task))
    }

    /// Deletes the task's files and forgets it. Running tasks are kept.
    pub fn remove_task(&self, id: i64) -> Option<Removal> {
        let task = self.task(id)?;
        let task = lock(&task).clone();
        if task.state == TaskState::Running {
            warn!("Task {} is still running.", id);
            return None;
        }
        self.tasks().remove(&id);
        Some(self.executor.remove(&task))
    }

    pub fn get_task_state(&self, id: i64) -> Option<TaskState> {
        self.task(id).map(|task| lock(&task).state)
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks()
            .values()
            .map(|task| lock(task).clone())
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    pub fn get_task_output(&self, id: i64) -> Option<io::Result<String>> {
        let task = self.task(id)?;
        let task = lock(&task).clone();
        Some(self.executor.output_string(&task))
    }

    fn task(&self, id: i64) -> Option<SharedTask> {
        self.tasks().get(&id).cloned()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<i64, SharedTask>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
