use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crossbeam_channel::Receiver;
use log::{error, info, warn};

use crate::models::{
    message::TaskMessage,
    task::SharedTask,
};
use crate::worker::executor::{Execution, Executor};

pub fn spawn_worker_thread(
    executor: Executor,
    receiver: Receiver<TaskMessage>,
    tasks: Arc<Mutex<HashMap<i64, SharedTask>>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut executions: HashMap<i64, Execution> = HashMap::new();
        loop {
            match receiver.recv() {
                Ok(TaskMessage::Run(id)) => {
                    reap_finished(&mut executions);
                    handle_run_task(id, &executor, &tasks, &mut executions);
                }
                Ok(TaskMessage::Shutdown) => break,
                Err(e) => {
                    error!("Failed to receive message: {}", e);
                    break;
                }
            }
        }
        for (id, execution) in executions.drain() {
            let state = execution.wait();
            info!("Task {} settled as {}.", id, state);
        }
    })
}

fn handle_run_task(
    id: i64,
    executor: &Executor,
    tasks: &Arc<Mutex<HashMap<i64, SharedTask>>>,
    executions: &mut HashMap<i64, Execution>,
) {
    let task = {
        let guard = tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(&id).cloned()
    };
    let Some(task) = task else {
        warn!("Task {} not found.", id);
        return;
    };

    info!("Starting task {}.", id);
    if let Some(execution) = executor.start(&task) {
        executions.insert(execution.id(), execution);
    }
}

fn reap_finished(executions: &mut HashMap<i64, Execution>) {
    let done: Vec<i64> = executions
        .iter()
        .filter(|(_, execution)| execution.is_done())
        .map(|(id, _)| *id)
        .collect();
    for id in done {
        if let Some(execution) = executions.remove(&id) {
            execution.wait();
        }
    }
}
