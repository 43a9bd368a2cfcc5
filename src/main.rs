use std::{env, process};

use log::error;

use shell_tunnel::app::cli;
use shell_tunnel::manager::task_manager::TaskManager;
use shell_tunnel::{Executor, ExecutorConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1) {
        Some(path) => match ExecutorConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Config {}: {}", path, e);
                process::exit(2);
            }
        },
        None => ExecutorConfig::default(),
    };

    let manager = TaskManager::new(Executor::new(config));
    manager.start();

    if let Err(e) = cli::run_cli(&manager) {
        error!("Console failed: {}", e);
    }
    manager.shutdown();
}
