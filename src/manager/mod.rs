pub mod task_manager;
