pub mod app;
pub mod error;
pub mod identity;
pub mod manager;
pub mod models;
pub mod store;
pub mod worker;

pub use error::{ConfigError, ExecError, IdentityError};
pub use models::config::ExecutorConfig;
pub use models::task::{share, Arg, SharedTask, Task, TaskState};
pub use worker::executor::{Execution, Executor};
