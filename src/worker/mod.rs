pub mod executor;
mod waiter;
pub mod worker;
