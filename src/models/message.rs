#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMessage {
    Run(i64),
    Shutdown,
}
