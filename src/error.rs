use thiserror::Error;

/// Conditions callers are expected to match on. Everything else is plain `anyhow`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("a response is still in flight; wait for it to finish")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("gave up after {0} tool rounds without a final answer")]
    ToolRoundLimit(usize),
}
