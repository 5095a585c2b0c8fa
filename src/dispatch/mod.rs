mod classify;
mod retry;

pub use classify::{FailureClass, classify};
pub use retry::run_with_token_retry;
