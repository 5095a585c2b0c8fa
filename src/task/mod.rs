mod store;
mod types;

pub use store::{TASK_TTL, TaskStore};
pub use types::{TaskRecord, TaskStatus};
