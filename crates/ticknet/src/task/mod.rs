mod background;
mod runtime;
mod worker;

pub use background::{BackgroundTask, TaskContext};
pub use runtime::{SessionHandle, TaskRuntime};
pub use worker::Worker;
