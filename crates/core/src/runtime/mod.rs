mod scheduler;
mod shutdown;

pub use scheduler::{Runtime, Snapshot};
pub use shutdown::ShutdownGuard;
