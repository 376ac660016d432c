mod log_buffer;
mod run_log;
mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use log_buffer::{BufferedLog, LogBuffer};
pub use run_log::{redact_secrets, RunRecorder};
pub use runner::{Pipeline, RunGate};

/// Cooperative cancellation for an in-flight run, checked between pipeline
/// steps and between cascade providers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[allow(dead_code)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
