//! The assistant's run flag.
//!
//! Written only by `AssistantController::start`/`stop`; read by the worker
//! loop at every iteration boundary and by the microphone listener between
//! audio polls, which is what makes an in-flight listen end early on stop.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new(running: bool) -> Self {
        Self(Arc::new(AtomicBool::new(running)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }

    /// Store `running` and return the previous value.
    pub fn swap(&self, running: bool) -> bool {
        self.0.swap(running, Ordering::SeqCst)
    }
}
