use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Process-wide "keep running" flag flipped by Ctrl+C
#[derive(Clone)]
pub struct ShutdownSignal {
    running: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self { running: Arc::new(AtomicBool::new(true)) }
    }

    /// Install the Ctrl+C handler; only one may be installed per process
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received");
            signal.trigger();
        })
    }

    pub fn trigger(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
