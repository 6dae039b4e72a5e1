use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coarse cancellation flag shared between a scan and its owner.
///
/// Checked before each frame is sent; an exchange already in flight is left
/// to complete or time out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
