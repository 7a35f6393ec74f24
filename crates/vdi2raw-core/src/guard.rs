//! Cancellation and interrupt handling.
//!
//! A [`CancelToken`] is checked by the copy loop between blocks. Handles and
//! buffers belong to the [`CopySession`](crate::copy::CopySession), so
//! returning [`Error::Interrupted`](crate::Error::Interrupted) from the loop
//! releases them on the way out like any other error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status for a process stopped by an interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Route Ctrl+C / SIGTERM to `token`.
///
/// The first interrupt only sets the token, leaving the copy loop to unwind
/// and release its resources. A second interrupt runs `restore` and exits
/// immediately with [`EXIT_INTERRUPTED`]. Only one handler may be installed
/// per process.
pub fn install_interrupt_handler<F>(token: &CancelToken, restore: F) -> Result<(), ctrlc::Error>
where
    F: Fn() + Send + 'static,
{
    let token = token.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            restore();
            std::process::exit(EXIT_INTERRUPTED);
        }
        tracing::warn!("interrupt received, stopping after the current block");
        token.cancel();
    })
}
