use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps. Bounds how long a sleeping thread takes to notice a
/// cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// A cooperative cancellation signal, shared between the event loop and every worker.
///
/// Clones observe the same flag. Cancelling is idempotent: only the first call reports that it
/// flipped the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        Default::default()
    }

    /// Request cancellation. Returns true if this call was the one that requested it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early if cancelled. Returns true if cancellation was
    /// observed.
    ///
    /// A duration too long to represent as a deadline sleeps until cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return true;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    SLEEP_SLICE.min(deadline - now)
                }
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }
}

/// Route SIGINT and SIGTERM into `token`. The first signal is logged and cancels the token, later
/// ones are only noted.
///
/// ctrlc's `termination` feature, which is what gets us SIGTERM, also catches SIGHUP. A hangup
/// therefore shuts down gracefully as well, rather than killing the process outright.
///
/// This can only be installed once per process.
pub fn install_signal_handler(token: &CancelToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if token.cancel() {
            info!("Received shutdown signal. Initiating graceful shutdown.");
        } else {
            debug!("Shutdown already in progress, ignoring repeated signal");
        }
    })
}
