use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared by the session loop, the backoff
/// sleep and the operator prompt.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide signal, set by SIGINT and SIGTERM.
    pub fn install() -> Result<Self> {
        let flag = handler::install()?;
        Ok(Self { flag })
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    /// Returns `false` if it was interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

#[cfg(unix)]
mod handler {
    use std::ffi::c_int;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, OnceLock};

    use anyhow::{Context, Result};
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    static HANDLER_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    extern "C" fn on_signal(_: c_int) {
        if let Some(flag) = HANDLER_FLAG.get() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub(super) fn install() -> Result<Arc<AtomicBool>> {
        let flag = HANDLER_FLAG
            .get_or_init(|| Arc::new(AtomicBool::new(false)))
            .clone();
        // No SA_RESTART: blocking waits must see EINTR and re-check the flag.
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only stores to an atomic that was
            // initialised before the handler is installed.
            unsafe { sigaction(signal, &action) }
                .with_context(|| format!("failed to install {signal} handler"))?;
        }
        Ok(flag)
    }
}

#[cfg(not(unix))]
mod handler {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use anyhow::Result;

    pub(super) fn install() -> Result<Arc<AtomicBool>> {
        Ok(Arc::new(AtomicBool::new(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_triggered());
        clone.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn sleep_is_cut_short_by_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let started = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)));
    }
}
