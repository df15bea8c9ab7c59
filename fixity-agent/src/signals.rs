//! Cooperative stop on SIGTERM/SIGINT.
//!
//! While a [`StopSignal`] is alive the first signal only raises the stop flag,
//! which the scan loop checks at file boundaries; a second signal terminates
//! the process with the default action. Dropping the guard unregisters the
//! flag handlers and arms the default action again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::SigId;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use tracing::warn;

#[derive(Debug)]
pub struct StopSignal {
    stop: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    flag_ids: Vec<SigId>,
}

impl StopSignal {
    /// Register the handlers. Registration failures are logged and leave that
    /// signal with its previous disposition.
    pub fn install() -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));
        let mut flag_ids = Vec::new();

        for &signal in TERM_SIGNALS {
            // Order matters: the conditional default must see the flag before this delivery sets it.
            #[cfg(unix)]
            let registered = flag::register_conditional_default(signal, Arc::clone(&stop))
                .and_then(|_| {
                    flag::register_conditional_default(signal, Arc::clone(&released))
                })
                .and_then(|_| flag::register(signal, Arc::clone(&stop)));
            #[cfg(not(unix))]
            let registered = flag::register(signal, Arc::clone(&stop));
            match registered {
                Ok(id) => flag_ids.push(id),
                Err(err) => warn!(signal, error = %err, "failed to install stop handler"),
            }
        }

        Self {
            stop,
            released,
            flag_ids,
        }
    }

    /// Shared flag for code that polls between units of work.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl Drop for StopSignal {
    fn drop(&mut self) {
        self.released.store(true, Ordering::Relaxed);
        for id in self.flag_ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
