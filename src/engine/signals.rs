//! SIGUSR1 flips verbose output at runtime
//!
//! The handler itself only queues the signal; the toggle and its log line run
//! on a dedicated thread.

use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::SIGUSR1;
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, info};

use super::worker::Verbosity;

/// Background listener toggling a [`Verbosity`] on every SIGUSR1
///
/// Dropping it unregisters the listener and joins its thread.
pub struct VerboseSignal {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl VerboseSignal {
    pub fn spawn(verbose: Verbosity) -> io::Result<Self> {
        let mut signals = Signals::new([SIGUSR1])?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for _ in signals.forever() {
                    let enabled = verbose.toggle();
                    info!("Verbose output {}", if enabled { "on" } else { "off" });
                }
                debug!("Signal listener stopped");
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for VerboseSignal {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until(verbose: &Verbosity, enabled: bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if verbose.is_enabled() == enabled {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_sigusr1_toggles_verbose() {
        let verbose = Verbosity::new(false);
        let listener = VerboseSignal::spawn(verbose.clone()).unwrap();

        signal_hook::low_level::raise(SIGUSR1).unwrap();
        assert!(wait_until(&verbose, true));

        signal_hook::low_level::raise(SIGUSR1).unwrap();
        assert!(wait_until(&verbose, false));

        drop(listener);
    }
}
