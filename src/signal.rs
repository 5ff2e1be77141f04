//! SIGINT handling during apply
//!
//! The first Ctrl-C requests cancellation: nothing new is dispatched and
//! in-flight provider calls are allowed to finish so their state is
//! recorded. A second Ctrl-C exits immediately with status 130.

use anyhow::Result;
use declarative::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(130) };
    }
}

/// Install the SIGINT handler and forward the first interrupt to `cancel`.
#[cfg(unix)]
pub fn install(cancel: &CancelToken) -> Result<()> {
    INTERRUPTED.store(false, Ordering::SeqCst);

    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only touches an atomic and calls _exit
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        anyhow::bail!(
            "Failed to install SIGINT handler: {}",
            std::io::Error::last_os_error()
        );
    }

    let cancel = cancel.clone();
    thread::Builder::new()
        .name("signal-watcher".into())
        .spawn(move || watch(&cancel))?;
    log::debug!("SIGINT handler installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn install(_cancel: &CancelToken) -> Result<()> {
    log::debug!("Interrupt handling is not available on this platform");
    Ok(())
}

fn watch(cancel: &CancelToken) {
    loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            log::warn!("Interrupt received, waiting for in-flight actions to finish");
            cancel.cancel();
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Whether an interrupt has been received since [`install`]
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_forwards_interrupt() {
        let cancel = CancelToken::new();
        INTERRUPTED.store(true, Ordering::SeqCst);
        watch(&cancel);
        assert!(cancel.is_cancelled());
        assert!(interrupted());
        INTERRUPTED.store(false, Ordering::SeqCst);
    }
}
