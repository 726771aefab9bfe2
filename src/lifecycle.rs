//! Signal-driven lifecycle control: config reload on `SIGHUP`, shutdown on
//! `SIGINT`/`SIGTERM`.
//!
//! Handlers only set atomic flags; the event loop polls them once per
//! iteration so all real work happens on the main thread, matching the
//! design note that signal handling is the only true process-wide state.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_hangup(_: i32) {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate(_: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs `SIGHUP`/`SIGINT`/`SIGTERM` handlers. Safe to call once at
/// startup; later calls simply re-register the same handlers.
pub fn install_handlers() {
    unsafe {
        let _ = signal::signal(Signal::SIGHUP, SigHandler::Handler(on_hangup));
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(on_terminate));
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(on_terminate));
    }
}

/// Consumes the reload flag if it was set since the last check.
pub fn take_reload_requested() -> bool {
    RELOAD_REQUESTED.swap(false, Ordering::SeqCst)
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_flag_round_trips_through_take() {
        RELOAD_REQUESTED.store(true, Ordering::SeqCst);
        assert!(take_reload_requested());
        assert!(!take_reload_requested());
    }
}
