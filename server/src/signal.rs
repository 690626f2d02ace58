//! Signal handling.
//!
//! SIGINT/SIGTERM trigger graceful shutdown, SIGTTIN requests a log reopen
//! (rotation), SIGPIPE is ignored so peer resets surface as write errors,
//! and SIGSEGV aborts after writing a note to stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static LOG_REOPEN_PENDING: AtomicBool = AtomicBool::new(false);

/// Install handlers for graceful shutdown (SIGINT, SIGTERM).
///
/// Returns a flag that flips to `true` on the first signal; a second signal
/// exits immediately.
pub fn install_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if shutdown_flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, initiating graceful shutdown");
    })
    .expect("failed to set signal handler");

    shutdown
}

extern "C" fn handle_sigttin(_: libc::c_int) {
    LOG_REOPEN_PENDING.store(true, Ordering::Release);
}

extern "C" fn handle_sigsegv(_: libc::c_int) {
    // Only async-signal-safe calls from here.
    let msg = b"caught SIGSEGV, aborting\n";
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

/// Install SIGTTIN (log reopen), SIGPIPE (ignore) and SIGSEGV (abort)
/// handlers.
pub fn install_process_handlers() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGTTIN, handle_sigttin as libc::sighandler_t);
        libc::signal(libc::SIGSEGV, handle_sigsegv as libc::sighandler_t);
    }
}

/// Consume a pending log-reopen request, if any.
pub fn take_log_reopen() -> bool {
    LOG_REOPEN_PENDING.swap(false, Ordering::AcqRel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_reopen_flag_roundtrip() {
        assert!(!take_log_reopen());
        LOG_REOPEN_PENDING.store(true, Ordering::Release);
        assert!(take_log_reopen());
        assert!(!take_log_reopen());
    }
}
