//! Process hooks: at-exit registration and termination-signal disposition.
//!
//! Only unix targets get real hooks. Elsewhere installation is a no-op and
//! coverage must be written through an explicit request.

use crate::logger::DiagnosticLogger;
#[cfg(unix)]
use crate::{logger::Diagnostic, runtime::Runtime};

#[cfg(unix)]
pub use self::unix::{signal_disposition, SignalDisposition, TERMINATION_SIGNAL};

/// Install the at-exit hook and, if `sigterm` is set, the termination-signal
/// handler. Failures are reported, never raised.
pub(crate) fn install(sigterm: bool, logger: &DiagnosticLogger) {
    #[cfg(unix)]
    {
        if let Err(err) = unix::install_exit_hook(on_process_exit) {
            logger.report(&Diagnostic::Detail(format!(
                "cannot register exit hook: {err}"
            )));
        }
        if sigterm {
            if let Err(err) = unix::set_handler(TERMINATION_SIGNAL, on_termination_signal) {
                logger.report(&Diagnostic::Detail(format!(
                    "cannot install SIGTERM handler: {err}"
                )));
            }
        }
        tracing::debug!(sigterm, "coverage hooks installed");
    }
    #[cfg(not(unix))]
    {
        let _ = (sigterm, logger);
        tracing::debug!("no process hooks on this target");
    }
}

/// Ignore `signal` while a dump runs
pub(crate) fn ignore_signal(signal: i32) {
    #[cfg(unix)]
    let _ = unix::set_disposition(signal, libc::SIG_IGN);
    #[cfg(not(unix))]
    let _ = signal;
}

/// Hand `signal` back to the OS default
pub(crate) fn restore_default(signal: i32) {
    #[cfg(unix)]
    let _ = unix::set_disposition(signal, libc::SIG_DFL);
    #[cfg(not(unix))]
    let _ = signal;
}

/// End the process the way an intercepted termination signal does
pub(crate) fn terminate() -> ! {
    std::process::exit(0)
}

#[cfg(unix)]
extern "C" fn on_process_exit() {
    if let Some(runtime) = Runtime::try_process() {
        runtime.dump_at_exit();
    }
}

#[cfg(unix)]
extern "C" fn on_termination_signal(signal: libc::c_int) {
    if let Some(runtime) = Runtime::try_process() {
        // a dump already in progress finishes first and exits on its own terms
        if !runtime.dump_on_signal(signal).terminates() {
            return;
        }
    }
    terminate();
}

#[cfg(unix)]
mod unix {
    use std::io;

    /// Signal that triggers a dump when enabled
    pub const TERMINATION_SIGNAL: i32 = libc::SIGTERM;

    /// What the process currently does on a signal
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalDisposition {
        /// OS default action
        Default,
        /// Signal is ignored
        Ignore,
        /// A handler is installed
        Handler,
    }

    pub(super) fn install_exit_hook(hook: extern "C" fn()) -> io::Result<()> {
        // SAFETY: `hook` is a plain function with no captured state.
        let rc = unsafe { libc::atexit(hook) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::other("atexit table is full"))
        }
    }

    pub(super) fn set_handler(signal: i32, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
        set_disposition(signal, handler as libc::sighandler_t)
    }

    pub(super) fn set_disposition(signal: i32, handler: libc::sighandler_t) -> io::Result<()> {
        // SAFETY: the sigaction struct is fully initialized before use and
        // `handler` is SIG_IGN, SIG_DFL or an `extern "C" fn(c_int)`.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Query the current disposition of `signal`
    pub fn signal_disposition(signal: i32) -> io::Result<SignalDisposition> {
        // SAFETY: a null new action only reads the current one.
        let current = unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, std::ptr::null(), &mut current) != 0 {
                return Err(io::Error::last_os_error());
            }
            current.sa_sigaction
        };
        Ok(match current {
            libc::SIG_DFL => SignalDisposition::Default,
            libc::SIG_IGN => SignalDisposition::Ignore,
            _ => SignalDisposition::Handler,
        })
    }

}
