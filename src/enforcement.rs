//! Enforcement of a completed match (§4.6): shadow mode only logs, enforce
//! mode additionally sends `SIGKILL` to the offending PID.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// What actually happened to a matched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Shadow mode: the match was logged only, no signal sent.
    Logged,
    /// Enforce mode: `SIGKILL` delivered successfully.
    Terminated,
    /// Enforce mode: `SIGKILL` failed (process already gone, or we lack
    /// permission). Logged either way: enforcement failure is never
    /// silent (§4.6, §7).
    TerminateFailed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Logged => "logged",
            Action::Terminated => "terminated",
            Action::TerminateFailed => "terminate_failed",
        }
    }
}

/// Whether Grimoire is running in shadow (log-only) or enforce mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Shadow,
    Enforce,
}

/// Act on a completed match per the configured mode. `ESRCH` (process
/// already exited) and `EPERM` (we lost the race, or the target dropped
/// privileges we don't have) are both treated as a failed-but-handled
/// enforcement outcome: never a panic, never a retry (§4.6).
pub fn enforce(mode: Mode, pid: u32) -> Action {
    match mode {
        Mode::Shadow => Action::Logged,
        Mode::Enforce => match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Action::Terminated,
            Err(Errno::ESRCH) | Err(Errno::EPERM) => Action::TerminateFailed,
            Err(_) => Action::TerminateFailed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_mode_never_sends_a_signal() {
        // pid 1 (init) would refuse SIGKILL from us anyway; shadow mode
        // must not even attempt it.
        assert_eq!(enforce(Mode::Shadow, 1), Action::Logged);
    }

    #[test]
    fn enforce_mode_against_a_vanished_pid_fails_cleanly() {
        // A PID this large is essentially guaranteed not to exist.
        let action = enforce(Mode::Enforce, i32::MAX as u32 - 1);
        assert_eq!(action, Action::TerminateFailed);
    }
}
