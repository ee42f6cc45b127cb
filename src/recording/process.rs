//! Subprocess cleanup discipline (§4.F "the critical invariant", §9 "a
//! scoped guard that runs on every exit path").
//!
//! `tokio::process::Command::kill_on_drop(true)` is the safety net for
//! cancellation and panics; this module adds the graceful-then-forceful
//! escalation the spec requires on ordinary exit paths (timeout, error,
//! or early success) so the encoder is never left running with nothing
//! watching it.

use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tracing::warn;

const PROCESS_TERMINATION_TIMEOUT: Duration = Duration::from_secs(3);
const PROCESS_KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// What actually happened when a running child was cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process had already exited; nothing to clean up.
    AlreadyExited,
    /// Graceful `SIGTERM` was observed within the termination timeout.
    Terminated,
    /// Graceful termination did not land in time; `SIGKILL` was observed
    /// within the kill timeout.
    Killed,
    /// Neither signal was observed to take effect within its deadline;
    /// `kill_on_drop` is the last resort once `child` is dropped.
    ForceExit,
}

/// Escalate: SIGTERM, wait up to 3s; SIGKILL, wait up to 1s; otherwise give
/// up and let `kill_on_drop` reap it on drop. Call this on every exit path
/// from a snapshot/recording subprocess invocation where the child might
/// still be alive (§4.F, §5 "mandatory on cancellation").
pub async fn cleanup_if_running(child: &mut Child) -> TerminationOutcome {
    if child.try_wait().ok().flatten().is_some() {
        return TerminationOutcome::AlreadyExited;
    }

    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %err, "failed to send SIGTERM to encoder process");
        }
    }
    if tokio::time::timeout(PROCESS_TERMINATION_TIMEOUT, child.wait()).await.is_ok() {
        return TerminationOutcome::Terminated;
    }

    warn!("encoder did not exit after SIGTERM, sending SIGKILL");
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "failed to send SIGKILL to encoder process");
    }
    if tokio::time::timeout(PROCESS_KILL_TIMEOUT, child.wait()).await.is_ok() {
        return TerminationOutcome::Killed;
    }

    warn!("encoder still alive after SIGKILL, leaving cleanup to drop");
    TerminationOutcome::ForceExit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn already_exited_child_is_reported_as_such() {
        let mut child = Command::new("true").stdout(Stdio::null()).kill_on_drop(true).spawn().unwrap();
        let _ = child.wait().await;
        assert_eq!(cleanup_if_running(&mut child).await, TerminationOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn running_child_is_terminated_gracefully() {
        let mut child = Command::new("sleep").arg("30").stdout(Stdio::null()).kill_on_drop(true).spawn().unwrap();
        let outcome = cleanup_if_running(&mut child).await;
        assert!(matches!(outcome, TerminationOutcome::Terminated | TerminationOutcome::Killed));
    }
}
