//! Process-group signalling for shell tasks and command runners.

use std::time::Duration;
use tokio::process::Child;

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: libc::c_int) {
    // SAFETY: kill(2) with a negative pid targets the process group. The pid
    // comes from Child::id() and the child was started as a group leader,
    // so the group id equals its pid.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc == -1 {
        tracing::debug!(
            pid,
            signal,
            error = %std::io::Error::last_os_error(),
            "Failed to signal process group"
        );
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pid: u32, _signal: i32) {}

/// SIGTERM the child's process group, wait `grace`, then SIGKILL.
pub(crate) async fn graceful_kill(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        signal_group(pid, libc::SIGTERM);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => {
                // Leader is gone; take stragglers in the group with it
                #[cfg(unix)]
                signal_group(pid, libc::SIGKILL);
                return;
            }
            Err(_) => {
                tracing::debug!(pid, "Process didn't exit after SIGTERM, sending SIGKILL");
                #[cfg(unix)]
                signal_group(pid, libc::SIGKILL);
            }
        }
    }

    // Force kill
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// SIGKILLs a process group when dropped, unless disarmed first
pub(crate) struct GroupKillGuard {
    pid: Option<u32>,
}

impl GroupKillGuard {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub(crate) fn disarm(mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_group(pid, libc::SIGKILL);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;

    fn spawn_group_leader(script: &str) -> Child {
        tokio::process::Command::new("bash")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_graceful_kill_terminates_on_sigterm() {
        let mut child = spawn_group_leader("sleep 30");
        let started = Instant::now();
        graceful_kill(&mut child, Duration::from_secs(5)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_graceful_kill_escalates_when_term_is_ignored() {
        let mut child = spawn_group_leader("trap '' TERM; while true; do sleep 0.1; done");
        // Let bash install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        graceful_kill(&mut child, Duration::from_millis(300)).await;

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(child.try_wait().unwrap().is_some());
    }
}
