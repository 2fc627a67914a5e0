//! Liveness probes: is a file still in use, and who has it open.

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

pub mod lock;
pub mod window;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run an external probe command with a hard deadline.
///
/// Returns `None` when the binary is missing, the spawn fails, or the deadline
/// passes (the child is killed). Callers treat `None` as "probe unavailable"
/// and fall back to their own heuristics.
pub(crate) fn run_with_timeout(mut command: Command, timeout: Duration) -> Option<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                let _ = child.kill();
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_command_completes() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let output = run_with_timeout(cmd, Duration::from_secs(5)).expect("echo should run");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn missing_binary_yields_none() {
        let cmd = Command::new("dqh-no-such-binary-here");
        assert!(run_with_timeout(cmd, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn slow_command_is_killed_at_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let started = Instant::now();
        assert!(run_with_timeout(cmd, Duration::from_millis(100)).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
