//! Hook execution (spec §4.3): a shell command inheriting the parent environment plus
//! `JUMPSTARTER_HOST`/`JMP_DRIVERS_ALLOW`/`LEASE_NAME`/`CLIENT_NAME`, with stdout/stderr
//! line-merged into the log sink and a timeout that escalates SIGTERM → 5s grace → SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{HookConf, OnFailure};
use crate::log_sink::LogSink;

const SIGTERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HookFailure {
    pub message: String,
    pub on_failure: OnFailure,
}

/// Runs `hook` to completion, tagging its merged stdout/stderr into `log_sink` under `source`.
/// `Ok(())` on a zero exit; `Err(HookFailure)` on non-zero exit, timeout (SIGTERM/SIGKILL), or
/// spawn failure — the caller matches on `on_failure` to decide how to react.
pub async fn run_hook(
    hook: &HookConf,
    source: &'static str,
    unix_socket: &camino::Utf8Path,
    lease_name: &str,
    client_name: &str,
    log_sink: &LogSink,
) -> Result<(), HookFailure> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&hook.script)
        .env("JUMPSTARTER_HOST", unix_socket.as_str())
        .env("JMP_DRIVERS_ALLOW", "UNSAFE")
        .env("LEASE_NAME", lease_name)
        .env("CLIENT_NAME", client_name)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| fail(hook, format!("failed to spawn hook: {error}")))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(pump_lines(stdout, source.to_owned(), log_sink.clone(), "info".to_owned()));
    let stderr_task = tokio::spawn(pump_lines(stderr, source.to_owned(), log_sink.clone(), "warn".to_owned()));

    let wait = timeout(Duration::from_secs(hook.timeout_secs), child.wait()).await;

    let status = match wait {
        Ok(result) => result.map_err(|error| fail(hook, format!("hook process error: {error}")))?,
        Err(_elapsed) => {
            escalate(&mut child).await;
            return Err(fail(hook, format!("hook timed out after {}s", hook.timeout_secs)));
        }
    };

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if status.success() {
        Ok(())
    } else {
        Err(fail(hook, format!("hook exited with status {status}")))
    }
}

async fn escalate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if timeout(SIGTERM_GRACE, child.wait()).await.is_err() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            let _ = child.wait().await;
        }
    }
}

fn fail(hook: &HookConf, message: String) -> HookFailure {
    HookFailure {
        message,
        on_failure: hook.on_failure,
    }
}

async fn pump_lines(reader: impl tokio::io::AsyncRead + Unpin, source: String, log_sink: LogSink, severity: String) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log_sink.push(&severity, line, &source);
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn hook(script: &str, on_failure: OnFailure) -> HookConf {
        HookConf {
            script: script.to_owned(),
            timeout_secs: 5,
            on_failure,
        }
    }

    #[tokio::test]
    async fn successful_hook_returns_ok() {
        let log_sink = LogSink::new();
        let socket = Utf8PathBuf::from("/tmp/jmp.sock");
        let result = run_hook(&hook("echo hi", OnFailure::Warn), "BEFORE_LEASE_HOOK", &socket, "L1", "cli", &log_sink).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failing_hook_carries_its_policy() {
        let log_sink = LogSink::new();
        let socket = Utf8PathBuf::from("/tmp/jmp.sock");
        let result = run_hook(&hook("exit 1", OnFailure::EndLease), "AFTER_LEASE_HOOK", &socket, "L1", "cli", &log_sink).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.on_failure, OnFailure::EndLease);
    }

    #[tokio::test]
    async fn hook_stdout_is_routed_to_the_log_sink() {
        let log_sink = LogSink::new();
        let mut rx = log_sink.subscribe();
        let socket = Utf8PathBuf::from("/tmp/jmp.sock");
        run_hook(&hook("echo from-hook", OnFailure::Warn), "BEFORE_LEASE_HOOK", &socket, "L1", "cli", &log_sink)
            .await
            .unwrap();
        let line = rx.recv().await.unwrap();
        assert_eq!(line.message, "from-hook");
        assert_eq!(line.source, "BEFORE_LEASE_HOOK");
    }
}
