//! Automation-server process lifecycle.
//!
//! Owns the external automation-server subprocess end to end: prerequisite
//! checks, spawn with piped standard streams, warm-up liveness verification,
//! and bounded-grace termination. The stdin/stdout pair is handed to exactly
//! one transport; the supervisor never exposes the raw child handle.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use webpilot_core::config::ServerConfig;
use webpilot_core::{Error, Result};

/// Stream pair surrendered to the RPC transport for the child's lifetime.
pub struct IoHandles {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

pub struct ProcessSupervisor {
    config: ServerConfig,
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    /// The external runtime and the launcher must both resolve on PATH.
    /// Reported as a structured start error, never a panic; retry policy
    /// belongs to the caller.
    pub fn check_prerequisites(&self) -> Result<()> {
        which::which(&self.config.runtime).map_err(|_| {
            Error::Start(format!(
                "runtime '{}' not found on PATH; install it to enable browser automation",
                self.config.runtime
            ))
        })?;
        which::which(&self.config.launcher).map_err(|_| {
            Error::Start(format!(
                "launcher '{}' not found on PATH; it is required to start '{}'",
                self.config.launcher, self.config.package
            ))
        })?;
        Ok(())
    }

    /// Spawn the automation server and verify it survives the warm-up
    /// interval. Idempotent: when the server is already running the existing
    /// stream handles stay with their transport and `None` is returned.
    pub async fn start(&mut self) -> Result<Option<IoHandles>> {
        if self.is_running() {
            debug!("automation server already running");
            return Ok(None);
        }

        self.check_prerequisites()?;

        info!(
            launcher = %self.config.launcher,
            package = %self.config.package,
            "Starting automation server"
        );

        let mut child = Command::new(&self.config.launcher)
            .arg(&self.config.package)
            .args(&self.config.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Start(format!(
                    "failed to spawn '{} {}': {}",
                    self.config.launcher, self.config.package, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Start("automation server has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Start("automation server has no stdout".into()))?;

        // Fixed warm-up before the liveness check; an early exit here means
        // the package itself failed to boot.
        tokio::time::sleep(Duration::from_millis(self.config.warmup_ms)).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(Error::Start(format!(
                    "automation server exited during warm-up ({})",
                    status
                )));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(Error::Start(format!("failed to poll automation server: {}", e)));
            }
        }

        info!("Automation server started");
        self.child = Some(child);
        Ok(Some(IoHandles { stdin, stdout }))
    }

    /// Graceful termination with a bounded grace period, then a forced kill.
    /// The handle is always cleared so a later `start()` can succeed.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Stopping automation server");
        terminate_gracefully(&child);

        let grace = Duration::from_secs(self.config.stop_grace_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Automation server exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for automation server exit");
            }
            Err(_) => {
                warn!(grace_secs = self.config.stop_grace_secs, "Force-killing automation server");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Force kill failed");
                }
            }
        }
    }

    pub async fn restart(&mut self) -> Result<Option<IoHandles>> {
        self.stop().await;
        self.start().await
    }

    /// True only while a child handle exists and its exit status is unset.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) | Err(_) => {
                    self.child = None;
                    false
                }
            },
            None => false,
        }
    }
}

#[cfg(unix)]
fn terminate_gracefully(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) {
    // No SIGTERM equivalent; the bounded wait below escalates to kill().
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(launcher: &str) -> ServerConfig {
        ServerConfig {
            runtime: "sh".into(),
            launcher: launcher.into(),
            package: "-c".into(),
            extra_args: vec!["sleep 30".into()],
            warmup_ms: 50,
            stop_grace_secs: 1,
        }
    }

    #[test]
    fn test_missing_launcher_is_a_start_error() {
        let supervisor = ProcessSupervisor::new(test_config("definitely-not-a-real-binary"));
        assert!(matches!(
            supervisor.check_prerequisites(),
            Err(Error::Start(_))
        ));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut supervisor = ProcessSupervisor::new(test_config("sh"));
        assert!(!supervisor.is_running());

        let handles = supervisor.start().await.unwrap();
        assert!(handles.is_some());
        assert!(supervisor.is_running());

        // Idempotent second start
        let again = supervisor.start().await.unwrap();
        assert!(again.is_none());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_early_exit_during_warmup_is_a_start_error() {
        let config = ServerConfig {
            extra_args: vec!["exit 3".into()],
            warmup_ms: 200,
            ..test_config("sh")
        };
        let mut supervisor = ProcessSupervisor::new(config);
        assert!(matches!(supervisor.start().await, Err(Error::Start(_))));
        assert!(!supervisor.is_running());
    }
}
