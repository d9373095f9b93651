//! Lifecycle management for the single supervised backend process
//!
//! The supervisor spawns the backend with its configured environment,
//! waits for it to answer its health endpoint, and terminates it when the
//! gateway shuts down. There is exactly one supervised child: the handle
//! lives in an owned `Supervisor` shared between the boot path and the
//! shutdown path, never in global state. No restart-on-crash: a backend
//! that dies after startup is only observed as failed forwards.

use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, ReadinessConfig};
use crate::health::HealthProbe;

pub struct Supervisor {
    backend: BackendConfig,
    readiness: ReadinessConfig,
    /// The tracked child, if one has been spawned and not yet stopped.
    /// The lock is never held across an await point.
    child: Mutex<Option<Child>>,
}

impl Supervisor {
    /// Create a new supervisor.
    ///
    /// Returns `Arc<Self>` because the supervisor is shared between the
    /// boot path and the shutdown path.
    pub fn new(backend: BackendConfig, readiness: ReadinessConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            readiness,
            child: Mutex::new(None),
        })
    }

    /// Spawn the backend and wait for it to become ready.
    ///
    /// Readiness is a bounded poll of the backend's health endpoint: the
    /// call returns as soon as the endpoint answers 2xx, and fails if the
    /// startup deadline passes or the child exits first. The listener must
    /// not open until this returns.
    pub async fn start(&self, probe: &HealthProbe) -> anyhow::Result<()> {
        self.spawn()?;
        self.wait_ready(probe).await
    }

    /// Spawn the backend process without waiting for readiness
    pub fn spawn(&self) -> anyhow::Result<()> {
        if self.child.lock().is_some() {
            debug!("Backend already running");
            return Ok(());
        }

        let (program, args) = self.backend.command_line()?;
        info!(command = %self.backend.command, "Starting backend");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Last-resort cleanup if the gateway dies without running stop()
        cmd.kill_on_drop(true);

        if let Some(ref working_dir) = self.backend.working_dir {
            cmd.current_dir(working_dir);
        }

        // Overlay the configured environment on the ambient one
        for (key, value) in &self.backend.env {
            cmd.env(key, value);
        }

        // The forwarder dials the same port the child is told to bind
        cmd.env("PORT", self.backend.port.to_string());
        cmd.env("HOST", &self.backend.bind_host);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn backend {:?}: {}", program, e))?;
        let pid = child.id().unwrap_or(0);
        info!(pid, "Backend process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_output("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_output("stderr", stderr));
        }

        *self.child.lock() = Some(child);
        Ok(())
    }

    /// Poll the health endpoint until the backend answers or the startup
    /// deadline passes
    async fn wait_ready(&self, probe: &HealthProbe) -> anyhow::Result<()> {
        let interval = self.readiness.poll_interval();
        let deadline = self.readiness.startup_timeout();
        let start = Instant::now();

        debug!(
            deadline_secs = deadline.as_secs(),
            interval_ms = interval.as_millis() as u64,
            "Waiting for backend to become ready"
        );

        loop {
            if let Some(status) = self.try_wait_exit()? {
                anyhow::bail!("Backend exited during startup ({})", status);
            }

            if probe.check().await {
                info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Backend is ready"
                );
                return Ok(());
            }

            if start.elapsed() > deadline {
                anyhow::bail!(
                    "Backend did not become ready within {}s",
                    deadline.as_secs()
                );
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Stop the tracked backend, if any: SIGTERM, wait up to the grace
    /// period, SIGKILL if it is still running. Safe to call repeatedly and
    /// before any start.
    pub async fn stop(&self) {
        let child = self.child.lock().take();
        let Some(mut child) = child else {
            debug!("No backend tracked, nothing to stop");
            return;
        };

        let grace = self.backend.shutdown_grace();

        if let Some(pid) = child.id() {
            info!(pid, "Sending SIGTERM to backend");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }

            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "Backend process exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for backend to exit");
            }
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = child.kill().await;
            }
        }
    }

    /// Pid of the tracked child, if any
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|c| c.id())
    }

    /// Whether a tracked child is currently alive
    pub fn is_running(&self) -> bool {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Check for an already-exited child without blocking (reaps it)
    fn try_wait_exit(&self) -> anyhow::Result<Option<std::process::ExitStatus>> {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }
}

/// Drain one of the child's output streams into the log
async fn stream_output<R>(stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;

    fn test_backend(command: &str) -> BackendConfig {
        BackendConfig {
            command: command.to_string(),
            shutdown_grace_secs: 2,
            // Nothing listens here, so readiness probes always fail
            port: 39741,
            ..Default::default()
        }
    }

    fn fast_readiness() -> ReadinessConfig {
        ReadinessConfig {
            poll_interval_ms: 50,
            startup_timeout_secs: 2,
        }
    }

    fn probe_for(backend: &BackendConfig) -> HealthProbe {
        HealthProbe::new(backend, &TimeoutConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let supervisor = Supervisor::new(test_backend("sleep 60"), fast_readiness());

        assert!(!supervisor.is_running());
        supervisor.spawn().unwrap();
        assert!(supervisor.is_running());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let supervisor = Supervisor::new(test_backend("sleep 60"), fast_readiness());

        // Stop before any start is a no-op
        supervisor.stop().await;

        supervisor.spawn().unwrap();
        supervisor.stop().await;
        // Second stop has no child to signal
        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_spawn_twice_keeps_first_child() {
        let supervisor = Supervisor::new(test_backend("sleep 60"), fast_readiness());

        supervisor.spawn().unwrap();
        supervisor.spawn().unwrap();
        assert!(supervisor.is_running());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_spawn_unknown_program_fails() {
        let supervisor = Supervisor::new(
            test_backend("definitely-not-a-real-program-xyz"),
            fast_readiness(),
        );

        assert!(supervisor.spawn().is_err());
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_start_times_out_when_backend_never_listens() {
        let backend = test_backend("sleep 60");
        let probe = probe_for(&backend);
        let supervisor = Supervisor::new(backend, fast_readiness());

        let err = supervisor.start(&probe).await.unwrap_err();
        assert!(err.to_string().contains("did not become ready"));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_start_fails_fast_when_child_exits() {
        let backend = test_backend("true");
        let probe = probe_for(&backend);
        let supervisor = Supervisor::new(backend, fast_readiness());

        let err = supervisor.start(&probe).await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }
}
