//! Pattern process supervision
//!
//! The launcher exclusively owns the OS processes it spawns: it writes their
//! PID files, detaches them into their own process groups so a launcher
//! restart does not cascade, probes liveness with the null signal, and
//! escalates SIGTERM to SIGKILL on shutdown. It never writes admin state;
//! failures are reported upward and the admin stays the source of truth.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::LauncherConfig;
use crate::error::{ErrorCode, PrismError, Result};
use crate::protocol::frame::PatternExit;

use super::process;

/// A spawn request, as carried by a `SpawnPattern` instruction
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub pattern: String,
    pub namespace: String,
    pub proxy_addr: String,
    pub config: serde_json::Value,
}

struct SupervisedChild {
    pattern_name: String,
    pid: u32,
    pid_file: PathBuf,
    /// Kept so exited children are reaped before the null-signal probe
    child: Option<Child>,
}

impl SupervisedChild {
    /// Reap if exited, then probe with the null signal
    fn alive(&mut self) -> bool {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) => return false,
                Ok(None) => return true,
                Err(_) => {}
            }
        }
        process::process_alive(self.pid)
    }
}

/// Supervises pattern processes for an assigned capacity
pub struct Supervisor {
    config: LauncherConfig,
    children: Mutex<HashMap<String, SupervisedChild>>,
}

impl Supervisor {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Free pattern slots
    pub fn available_slots(&self) -> u32 {
        let used = self.children.lock().expect("children lock").len() as u32;
        self.config.max_patterns.saturating_sub(used)
    }

    /// Namespaces currently supervised
    pub fn supervised_namespaces(&self) -> Vec<String> {
        self.children
            .lock()
            .expect("children lock")
            .keys()
            .cloned()
            .collect()
    }

    /// Spawn a pattern executable for a namespace
    ///
    /// The child gets its namespace, proxy address, and working directory
    /// through the environment, is detached into its own process group, and
    /// has its PID recorded in a supervisory file. Spawns are serialized by
    /// the children lock so PID-file writes stay atomic.
    pub fn spawn_pattern(&self, spec: &SpawnSpec) -> Result<u32> {
        let mut children = self.children.lock().expect("children lock");

        if children.len() as u32 >= self.config.max_patterns {
            return Err(PrismError::new(
                ErrorCode::CapacityExhausted,
                format!("launcher {} has no free slots", self.config.launcher_id),
            )
            .into());
        }
        if children.contains_key(&spec.namespace) {
            return Err(PrismError::already_exists("supervised namespace", &spec.namespace)
                .with_namespace(spec.namespace.clone())
                .into());
        }

        let binary = self.config.binaries_dir.join(&spec.pattern);
        if !binary.is_file() {
            return Err(PrismError::validation(
                "pattern",
                format!("no executable at {}", binary.display()),
            )
            .into());
        }

        std::fs::create_dir_all(&self.config.logs_dir)?;
        let log_path = self.config.logs_dir.join(format!("{}.log", spec.namespace));
        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let log_for_stderr = log_file.try_clone()?;

        let mut command = Command::new(&binary);
        command
            .current_dir(&self.config.logs_dir)
            .env("PRISM_PATTERN__NAMESPACE", &spec.namespace)
            .env("PRISM_PATTERN__PROXY_ADDR", &spec.proxy_addr)
            .env("PRISM_SPAWN_CONFIG", spec.config.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_for_stderr));

        // Detach: the launcher's exit must not cascade into its children.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| {
            PrismError::backend(
                "launcher",
                "spawn",
                format!("{} failed to start: {}", binary.display(), e),
            )
        })?;
        let pid = child.id();

        let pid_file = process::pid_file_path(&self.config.logs_dir, &spec.namespace);
        process::write_pid_file(&pid_file, pid)?;

        children.insert(
            spec.namespace.clone(),
            SupervisedChild {
                pattern_name: spec.pattern.clone(),
                pid,
                pid_file,
                child: Some(child),
            },
        );
        tracing::info!(
            namespace = %spec.namespace,
            pattern = %spec.pattern,
            pid,
            "Pattern process spawned"
        );
        Ok(pid)
    }

    /// Stop the process serving a namespace
    ///
    /// Cooperative SIGTERM, a bounded grace period, then SIGKILL. A zero
    /// grace escalates immediately. The PID file is removed last.
    pub async fn stop_pattern(&self, namespace: &str, grace: Duration) -> Result<()> {
        let mut entry = {
            let mut children = self.children.lock().expect("children lock");
            children.remove(namespace).ok_or_else(|| {
                crate::error::Error::from(PrismError::not_found("supervised namespace", namespace))
            })?
        };

        if entry.alive() {
            if grace.is_zero() {
                tracing::info!(namespace, pid = entry.pid, "Zero grace, killing immediately");
                let _ = process::force_kill(entry.pid);
            } else {
                process::terminate(entry.pid)?;
                let deadline = tokio::time::Instant::now() + grace;
                while entry.alive() && tokio::time::Instant::now() < deadline {
                    sleep(Duration::from_millis(100)).await;
                }
                if entry.alive() {
                    tracing::warn!(namespace, pid = entry.pid, "Grace expired, escalating to SIGKILL");
                    let _ = process::force_kill(entry.pid);
                }
            }
            // Reap so the PID leaves the process table.
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while entry.alive() && tokio::time::Instant::now() < deadline {
                sleep(Duration::from_millis(50)).await;
            }
        }

        process::remove_pid_file(&entry.pid_file);
        tracing::info!(namespace, pid = entry.pid, "Pattern process stopped");
        Ok(())
    }

    /// One liveness sweep; returns exits for every vanished process
    pub fn poll_once(&self) -> Vec<PatternExit> {
        let mut children = self.children.lock().expect("children lock");
        let mut exits = Vec::new();

        let dead: Vec<String> = children
            .iter_mut()
            .filter_map(|(namespace, child)| (!child.alive()).then(|| namespace.clone()))
            .collect();

        for namespace in dead {
            if let Some(child) = children.remove(&namespace) {
                tracing::warn!(
                    namespace = %namespace,
                    pattern = %child.pattern_name,
                    pid = child.pid,
                    "Pattern process missing"
                );
                process::remove_pid_file(&child.pid_file);
                exits.push(PatternExit {
                    namespace,
                    pattern_name: child.pattern_name,
                    process_id: child.pid,
                    message: "process missing (null-signal probe)".to_string(),
                });
            }
        }
        exits
    }

    /// Poll liveness on the configured interval, reporting exits upward
    pub async fn run_poll_loop(
        &self,
        exits: tokio::sync::mpsc::Sender<PatternExit>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for exit in self.poll_once() {
                        if exits.send(exit).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }

    /// Stop every supervised process, used at launcher shutdown
    pub async fn shutdown_all(&self) {
        let namespaces = self.supervised_namespaces();
        for namespace in namespaces {
            if let Err(e) = self.stop_pattern(&namespace, self.config.stop_grace()).await {
                tracing::warn!(namespace = %namespace, "Shutdown stop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write a fake pattern binary that just sleeps
    fn fake_pattern(dir: &std::path::Path, name: &str) {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn test_config(binaries: &TempDir, logs: &TempDir, max_patterns: u32) -> LauncherConfig {
        LauncherConfig {
            launcher_id: "launcher-test".to_string(),
            binaries_dir: binaries.path().to_path_buf(),
            logs_dir: logs.path().to_path_buf(),
            max_patterns,
            poll_interval_secs: 1,
            stop_grace_secs: 2,
            ..LauncherConfig::default()
        }
    }

    fn spec(namespace: &str) -> SpawnSpec {
        SpawnSpec {
            pattern: "sleeper".to_string(),
            namespace: namespace.to_string(),
            proxy_addr: "127.0.0.1:8980".to_string(),
            config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_spawn_probe_stop() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        fake_pattern(binaries.path(), "sleeper");
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 4));

        let pid = supervisor.spawn_pattern(&spec("ns-a")).unwrap();
        assert!(process::process_alive(pid));
        assert_eq!(supervisor.available_slots(), 3);

        // PID file written with the child's PID
        let pid_file = process::pid_file_path(logs.path(), "ns-a");
        assert_eq!(process::read_pid_file(&pid_file).unwrap(), pid);

        supervisor
            .stop_pattern("ns-a", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!process::process_alive(pid));
        assert!(!pid_file.exists(), "PID file removed last");
        assert_eq!(supervisor.available_slots(), 4);
    }

    #[tokio::test]
    async fn test_zero_grace_escalates_immediately() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        fake_pattern(binaries.path(), "sleeper");
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 4));

        let pid = supervisor.spawn_pattern(&spec("ns-a")).unwrap();
        let started = std::time::Instant::now();
        supervisor
            .stop_pattern("ns-a", Duration::ZERO)
            .await
            .unwrap();
        assert!(!process::process_alive(pid));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_capacity_exhausted() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        fake_pattern(binaries.path(), "sleeper");
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 1));

        supervisor.spawn_pattern(&spec("ns-a")).unwrap();
        let err = supervisor.spawn_pattern(&spec("ns-b")).unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::CapacityExhausted
        );
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_duplicate_namespace_rejected() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        fake_pattern(binaries.path(), "sleeper");
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 4));

        supervisor.spawn_pattern(&spec("ns-a")).unwrap();
        let err = supervisor.spawn_pattern(&spec("ns-a")).unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::AlreadyExists
        );
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_validation_error() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 4));

        let err = supervisor.spawn_pattern(&spec("ns-a")).unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::ValidationFailed
        );
    }

    #[tokio::test]
    async fn test_poll_detects_killed_process() {
        let binaries = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        fake_pattern(binaries.path(), "sleeper");
        let supervisor = Supervisor::new(test_config(&binaries, &logs, 4));

        let pid = supervisor.spawn_pattern(&spec("ns-a")).unwrap();
        assert!(supervisor.poll_once().is_empty());

        process::force_kill(pid).unwrap();
        // give the kernel a beat to deliver
        tokio::time::sleep(Duration::from_millis(200)).await;

        let exits = supervisor.poll_once();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].namespace, "ns-a");
        assert_eq!(exits[0].process_id, pid);
        // slot freed and PID file gone
        assert_eq!(supervisor.available_slots(), 4);
        assert!(!process::pid_file_path(logs.path(), "ns-a").exists());
    }
}
