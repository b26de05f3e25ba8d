//! Process probes, signals, and PID files

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PrismError, Result};

/// Probe whether a process exists, using the null signal
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Send a cooperative interrupt
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| PrismError::internal(format!("SIGTERM to {} failed: {}", pid, e)))?;
    Ok(())
}

/// Escalate to an uncatchable termination
#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| PrismError::internal(format!("SIGKILL to {} failed: {}", pid, e)))?;
    Ok(())
}

/// PID file path for a namespace's pattern process
pub fn pid_file_path(logs_dir: &Path, namespace: &str) -> PathBuf {
    logs_dir.join(format!("{}.pid", namespace))
}

/// Write the supervisory PID file
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", pid))?;
    Ok(())
}

/// Read a PID file written by [`write_pid_file`]
pub fn read_pid_file(path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(path)?;
    contents.trim().parse::<u32>().map_err(|_| {
        PrismError::validation("pid_file", format!("{} does not contain a PID", path.display()))
            .into()
    })
}

/// Remove the PID file; absence is not an error
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed removing PID file {}: {}", path.display(), e);
        }
    }
}
