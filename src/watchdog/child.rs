//! API child process management: spawned as a process-group leader so
//! one signal reaches the whole subtree, stopped with SIGTERM, a grace
//! wait and a SIGKILL backstop.

use log::{debug, error, info, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STOP_WAIT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Bare program names resolve to a sibling of the running executable
/// first (the bins install side by side), then fall back to PATH.
pub fn resolve_program(program: &str) -> PathBuf {
    if !program.contains('/') {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join(program);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
    }
    PathBuf::from(program)
}

pub struct ApiChild {
    child: Child,
}

impl ApiChild {
    /// Spawns the API server in a new process group, stdout/stderr
    /// inherited from the watchdog.
    pub fn spawn(command: &[String]) -> io::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty API command"))?;
        let child = Command::new(resolve_program(program))
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()?;
        info!("API server process started (popen_pid={})", child.id());
        Ok(Self { child })
    }

    #[inline]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn poll(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Stops the whole process group: SIGTERM, up to 5 s of grace, then
    /// SIGKILL. Handles an already-gone child at every step.
    pub fn stop(mut self) {
        if let Some(status) = self.poll() {
            info!(
                "API server already stopped (PID: {}, {})",
                self.child.id(),
                status
            );
            return;
        }
        let pid = self.child.id();
        info!("stopping API server (PID: {})", pid);
        #[allow(clippy::cast_possible_wrap)]
        let pgid = match getpgid(Some(Pid::from_raw(pid as i32))) {
            Ok(pgid) => pgid,
            Err(_) => {
                debug!("process already terminated");
                let _ = self.child.wait();
                return;
            }
        };
        if killpg(pgid, Signal::SIGTERM).is_err() {
            debug!("process group already terminated");
            let _ = self.child.wait();
            return;
        }
        let deadline = Instant::now() + STOP_WAIT;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    info!("API server stopped gracefully");
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    thread::sleep(STOP_POLL);
                }
                Err(e) => {
                    error!("error waiting for API server: {}", e);
                    break;
                }
            }
        }
        warn!("API server did not stop, sending SIGKILL");
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = self.child.wait();
        info!("API server killed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_requires_a_program() {
        assert!(ApiChild::spawn(&[]).is_err());
    }

    #[test]
    fn stops_a_long_running_group() {
        let mut child = ApiChild::spawn(&["sleep".to_owned(), "30".to_owned()]).unwrap();
        assert!(child.poll().is_none());
        let started = Instant::now();
        child.stop();
        // SIGTERM ends sleep(1) well within the grace window
        assert!(started.elapsed() < STOP_WAIT);
    }

    #[test]
    fn stop_handles_exited_child() {
        let mut child = ApiChild::spawn(&["true".to_owned()]).unwrap();
        // give it a moment to exit
        thread::sleep(Duration::from_millis(200));
        assert!(child.poll().is_some());
        child.stop();
    }
}
