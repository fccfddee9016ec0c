//! Child process handling.
//!
//! One seam over the per-OS details: children run in their own process
//! group so timeouts and cancellation can terminate the whole tree, and a
//! sampling side-task tracks peak RSS/CPU without ever blocking the wait.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between resource samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// How a wait on a child concluded.
#[derive(Debug)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// A spawned child placed in its own process group.
pub struct ChildHandle {
    child: Child,
    pid: Option<u32>,
}

/// Spawn `cmd` in a fresh process group.
pub fn spawn_in_group(cmd: &mut Command) -> std::io::Result<ChildHandle> {
    #[cfg(unix)]
    {
        // SAFETY: setpgid in the forked child before exec; no allocation,
        // no locks, async-signal-safe.
        #[expect(unsafe_code, reason = "required to place the child in its own process group")]
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    let child = cmd.spawn()?;
    let pid = child.id();
    Ok(ChildHandle { child, pid })
}

impl ChildHandle {
    /// OS process id, if the child has not already been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the piped stdout handle, if any.
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the piped stderr handle, if any.
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the child, bounded by an optional timeout and a
    /// cancellation token. Neither the timeout nor cancellation terminates
    /// the child; callers follow up with [`ChildHandle::terminate_group`].
    pub async fn wait_with_timeout(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> std::io::Result<WaitOutcome> {
        if let Some(limit) = timeout {
            tokio::select! {
                status = self.child.wait() => Ok(WaitOutcome::Exited(status?)),
                () = tokio::time::sleep(limit) => Ok(WaitOutcome::TimedOut),
                () = cancel.cancelled() => Ok(WaitOutcome::Cancelled),
            }
        } else {
            tokio::select! {
                status = self.child.wait() => Ok(WaitOutcome::Exited(status?)),
                () = cancel.cancelled() => Ok(WaitOutcome::Cancelled),
            }
        }
    }

    /// Terminate the child's process group: graceful signal, a grace
    /// period, then a hard kill. Always reaps the child before returning,
    /// so no descendant of a timed-out task survives this call.
    pub async fn terminate_group(&mut self, grace: Duration) {
        if let Some(pid) = self.pid {
            debug!(pid, "terminating process group");
            send_term_signal(pid);
        }

        if !grace.is_zero()
            && tokio::time::timeout(grace, self.child.wait()).await.is_ok()
        {
            return;
        }

        if let Some(pid) = self.pid {
            send_kill_signal(pid);
        }
        let _ = self.child.wait().await;
    }
}

/// Sends SIGTERM to the child's process group.
#[cfg(unix)]
fn send_term_signal(pid: u32) {
    // SAFETY: kill with a negative pid signals the whole process group; the
    // pid came from a child we spawned. SIGTERM requests graceful shutdown.
    #[expect(unsafe_code, reason = "POSIX process-group signalling")]
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

/// Sends SIGKILL to the child's process group.
#[cfg(unix)]
fn send_kill_signal(pid: u32) {
    // SAFETY: as above; SIGKILL forces termination.
    #[expect(unsafe_code, reason = "POSIX process-group signalling")]
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn send_term_signal(pid: u32) {
    use sysinfo::Signal;

    let mut system = System::new();
    let process_pid = Pid::from(pid as usize);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[process_pid]),
        false,
        ProcessRefreshKind::nothing(),
    );
    if let Some(process) = system.process(process_pid) {
        let _ = process.kill_with(Signal::Term);
    }
}

#[cfg(not(unix))]
fn send_kill_signal(pid: u32) {
    use sysinfo::Signal;

    let mut system = System::new();
    let process_pid = Pid::from(pid as usize);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[process_pid]),
        false,
        ProcessRefreshKind::nothing(),
    );
    if let Some(process) = system.process(process_pid) {
        let _ = process.kill_with(Signal::Kill);
    }
}

/// Peak resource usage shared between a runner and its sampling side-task.
///
/// Updates go through atomic fetch-max, so a late sample can never lower a
/// recorded peak.
#[derive(Debug, Clone, Default)]
pub struct ResourcePeaks {
    rss_bytes: Arc<AtomicU64>,
    cpu_millipct: Arc<AtomicU64>,
}

impl ResourcePeaks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&self, rss_bytes: u64, cpu_pct: f32) {
        self.rss_bytes.fetch_max(rss_bytes, Ordering::Relaxed);
        let millipct = (f64::from(cpu_pct) * 1000.0).max(0.0) as u64;
        self.cpu_millipct.fetch_max(millipct, Ordering::Relaxed);
    }

    #[must_use]
    pub fn peak_rss_bytes(&self) -> u64 {
        self.rss_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_cpu_pct(&self) -> f64 {
        self.cpu_millipct.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Start a sampling side-task polling `pid` every [`SAMPLE_INTERVAL`].
///
/// The task ends on its own when the process disappears; runners abort it
/// after the wait completes. Sample failures are swallowed.
pub fn spawn_sampler(pid: u32, peaks: ResourcePeaks) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new();
        let process_pid = Pid::from(pid as usize);
        let refresh = ProcessRefreshKind::nothing().with_memory().with_cpu();

        loop {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[process_pid]),
                false,
                refresh,
            );
            match system.process(process_pid) {
                Some(process) => peaks.observe(process.memory(), process.cpu_usage()),
                None => break,
            }
            tokio::time::sleep(SAMPLE_INTERVAL).await;
        }
    })
}
