//! Supervision of a consensus hosted in an OS subprocess
//!
//! The launcher spawns the worker process and hands the reaped-by-us child
//! to a dedicated watcher thread. The watcher blocks in `wait(2)` for the
//! process's whole lifetime, publishes the exit through an [`ExitGate`], and
//! treats any exit that was not requested through [`SubprocessHandle::stop`]
//! as a crash: a consensus holds irreplaceable application state, so the
//! manager cannot limp along without it and fails fast instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use keel_core::KeelError;
use keel_protocol::ConsensusId;

/// How long a stopped process gets to exit on SIGTERM before it is killed
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How long a crash is held back before fail-fast, so that an interrupt
/// aimed at the whole process group wins the race and produces a clean
/// shutdown instead.
const CRASH_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Publishes a child's exit status from the watcher thread to whoever is
/// stopping the child.
struct ExitGate {
    status: Mutex<Option<i32>>,
    exited: Condvar,
}

impl ExitGate {
    fn new() -> Self {
        Self {
            status: Mutex::new(None),
            exited: Condvar::new(),
        }
    }

    fn notify(&self, code: i32) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        *status = Some(code);
        self.exited.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let (status, _) = self
            .exited
            .wait_timeout_while(status, timeout, |status| status.is_none())
            .unwrap_or_else(|e| e.into_inner());
        *status
    }

    fn wait(&self) -> i32 {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let status = self
            .exited
            .wait_while(status, |status| status.is_none())
            .unwrap_or_else(|e| e.into_inner());
        status.unwrap_or(-1)
    }
}

/// The action taken when a supervised process exits without being asked to.
///
/// The default terminates the current process; embedders that want to
/// observe crashes instead can install their own action.
#[derive(Clone)]
pub struct FailFast {
    action: Arc<dyn Fn() + Send + Sync>,
}

impl FailFast {
    /// Fail fast by sending SIGTERM to the current process, giving it the
    /// chance to shut down cleanly.
    pub fn terminate_self() -> Self {
        Self::with_action(|| {
            #[cfg(unix)]
            unsafe {
                libc::kill(libc::getpid(), libc::SIGTERM);
            }
            #[cfg(not(unix))]
            std::process::exit(1);
        })
    }

    /// Fail fast by running an arbitrary action
    pub fn with_action(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    fn trigger(&self) {
        (self.action)();
    }
}

impl Default for FailFast {
    fn default() -> Self {
        Self::terminate_self()
    }
}

impl fmt::Debug for FailFast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailFast")
    }
}

/// Handle to a supervised subprocess consensus.
///
/// The child itself is owned by the watcher thread; the handle only keeps
/// the pid for signalling and the gate for observing the exit.
pub struct SubprocessHandle {
    pid: u32,
    stopping: Arc<AtomicBool>,
    gate: Arc<ExitGate>,
}

impl SubprocessHandle {
    /// Take ownership of a freshly spawned child and start watching it
    pub(crate) fn supervise(
        mut child: std::process::Child,
        consensus_id: ConsensusId,
        fail_fast: FailFast,
    ) -> std::io::Result<Self> {
        let pid = child.id();
        let stopping = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(ExitGate::new());

        let watcher_stopping = Arc::clone(&stopping);
        let watcher_gate = Arc::clone(&gate);
        std::thread::Builder::new()
            .name(format!("watch-{consensus_id}"))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                watcher_gate.notify(code);

                if !watcher_stopping.load(Ordering::SeqCst) {
                    tracing::error!(
                        "process for consensus '{}' has prematurely exited \
                         with status code '{}'",
                        consensus_id,
                        code,
                    );
                    std::thread::sleep(CRASH_GRACE_PERIOD);
                    // The stop may have begun while we slept.
                    if !watcher_stopping.load(Ordering::SeqCst) {
                        fail_fast.trigger();
                    }
                }
            })?;

        Ok(Self {
            pid,
            stopping,
            gate,
        })
    }

    /// Operating system pid of the supervised process
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop the process: SIGTERM, a grace period, then SIGKILL.
    ///
    /// Returns once the process has actually exited. The signalling and
    /// waiting block, so they run on a blocking thread.
    pub async fn stop(self) -> Result<(), KeelError> {
        tokio::task::spawn_blocking(move || self.stop_blocking())
            .await
            .map_err(std::io::Error::other)?;
        Ok(())
    }

    fn stop_blocking(self) {
        self.stopping.store(true, Ordering::SeqCst);
        signal(self.pid, Signal::Terminate);
        if self.gate.wait_timeout(TERMINATE_GRACE_PERIOD).is_none() {
            signal(self.pid, Signal::Kill);
            // SIGKILL cannot be trapped, so this wait is bounded by the
            // kernel reaping the process.
            self.gate.wait();
        }
    }
}

impl fmt::Debug for SubprocessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubprocessHandle")
            .field("pid", &self.pid)
            .finish()
    }
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal(pid: u32, signal: Signal) {
    let signal = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // An ESRCH failure means the process is already gone, which the exit
    // gate will confirm.
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(not(unix))]
fn signal(_pid: u32, _signal: Signal) {}
