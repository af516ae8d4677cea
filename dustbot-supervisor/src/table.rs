//! src/table.rs
//!
//! The supervisor's child table: one entry per configured worker name,
//! never more than one live child per name. Stop is SIGTERM, a 3 s grace
//! window, then SIGKILL.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use dustbot_common::error::{Error, Result};

pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Builds the spawn command for a worker name; `None` when the worker's
/// executable cannot be resolved.
pub type Launcher = Box<dyn Fn(&str) -> Option<Command> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Exited,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Running => "running",
            WorkerState::Exited => "exited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(u32),
    AlreadyRunning(u32),
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: String,
    pub state: WorkerState,
    pub pid: Option<u32>,
}

struct WorkerEntry {
    state: WorkerState,
    child: Option<Child>,
    pid: Option<u32>,
}

impl WorkerEntry {
    fn new() -> Self {
        Self {
            state: WorkerState::Stopped,
            child: None,
            pid: None,
        }
    }
}

pub struct WorkerTable {
    order: Vec<String>,
    entries: HashMap<String, WorkerEntry>,
    launcher: Launcher,
}

impl WorkerTable {
    pub fn new(names: &[String], launcher: Launcher) -> Self {
        let entries = names
            .iter()
            .map(|name| (name.clone(), WorkerEntry::new()))
            .collect();
        Self {
            order: names.to_vec(),
            entries,
            launcher,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Idempotent start: a live child makes this a no-op, verified with a
    /// liveness probe rather than trusting the recorded state.
    pub async fn start(&mut self, name: &str) -> Result<StartOutcome> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Process(format!("worker '{name}' is not configured")))?;

        if let Some(child) = entry.child.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    let pid = entry.pid.unwrap_or_default();
                    info!("worker '{}' already running (pid {})", name, pid);
                    return Ok(StartOutcome::AlreadyRunning(pid));
                }
                Ok(Some(status)) => {
                    warn!("worker '{}' found dead before start: {}", name, status);
                    entry.child = None;
                    entry.pid = None;
                }
                Err(e) => {
                    warn!("worker '{}' liveness probe failed: {:?}", name, e);
                    entry.child = None;
                    entry.pid = None;
                }
            }
        }

        let mut command = (self.launcher)(name)
            .ok_or_else(|| Error::Process(format!("no executable found for worker '{name}'")))?;
        command.kill_on_drop(true);
        let child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Process(format!("worker '{name}' died at spawn")))?;
        entry.state = WorkerState::Running;
        entry.pid = Some(pid);
        entry.child = Some(child);
        info!("worker '{}' started (pid {})", name, pid);
        Ok(StartOutcome::Started(pid))
    }

    /// SIGTERM, 3 s grace, SIGKILL fallback; drops the entry back to
    /// `stopped`. Returns whether there was a child to stop.
    pub async fn stop(&mut self, name: &str) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::Process(format!("worker '{name}' is not configured")))?;

        let Some(mut child) = entry.child.take() else {
            entry.state = WorkerState::Stopped;
            entry.pid = None;
            return Ok(false);
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // termination signal first; kill only after the grace period
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!("worker '{}' exited: {}", name, status);
            }
            Ok(Err(e)) => {
                warn!("worker '{}' wait failed: {:?}", name, e);
            }
            Err(_) => {
                warn!(
                    "worker '{}' ignored the termination signal, killing it",
                    name
                );
                if let Err(e) = child.kill().await {
                    warn!("worker '{}' kill failed: {:?}", name, e);
                }
            }
        }

        entry.state = WorkerState::Stopped;
        entry.pid = None;
        Ok(true)
    }

    pub async fn restart(&mut self, name: &str) -> Result<StartOutcome> {
        self.stop(name).await?;
        self.start(name).await
    }

    /// `system_logger` first so logging is available before anything else.
    pub async fn start_all(&mut self) -> Vec<(String, Result<StartOutcome>)> {
        let mut names: Vec<String> = self.order.clone();
        names.sort_by_key(|name| name != "system_logger");
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.start(&name).await;
            results.push((name, outcome));
        }
        results
    }

    pub async fn stop_all(&mut self) -> Vec<(String, Result<bool>)> {
        let names = self.order.clone();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.stop(&name).await;
            results.push((name, outcome));
        }
        results
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.order
            .iter()
            .map(|name| {
                let entry = &self.entries[name];
                WorkerStatus {
                    name: name.clone(),
                    state: entry.state,
                    pid: entry.pid,
                }
            })
            .collect()
    }

    /// Pids of children that are live right now; the table invariant is
    /// that this always equals the recorded pids of `running` entries.
    pub fn live_pids(&mut self) -> Vec<u32> {
        let mut pids = Vec::new();
        for entry in self.entries.values_mut() {
            if let Some(child) = entry.child.as_mut() {
                if let Ok(None) = child.try_wait() {
                    if let Some(pid) = child.id() {
                        pids.push(pid);
                    }
                }
            }
        }
        pids.sort_unstable();
        pids
    }

    /// Collects children that died unsupervised since the last sweep.
    pub fn reap(&mut self) -> Vec<(String, std::process::ExitStatus)> {
        let mut dead = Vec::new();
        for (name, entry) in self.entries.iter_mut() {
            if entry.state != WorkerState::Running {
                continue;
            }
            let Some(child) = entry.child.as_mut() else {
                continue;
            };
            if let Ok(Some(status)) = child.try_wait() {
                entry.state = WorkerState::Exited;
                entry.child = None;
                entry.pid = None;
                dead.push((name.clone(), status));
            }
        }
        dead
    }
}
