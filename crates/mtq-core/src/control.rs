//! Run control for pause/resume/cancel: global run state plus per-task abort tokens.
//!
//! Workers read the run state before each lease and register an abort token
//! for every task they execute. `cancel()` trips every registered token; the
//! execution watchdog sees the token at its next checkpoint and drops the
//! transfer. Pause only gates new leases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::task::TaskKey;

/// Process-wide run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    Cancelled,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Cancel,
}

impl ControlCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("cannot {command} while {from}")]
    InvalidTransition {
        from: RunState,
        command: ControlCommand,
    },
    #[error("unknown control command: {0:?}")]
    UnknownCommand(String),
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(ControlCommand::Pause),
            "resume" => Ok(ControlCommand::Resume),
            "cancel" => Ok(ControlCommand::Cancel),
            _ => Err(ControlError::UnknownCommand(s.to_string())),
        }
    }
}

/// Error returned when a transfer is stopped by the operator (cancel).
#[derive(Debug)]
pub struct TaskAborted;

impl fmt::Display for TaskAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task aborted by operator")
    }
}

impl std::error::Error for TaskAborted {}

struct Inner {
    state: RunState,
    tokens: HashMap<TaskKey, Arc<AtomicBool>>,
}

/// Shared run state and registry of task key -> abort token.
///
/// State and tokens sit behind one lock, so a task registered after `cancel()`
/// always receives an already-tripped token.
pub struct ControlPlane {
    inner: RwLock<Inner>,
    tx: watch::Sender<RunState>,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Running);
        Self {
            inner: RwLock::new(Inner {
                state: RunState::Running,
                tokens: HashMap::new(),
            }),
            tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, inner: &mut Inner, state: RunState) {
        inner.state = state;
        self.tx.send_replace(state);
    }

    pub fn state(&self) -> RunState {
        self.read().state
    }

    /// Watch run-state changes (idle workers wait on this).
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// RUNNING -> PAUSED. Pausing twice is a no-op.
    pub fn pause(&self) -> Result<RunState, ControlError> {
        let mut inner = self.write();
        match inner.state {
            RunState::Running | RunState::Paused => {
                self.set(&mut inner, RunState::Paused);
                tracing::info!("run paused");
                Ok(RunState::Paused)
            }
            from => Err(ControlError::InvalidTransition {
                from,
                command: ControlCommand::Pause,
            }),
        }
    }

    /// PAUSED -> RUNNING. Resuming a running engine is a no-op.
    pub fn resume(&self) -> Result<RunState, ControlError> {
        let mut inner = self.write();
        match inner.state {
            RunState::Running | RunState::Paused => {
                self.set(&mut inner, RunState::Running);
                tracing::info!("run resumed");
                Ok(RunState::Running)
            }
            from => Err(ControlError::InvalidTransition {
                from,
                command: ControlCommand::Resume,
            }),
        }
    }

    /// RUNNING|PAUSED -> CANCELLED and trip every registered abort token.
    /// Returns the number of in-flight tasks signalled.
    pub fn cancel(&self) -> usize {
        let mut inner = self.write();
        self.set(&mut inner, RunState::Cancelled);
        for token in inner.tokens.values() {
            token.store(true, Ordering::Relaxed);
        }
        tracing::info!(in_flight = inner.tokens.len(), "run cancelled");
        inner.tokens.len()
    }

    /// Begin a fresh run after a cancellation (CANCELLED -> RUNNING).
    pub fn start_run(&self) {
        let mut inner = self.write();
        if inner.state == RunState::Cancelled {
            self.set(&mut inner, RunState::Running);
            tracing::info!("new run started");
        }
    }

    /// Apply a parsed operator command.
    pub fn apply(&self, command: ControlCommand) -> Result<RunState, ControlError> {
        match command {
            ControlCommand::Pause => self.pause(),
            ControlCommand::Resume => self.resume(),
            ControlCommand::Cancel => {
                self.cancel();
                Ok(RunState::Cancelled)
            }
        }
    }

    /// Register a running task; returns the abort token to watch.
    /// The token is already set if the run is cancelled.
    pub fn register(&self, key: TaskKey) -> Arc<AtomicBool> {
        let mut inner = self.write();
        let token = Arc::new(AtomicBool::new(inner.state == RunState::Cancelled));
        inner.tokens.insert(key, Arc::clone(&token));
        token
    }

    /// Unregister a task (call when it leaves PROCESSING, whatever the outcome).
    pub fn unregister(&self, key: TaskKey) {
        self.write().tokens.remove(&key);
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mtq")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_resume_cycle() {
        let ctl = ControlPlane::new();
        assert_eq!(ctl.state(), RunState::Running);
        assert_eq!(ctl.pause().unwrap(), RunState::Paused);
        assert_eq!(ctl.pause().unwrap(), RunState::Paused);
        assert_eq!(ctl.resume().unwrap(), RunState::Running);
        assert_eq!(ctl.state(), RunState::Running);
    }

    #[test]
    fn cancelled_rejects_pause_and_resume() {
        let ctl = ControlPlane::new();
        ctl.cancel();
        assert_eq!(
            ctl.pause(),
            Err(ControlError::InvalidTransition {
                from: RunState::Cancelled,
                command: ControlCommand::Pause
            })
        );
        assert!(ctl.resume().is_err());
        ctl.start_run();
        assert_eq!(ctl.state(), RunState::Running);
    }

    #[test]
    fn cancel_trips_registered_tokens() {
        let ctl = ControlPlane::new();
        let a = ctl.register(TaskKey::new(1, 1));
        let b = ctl.register(TaskKey::new(1, 2));
        ctl.unregister(TaskKey::new(1, 2));
        assert_eq!(ctl.cancel(), 1);
        assert!(a.load(Ordering::Relaxed));
        assert!(!b.load(Ordering::Relaxed));
    }

    #[test]
    fn register_after_cancel_is_pre_tripped() {
        let ctl = ControlPlane::new();
        ctl.pause().unwrap();
        ctl.cancel();
        let token = ctl.register(TaskKey::new(1, 1));
        assert!(token.load(Ordering::Relaxed));
    }

    #[test]
    fn pause_does_not_trip_tokens() {
        let ctl = ControlPlane::new();
        let token = ctl.register(TaskKey::new(1, 1));
        ctl.pause().unwrap();
        assert!(!token.load(Ordering::Relaxed));
    }

    #[test]
    fn subscribers_see_state_changes() {
        let ctl = ControlPlane::new();
        let rx = ctl.subscribe();
        ctl.pause().unwrap();
        assert_eq!(*rx.borrow(), RunState::Paused);
        ctl.apply(ControlCommand::Cancel).unwrap();
        assert_eq!(*rx.borrow(), RunState::Cancelled);
    }

    #[test]
    fn command_parsing() {
        assert_eq!("pause".parse::<ControlCommand>().unwrap(), ControlCommand::Pause);
        assert_eq!(" Resume\n".parse::<ControlCommand>().unwrap(), ControlCommand::Resume);
        assert_eq!("CANCEL".parse::<ControlCommand>().unwrap(), ControlCommand::Cancel);
        assert!(matches!(
            "stop".parse::<ControlCommand>(),
            Err(ControlError::UnknownCommand(_))
        ));
    }
}
