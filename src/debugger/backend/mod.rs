//! Interface of the debugging backend the engine is built on.
//!
//! The engine never talks to a debuggee directly. Breakpoint creation, per-location mutators,
//! thread inspection and the raw event stream are all provided by an implementation of the
//! traits below (a remote debugger connection in production, [`scripted::ScriptedBackend`]
//! in tests and in the replay tool).

pub mod scripted;

use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Backend thread identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceeId(pub u64);

impl Display for TraceeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a thread is stopped, as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Invalid,
    None,
    Trace,
    Breakpoint,
    Watchpoint,
    Signal,
    Exception,
    Exec,
    PlanComplete,
    Exiting,
    Instrumentation,
}

/// Snapshot of one debuggee thread at a stop.
#[derive(Clone, Debug, PartialEq)]
pub struct Tracee {
    pub id: TraceeId,
    pub stop_reason: StopReason,
    /// Stop reason payload. For breakpoints: pairs of (breakpoint id, location id),
    /// for watchpoints: the watchpoint id, for signals: the signal number.
    pub stop_data: Vec<u64>,
}

impl Tracee {
    pub fn new(id: u64, stop_reason: StopReason, stop_data: Vec<u64>) -> Self {
        Self {
            id: TraceeId(id),
            stop_reason,
            stop_data,
        }
    }
}

/// Process state carried by a state-changed event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessState {
    Running,
    Stopped,
    Exited,
    Detached,
}

/// Undecoded backend event.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEvent {
    StateChanged {
        state: ProcessState,
        /// Process was stopped and immediately restarted by the backend, nothing to report.
        restarted: bool,
    },
    Interrupt,
    StructuredData(String),
    /// Locations of a backend breakpoint changed (e.g. a module was loaded).
    BreakpointChanged { breakpoint_id: u32 },
}

/// Location request in the form understood by the backend.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeRequest {
    FileLine { file: PathBuf, line: u32 },
    Function { name: String },
    FunctionOffset { name: String, offset: u32 },
    Address(u64),
}

/// Memory access that triggers a watchpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchAccess {
    pub read: bool,
    pub write: bool,
}

impl WatchAccess {
    pub const WRITE: WatchAccess = WatchAccess {
        read: false,
        write: true,
    };
}

/// Failure of the backend to create a breakpoint or watchpoint.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("function not found")]
    NoFunctionFound,
    #[error("function has no location")]
    NoFunctionLocation,
    #[error("position not available")]
    PositionNotAvailable,
    #[error("backend refused to create breakpoint")]
    CreationFailed,
    #[error("{0}")]
    Backend(String),
}

/// Failure of the backend event channel.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("backend: {0}")]
pub struct BackendError(pub String);

/// One concrete backend-resident breakpoint location or watchpoint.
pub trait NativeLocation: Send + Sync {
    /// Backend-assigned id.
    fn id(&self) -> u32;

    /// Load address, `None` if the backend could not compute one.
    fn address(&self) -> Option<u64>;

    fn set_enabled(&self, enabled: bool);

    fn set_condition(&self, condition: &str);

    /// Number of next hits the backend skips without stopping.
    fn set_ignore_count(&self, count: u32);

    /// Total hits counted by the backend since creation.
    fn hit_count(&self) -> u32;

    /// Remove the location from the backend.
    fn delete(&self);
}

/// Backend breakpoint object, a group of locations created from one request.
pub trait NativeBreakpoint: Send + Sync {
    fn id(&self) -> u32;

    fn location_count(&self) -> u32;

    fn location_at(&self, idx: u32) -> Option<Arc<dyn NativeLocation>>;

    /// Remove the breakpoint and all its locations from the backend.
    fn delete(&self);
}

/// Creates backend breakpoints and watchpoints.
pub trait LocationResolver: Send + Sync {
    fn create_breakpoint(
        &self,
        request: &NativeRequest,
    ) -> Result<Arc<dyn NativeBreakpoint>, ResolveError>;

    fn create_watchpoint(
        &self,
        address: u64,
        size: u32,
        access: WatchAccess,
    ) -> Result<Arc<dyn NativeLocation>, ResolveError>;
}

/// Thread and process control used by stop dispatching.
pub trait ProcessControl: Send + Sync {
    /// All live threads with their stop reasons.
    fn tracees(&self) -> Vec<Tracee>;

    fn selected_tracee(&self) -> Option<TraceeId>;

    fn select_tracee(&self, id: TraceeId);

    /// Return true if the signal default disposition is to stop the debuggee.
    fn signal_should_stop(&self, signo: i32) -> bool;

    fn continue_process(&self);
}

/// Source of raw backend events.
pub trait EventSource: Send + Sync {
    /// Wait for the next event, `Ok(None)` if nothing arrived during `timeout`.
    fn wait_for_event(&self, timeout: Duration) -> Result<Option<RawEvent>, BackendError>;
}
