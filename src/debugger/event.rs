use crate::debugger::backend::TraceeId;
use crate::debugger::breakpoint::BreakpointError;
use crate::debugger::location::BoundLocation;
use crate::debugger::registry::BreakpointId;
use itertools::Itertools;
use log::warn;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

/// Why the debug session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Process killed on user request.
    DebuggerTerminated,
    /// Process exited by itself.
    ProcessExited,
    /// Detached on user request.
    DebuggerDetached,
    /// Detached by the backend.
    ProcessDetached,
    /// Event loop failed.
    Error(String),
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::DebuggerTerminated => f.write_str("debugger terminated"),
            ExitReason::ProcessExited => f.write_str("process exited"),
            ExitReason::DebuggerDetached => f.write_str("debugger detached"),
            ExitReason::ProcessDetached => f.write_str("process detached"),
            ExitReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Event delivered to the user interface.
#[derive(Clone, Debug)]
pub enum DebugEvent {
    /// Plain stop without a specific reason.
    Break,
    /// Step finished.
    StepComplete,
    /// Stop at one or more breakpoint or watchpoint locations.
    Breakpoint { locations: Vec<Arc<BoundLocation>> },
    /// Stop caused by a signal.
    Exception {
        signal: String,
        code: i32,
        description: String,
    },
    ProgramDestroy { reason: ExitReason },
    /// Breakpoint got new locations.
    BreakpointBound {
        breakpoint: BreakpointId,
        locations: Vec<Arc<BoundLocation>>,
    },
    BreakpointError(BreakpointError),
}

impl Display for DebugEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn location_list(locations: &[Arc<BoundLocation>]) -> String {
            locations
                .iter()
                .map(|l| format!("{}:{}", l.owner(), l.id()))
                .join(", ")
        }

        match self {
            DebugEvent::Break => f.write_str("break"),
            DebugEvent::StepComplete => f.write_str("step complete"),
            DebugEvent::Breakpoint { locations } => {
                write!(f, "breakpoint hit [{}]", location_list(locations))
            }
            DebugEvent::Exception {
                signal,
                code,
                description,
            } => write!(f, "exception {signal} ({code}): {description}"),
            DebugEvent::ProgramDestroy { reason } => write!(f, "program destroyed: {reason}"),
            DebugEvent::BreakpointBound {
                breakpoint,
                locations,
            } => write!(
                f,
                "breakpoint {breakpoint} bound [{}]",
                location_list(locations)
            ),
            DebugEvent::BreakpointError(err) => {
                write!(f, "breakpoint {} error ({}): {}", err.breakpoint, err.kind, err.message)
            }
        }
    }
}

/// Event with the thread it is addressed to.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub event: DebugEvent,
    pub tracee: Option<TraceeId>,
}

/// Delivery channel of debug events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DebugEvent, tracee: Option<TraceeId>);
}

/// Sink backed by a bounded channel with a single consumer.
/// Producer blocks while the channel is full.
pub struct ChannelSink {
    tx: SyncSender<EventEnvelope>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DebugEvent, tracee: Option<TraceeId>) {
        if let Err(e) = self.tx.send(EventEnvelope { event, tracee }) {
            warn!(target: "dispatch", "event consumer gone, drop event: {}", e.0.event);
        }
    }
}
