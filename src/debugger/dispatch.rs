//! Translation of backend stop notifications into debug events.
//!
//! On every stop all threads are inspected and exactly one of them is chosen as the reporting
//! thread, by class in decreasing priority: finished step, breakpoint, watchpoint, signal,
//! exec, anything else. Inside a class the thread with the lowest id wins, so the result does not
//! depend on thread enumeration order.

use crate::debugger::backend::{ProcessControl, ProcessState, StopReason, Tracee, TraceeId};
use crate::debugger::event::{DebugEvent, EventSink, ExitReason};
use crate::debugger::location::BoundLocation;
use crate::debugger::registry::Breakpoints;
use log::{debug, error, info};
use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// User intentions about the debuggee, used to tell a requested exit from a spontaneous one.
#[derive(Default, Debug)]
pub struct ProgramState {
    termination_requested: AtomicBool,
    detach_requested: AtomicBool,
    exec_seen: AtomicBool,
}

impl ProgramState {
    pub fn request_terminate(&self) {
        self.termination_requested.store(true, Ordering::SeqCst)
    }

    pub fn request_detach(&self) {
        self.detach_requested.store(true, Ordering::SeqCst)
    }

    pub fn termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::SeqCst)
    }

    pub fn detach_requested(&self) -> bool {
        self.detach_requested.load(Ordering::SeqCst)
    }

    /// Return true for the first exec stop of the session.
    fn first_exec(&self) -> bool {
        !self.exec_seen.swap(true, Ordering::SeqCst)
    }
}

/// Reporting thread chosen for a stop.
#[derive(Debug, PartialEq)]
pub(crate) enum Selection<'a> {
    Step(&'a Tracee),
    Breakpoint(&'a Tracee),
    Watchpoint(&'a Tracee),
    Signal { tracee: &'a Tracee, signo: i32 },
    /// Threads stopped by signals, but none of the signals should stop the debuggee.
    IgnoredSignal,
    Exec(&'a Tracee),
    /// No thread with a known stop reason.
    Fallback,
}

fn signal_number(tracee: &Tracee) -> Option<i32> {
    tracee
        .stop_data
        .first()
        .and_then(|signo| i32::try_from(*signo).ok())
}

/// Choose reporting thread for a stop.
pub(crate) fn select(tracees: &[Tracee], should_stop: impl Fn(i32) -> bool) -> Selection<'_> {
    let lowest = |reason: StopReason| {
        tracees
            .iter()
            .filter(|t| t.stop_reason == reason)
            .min_by_key(|t| t.id)
    };

    if let Some(tracee) = lowest(StopReason::PlanComplete) {
        return Selection::Step(tracee);
    }
    if let Some(tracee) = lowest(StopReason::Breakpoint) {
        return Selection::Breakpoint(tracee);
    }
    if let Some(tracee) = lowest(StopReason::Watchpoint) {
        return Selection::Watchpoint(tracee);
    }

    let mut signaled: Vec<&Tracee> = tracees
        .iter()
        .filter(|t| t.stop_reason == StopReason::Signal)
        .collect();
    if !signaled.is_empty() {
        signaled.sort_by_key(|t| t.id);
        return signaled
            .into_iter()
            .find_map(|tracee| {
                let signo = signal_number(tracee)?;
                should_stop(signo).then_some(Selection::Signal { tracee, signo })
            })
            .unwrap_or(Selection::IgnoredSignal);
    }

    if let Some(tracee) = lowest(StopReason::Exec) {
        return Selection::Exec(tracee);
    }
    Selection::Fallback
}

/// Human readable signal description.
fn signal_description(signal: Signal) -> &'static str {
    match signal {
        Signal::SIGSEGV => "Segmentation fault",
        Signal::SIGABRT => "Aborted",
        Signal::SIGFPE => "Floating point exception",
        Signal::SIGILL => "Illegal instruction",
        Signal::SIGBUS => "Bus error",
        Signal::SIGTRAP => "Trace/breakpoint trap",
        Signal::SIGINT => "Interrupt",
        Signal::SIGTERM => "Terminated",
        Signal::SIGKILL => "Killed",
        Signal::SIGPIPE => "Broken pipe",
        Signal::SIGHUP => "Hangup",
        Signal::SIGQUIT => "Quit",
        Signal::SIGALRM => "Alarm clock",
        Signal::SIGCHLD => "Child status changed",
        Signal::SIGUSR1 => "User defined signal 1",
        Signal::SIGUSR2 => "User defined signal 2",
        _ => "Signal received",
    }
}

/// Event for a stop caused by a signal that should stop the debuggee.
pub(crate) fn signal_event(signo: i32) -> DebugEvent {
    match Signal::try_from(signo) {
        Ok(Signal::SIGSTOP) => DebugEvent::Break,
        Ok(signal) => DebugEvent::Exception {
            signal: signal.as_str().to_string(),
            code: signo,
            description: signal_description(signal).to_string(),
        },
        Err(_) => DebugEvent::Exception {
            signal: format!("SIG{signo}"),
            code: signo,
            description: "Signal received".to_string(),
        },
    }
}

/// Turns process state changes into debug events, at most one event per notification.
pub struct StopEventDispatcher {
    process: Arc<dyn ProcessControl>,
    breakpoints: Breakpoints,
    sink: Arc<dyn EventSink>,
    state: Arc<ProgramState>,
    /// Report the first exec stop instead of skipping it (a launcher exec-ing the real program).
    break_on_first_exec: bool,
}

/// Count a hit on a location. Location deleted after the lookup is dropped from the stop.
fn register_hit(location: Arc<BoundLocation>) -> Option<Arc<BoundLocation>> {
    match location.on_hit() {
        Ok(()) => Some(location),
        Err(e) => {
            debug!(target: "dispatch", "skip location {}: {e}", location.id());
            None
        }
    }
}

impl StopEventDispatcher {
    pub fn new(
        process: Arc<dyn ProcessControl>,
        breakpoints: Breakpoints,
        sink: Arc<dyn EventSink>,
        state: Arc<ProgramState>,
        break_on_first_exec: bool,
    ) -> Self {
        Self {
            process,
            breakpoints,
            sink,
            state,
            break_on_first_exec,
        }
    }

    /// Handle a state-changed notification.
    pub fn on_state_changed(&self, state: ProcessState, restarted: bool) {
        if restarted {
            debug!(target: "dispatch", "process {state} and restarted, nothing to report");
            return;
        }

        match state {
            ProcessState::Stopped => self.on_stop(),
            ProcessState::Exited => {
                let reason = if self.state.termination_requested() {
                    ExitReason::DebuggerTerminated
                } else {
                    ExitReason::ProcessExited
                };
                self.emit(DebugEvent::ProgramDestroy { reason }, None);
            }
            ProcessState::Detached => {
                let reason = if self.state.detach_requested() {
                    ExitReason::DebuggerDetached
                } else {
                    ExitReason::ProcessDetached
                };
                self.emit(DebugEvent::ProgramDestroy { reason }, None);
            }
            ProcessState::Running => {
                debug!(target: "dispatch", "process running");
            }
        }
    }

    fn on_stop(&self) {
        let tracees = self.process.tracees();
        let selection = select(&tracees, |signo| self.process.signal_should_stop(signo));
        debug!(
            target: "dispatch",
            "stop with {} thread(s), selection: {selection:?}",
            tracees.len()
        );

        let (tracee, event) = match selection {
            Selection::Step(tracee) => (tracee.id, DebugEvent::StepComplete),
            Selection::Breakpoint(tracee) => (tracee.id, self.breakpoint_event(tracee)),
            Selection::Watchpoint(tracee) => (tracee.id, self.watchpoint_event(tracee)),
            Selection::Signal { tracee, signo } => (tracee.id, signal_event(signo)),
            Selection::IgnoredSignal => {
                debug!(
                    target: "dispatch",
                    "signals should not stop the debuggee, nothing to report"
                );
                return;
            }
            Selection::Exec(tracee) if !self.break_on_first_exec && self.state.first_exec() => {
                info!(target: "dispatch", "skip first exec stop in thread {}, continue", tracee.id);
                self.process.continue_process();
                return;
            }
            Selection::Exec(tracee) => (tracee.id, DebugEvent::Break),
            Selection::Fallback => {
                let Some(tracee) = self
                    .process
                    .selected_tracee()
                    .or_else(|| tracees.first().map(|t| t.id))
                else {
                    error!(target: "dispatch", "stop without live threads");
                    return;
                };
                (tracee, DebugEvent::Break)
            }
        };

        self.process.select_tracee(tracee);
        self.emit(event, Some(tracee));
    }

    /// Resolve (breakpoint id, location id) pairs of a breakpoint stop.
    fn breakpoint_event(&self, tracee: &Tracee) -> DebugEvent {
        let mut locations: Vec<Arc<BoundLocation>> = vec![];
        for pair in tracee.stop_data.chunks_exact(2) {
            let (Ok(bp_id), Ok(loc_id)) = (u32::try_from(pair[0]), u32::try_from(pair[1])) else {
                continue;
            };
            match self.breakpoints.find_bound_location(bp_id, loc_id) {
                Some(location) => locations.extend(register_hit(location)),
                None => {
                    debug!(
                        target: "dispatch",
                        "skip unknown location {bp_id}.{loc_id} in thread {}",
                        tracee.id
                    )
                }
            }
        }

        if locations.is_empty() {
            DebugEvent::Break
        } else {
            DebugEvent::Breakpoint { locations }
        }
    }

    fn watchpoint_event(&self, tracee: &Tracee) -> DebugEvent {
        let location = tracee
            .stop_data
            .first()
            .and_then(|id| u32::try_from(*id).ok())
            .and_then(|id| self.breakpoints.find_watchpoint_location(id))
            .and_then(register_hit);
        match location {
            Some(location) => DebugEvent::Breakpoint {
                locations: vec![location],
            },
            None => {
                debug!(target: "dispatch", "skip unknown watchpoint in thread {}", tracee.id);
                DebugEvent::Break
            }
        }
    }

    fn emit(&self, event: DebugEvent, tracee: Option<TraceeId>) {
        debug!(target: "dispatch", "emit {event}");
        self.sink.emit(event, tracee);
    }
}
