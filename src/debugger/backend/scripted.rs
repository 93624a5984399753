//! In-memory backend driven by a script of actions instead of a live debuggee.
//!
//! Locations behave like backend locations do: a disabled location never stops, a location
//! with a non-zero ignore count counts the hit, decrements the ignore count and does not stop.

use crate::debugger::backend::{
    BackendError, EventSource, LocationResolver, NativeBreakpoint, NativeLocation, NativeRequest,
    ProcessControl, ProcessState, RawEvent, ResolveError, StopReason, Tracee, TraceeId,
    WatchAccess,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutation received by a scripted location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    SetEnabled(bool),
    SetCondition(String),
    SetIgnoreCount(u32),
    Delete,
}

#[derive(Debug)]
struct LocationData {
    enabled: bool,
    condition: String,
    ignore_count: u32,
    hits: u32,
    deleted: bool,
    calls: Vec<BackendCall>,
}

/// Scripted breakpoint location or watchpoint.
#[derive(Debug)]
pub struct ScriptedLocation {
    id: u32,
    address: Option<u64>,
    access: Option<WatchAccess>,
    data: Mutex<LocationData>,
}

impl ScriptedLocation {
    pub fn new(id: u32, address: Option<u64>) -> Self {
        Self {
            id,
            address,
            access: None,
            data: Mutex::new(LocationData {
                enabled: true,
                condition: String::new(),
                ignore_count: 0,
                hits: 0,
                deleted: false,
                calls: vec![],
            }),
        }
    }

    fn watch(id: u32, address: u64, access: WatchAccess) -> Self {
        Self {
            access: Some(access),
            ..Self::new(id, Some(address))
        }
    }

    /// Simulate the debuggee reaching this location. Return true if the debuggee must stop.
    pub fn trigger(&self) -> bool {
        let mut data = lock(&self.data);
        if data.deleted || !data.enabled {
            return false;
        }
        data.hits += 1;
        if data.ignore_count > 0 {
            data.ignore_count -= 1;
            return false;
        }
        true
    }

    /// Count a hit without any stop logic.
    pub fn record_hit(&self) {
        lock(&self.data).hits += 1;
    }

    pub fn set_hits(&self, hits: u32) {
        lock(&self.data).hits = hits;
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.data).enabled
    }

    pub fn is_deleted(&self) -> bool {
        lock(&self.data).deleted
    }

    pub fn ignore_count(&self) -> u32 {
        lock(&self.data).ignore_count
    }

    pub fn condition(&self) -> String {
        lock(&self.data).condition.clone()
    }

    /// Access type for watchpoints, `None` for breakpoint locations.
    pub fn access(&self) -> Option<WatchAccess> {
        self.access
    }

    /// Return and forget mutations received so far.
    pub fn take_calls(&self) -> Vec<BackendCall> {
        std::mem::take(&mut lock(&self.data).calls)
    }
}

impl NativeLocation for ScriptedLocation {
    fn id(&self) -> u32 {
        self.id
    }

    fn address(&self) -> Option<u64> {
        self.address
    }

    fn set_enabled(&self, enabled: bool) {
        let mut data = lock(&self.data);
        data.enabled = enabled;
        data.calls.push(BackendCall::SetEnabled(enabled));
    }

    fn set_condition(&self, condition: &str) {
        let mut data = lock(&self.data);
        data.condition = condition.to_string();
        data.calls.push(BackendCall::SetCondition(condition.to_string()));
    }

    fn set_ignore_count(&self, count: u32) {
        let mut data = lock(&self.data);
        data.ignore_count = count;
        data.calls.push(BackendCall::SetIgnoreCount(count));
    }

    fn hit_count(&self) -> u32 {
        lock(&self.data).hits
    }

    fn delete(&self) {
        let mut data = lock(&self.data);
        data.deleted = true;
        data.calls.push(BackendCall::Delete);
    }
}

/// Scripted breakpoint, a group of locations.
#[derive(Debug)]
pub struct ScriptedBreakpoint {
    id: u32,
    state: Mutex<BreakpointData>,
}

#[derive(Debug)]
struct BreakpointData {
    locations: Vec<Arc<ScriptedLocation>>,
    next_location_id: u32,
    deleted: bool,
}

impl ScriptedBreakpoint {
    fn new(id: u32, addresses: &[Option<u64>]) -> Self {
        let bp = Self {
            id,
            state: Mutex::new(BreakpointData {
                locations: vec![],
                next_location_id: 1,
                deleted: false,
            }),
        };
        for address in addresses {
            bp.add_location(*address);
        }
        bp
    }

    fn add_location(&self, address: Option<u64>) -> u32 {
        let mut state = lock(&self.state);
        let id = state.next_location_id;
        state.next_location_id += 1;
        state
            .locations
            .push(Arc::new(ScriptedLocation::new(id, address)));
        id
    }

    fn remove_location(&self, location_id: u32) -> bool {
        let mut state = lock(&self.state);
        let before = state.locations.len();
        state.locations.retain(|l| l.id != location_id);
        before != state.locations.len()
    }

    pub fn location(&self, location_id: u32) -> Option<Arc<ScriptedLocation>> {
        lock(&self.state)
            .locations
            .iter()
            .find(|l| l.id == location_id)
            .cloned()
    }

    pub fn is_deleted(&self) -> bool {
        lock(&self.state).deleted
    }
}

impl NativeBreakpoint for ScriptedBreakpoint {
    fn id(&self) -> u32 {
        self.id
    }

    fn location_count(&self) -> u32 {
        lock(&self.state).locations.len() as u32
    }

    fn location_at(&self, idx: u32) -> Option<Arc<dyn NativeLocation>> {
        lock(&self.state)
            .locations
            .get(idx as usize)
            .map(|l| l.clone() as Arc<dyn NativeLocation>)
    }

    fn delete(&self) {
        let mut state = lock(&self.state);
        state.deleted = true;
        for location in &state.locations {
            location.delete();
        }
    }
}

enum ScriptedEvent {
    Raw(RawEvent),
    /// Stop with the thread snapshot to expose while handling it.
    Stop(Vec<Tracee>),
    Failure(String),
}

#[derive(Default)]
struct ScriptState {
    sites: Vec<(NativeRequest, Result<Vec<Option<u64>>, ResolveError>)>,
    breakpoints: BTreeMap<u32, Arc<ScriptedBreakpoint>>,
    watchpoints: BTreeMap<u32, Arc<ScriptedLocation>>,
    watch_failures: HashMap<u64, String>,
    last_breakpoint_id: u32,
    last_watchpoint_id: u32,
    tracees: Vec<Tracee>,
    selected: Option<TraceeId>,
    silent_signals: HashSet<i32>,
    continued: usize,
}

/// Backend implementation for tests and scenario replay.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
    events: Mutex<VecDeque<ScriptedEvent>>,
    events_cv: Condvar,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locations created for a request. Requests without definition produce breakpoints
    /// without locations.
    pub fn define_locations(&self, request: NativeRequest, addresses: &[Option<u64>]) {
        let mut state = lock(&self.state);
        state.sites.retain(|(r, _)| r != &request);
        state.sites.push((request, Ok(addresses.to_vec())));
    }

    pub fn fail_request(&self, request: NativeRequest, error: ResolveError) {
        let mut state = lock(&self.state);
        state.sites.retain(|(r, _)| r != &request);
        state.sites.push((request, Err(error)));
    }

    pub fn fail_watchpoint(&self, address: u64, message: &str) {
        lock(&self.state)
            .watch_failures
            .insert(address, message.to_string());
    }

    pub fn breakpoint(&self, id: u32) -> Option<Arc<ScriptedBreakpoint>> {
        lock(&self.state).breakpoints.get(&id).cloned()
    }

    pub fn location(&self, breakpoint_id: u32, location_id: u32) -> Option<Arc<ScriptedLocation>> {
        self.breakpoint(breakpoint_id)?.location(location_id)
    }

    pub fn watchpoint(&self, id: u32) -> Option<Arc<ScriptedLocation>> {
        lock(&self.state).watchpoints.get(&id).cloned()
    }

    /// Number of breakpoints created so far.
    pub fn created_breakpoints(&self) -> usize {
        lock(&self.state).breakpoints.len()
    }

    /// Add a location to an existing breakpoint (e.g. a new module was loaded).
    pub fn add_location(&self, breakpoint_id: u32, address: Option<u64>) -> Option<u32> {
        Some(self.breakpoint(breakpoint_id)?.add_location(address))
    }

    /// Remove a location of an existing breakpoint (e.g. a module was unloaded).
    pub fn remove_location(&self, breakpoint_id: u32, location_id: u32) -> bool {
        self.breakpoint(breakpoint_id)
            .map(|bp| bp.remove_location(location_id))
            .unwrap_or_default()
    }

    /// Set threads exposed outside of scripted stops.
    pub fn set_tracees(&self, tracees: Vec<Tracee>) {
        lock(&self.state).tracees = tracees;
    }

    /// Mark signal as one that should not stop the debuggee.
    pub fn silence_signal(&self, signo: i32) {
        lock(&self.state).silent_signals.insert(signo);
    }

    /// Number of continue requests.
    pub fn continue_count(&self) -> usize {
        lock(&self.state).continued
    }

    fn push(&self, event: ScriptedEvent) {
        lock(&self.events).push_back(event);
        self.events_cv.notify_all();
    }

    pub fn push_event(&self, event: RawEvent) {
        self.push(ScriptedEvent::Raw(event));
    }

    /// Queue a stop, tracees become visible when the stop is received.
    pub fn push_stop(&self, tracees: Vec<Tracee>) {
        self.push(ScriptedEvent::Stop(tracees));
    }

    /// Queue an event channel failure.
    pub fn push_failure(&self, message: &str) {
        self.push(ScriptedEvent::Failure(message.to_string()));
    }

    /// Simulate a thread reaching a breakpoint location. Return true if a stop was queued.
    pub fn hit(&self, breakpoint_id: u32, location_id: u32, tracee: u64) -> bool {
        let Some(location) = self.location(breakpoint_id, location_id) else {
            return false;
        };
        let stop = location.trigger();
        if stop {
            self.push_stop(vec![Tracee::new(
                tracee,
                StopReason::Breakpoint,
                vec![breakpoint_id as u64, location_id as u64],
            )]);
        }
        stop
    }

    /// Simulate a thread writing watched memory. Return true if a stop was queued.
    pub fn hit_watchpoint(&self, watchpoint_id: u32, tracee: u64) -> bool {
        let Some(watchpoint) = self.watchpoint(watchpoint_id) else {
            return false;
        };
        let stop = watchpoint.trigger();
        if stop {
            self.push_stop(vec![Tracee::new(
                tracee,
                StopReason::Watchpoint,
                vec![watchpoint_id as u64],
            )]);
        }
        stop
    }

    /// Queue a breakpoint-changed notification.
    pub fn breakpoint_changed(&self, breakpoint_id: u32) {
        self.push_event(RawEvent::BreakpointChanged { breakpoint_id });
    }

    pub fn exit(&self) {
        self.push_event(RawEvent::StateChanged {
            state: ProcessState::Exited,
            restarted: false,
        });
    }

    pub fn detach(&self) {
        self.push_event(RawEvent::StateChanged {
            state: ProcessState::Detached,
            restarted: false,
        });
    }

    /// Number of queued and not yet received events.
    pub fn pending_events(&self) -> usize {
        lock(&self.events).len()
    }
}

impl LocationResolver for ScriptedBackend {
    fn create_breakpoint(
        &self,
        request: &NativeRequest,
    ) -> Result<Arc<dyn NativeBreakpoint>, ResolveError> {
        let mut state = lock(&self.state);
        let addresses = match state.sites.iter().find(|(r, _)| r == request) {
            Some((_, Ok(addresses))) => addresses.clone(),
            Some((_, Err(e))) => return Err(e.clone()),
            None => vec![],
        };

        state.last_breakpoint_id += 1;
        let id = state.last_breakpoint_id;
        let bp = Arc::new(ScriptedBreakpoint::new(id, &addresses));
        state.breakpoints.insert(id, bp.clone());
        Ok(bp as Arc<dyn NativeBreakpoint>)
    }

    fn create_watchpoint(
        &self,
        address: u64,
        _size: u32,
        access: WatchAccess,
    ) -> Result<Arc<dyn NativeLocation>, ResolveError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.watch_failures.get(&address) {
            return Err(ResolveError::Backend(message.clone()));
        }

        // one backend watchpoint per address
        let existing = state
            .watchpoints
            .values()
            .find(|wp| wp.address == Some(address) && !wp.is_deleted())
            .cloned();
        if let Some(wp) = existing {
            return Ok(wp as Arc<dyn NativeLocation>);
        }

        state.last_watchpoint_id += 1;
        let id = state.last_watchpoint_id;
        let wp = Arc::new(ScriptedLocation::watch(id, address, access));
        state.watchpoints.insert(id, wp.clone());
        Ok(wp as Arc<dyn NativeLocation>)
    }
}

impl ProcessControl for ScriptedBackend {
    fn tracees(&self) -> Vec<Tracee> {
        lock(&self.state).tracees.clone()
    }

    fn selected_tracee(&self) -> Option<TraceeId> {
        lock(&self.state).selected
    }

    fn select_tracee(&self, id: TraceeId) {
        lock(&self.state).selected = Some(id);
    }

    fn signal_should_stop(&self, signo: i32) -> bool {
        !lock(&self.state).silent_signals.contains(&signo)
    }

    fn continue_process(&self) {
        lock(&self.state).continued += 1;
    }
}

impl EventSource for ScriptedBackend {
    fn wait_for_event(&self, timeout: Duration) -> Result<Option<RawEvent>, BackendError> {
        let events = lock(&self.events);
        let (mut events, _) = self
            .events_cv
            .wait_timeout_while(events, timeout, |events| events.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let Some(event) = events.pop_front() else {
            return Ok(None);
        };
        drop(events);

        match event {
            ScriptedEvent::Raw(event) => Ok(Some(event)),
            ScriptedEvent::Stop(tracees) => {
                lock(&self.state).tracees = tracees;
                Ok(Some(RawEvent::StateChanged {
                    state: ProcessState::Stopped,
                    restarted: false,
                }))
            }
            ScriptedEvent::Failure(message) => Err(BackendError(message)),
        }
    }
}
