use crate::debugger::backend::LocationResolver;
use crate::debugger::breakpoint::{
    BindContext, Breakpoint, BreakpointError, BreakpointRequest, BreakpointState, Condition,
    PendingBreakpoint,
};
use crate::debugger::event::{DebugEvent, EventSink};
use crate::debugger::location::{AppliedCache, BoundLocation};
use crate::debugger::pass_count::PassCount;
use crate::debugger::watchpoint::Watchpoint;
use crate::debugger::Error;
use crate::weak_error;
use log::debug;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Stable handle of a breakpoint or a watchpoint, valid for the whole session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(pub usize);

impl Display for BreakpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Maps backend ids to registry handles.
#[derive(Default, Debug)]
pub struct LocationIndex {
    /// Backend breakpoint id to owner.
    breakpoints: HashMap<u32, BreakpointId>,
    /// Backend watchpoint id to owners, in registration order.
    watchpoints: HashMap<u32, Vec<BreakpointId>>,
    /// Last applied values of shared backend watchpoints.
    watchpoint_caches: HashMap<u32, Arc<AppliedCache>>,
}

impl LocationIndex {
    pub(crate) fn register_breakpoint(&mut self, backend_id: u32, owner: BreakpointId) {
        self.breakpoints.insert(backend_id, owner);
    }

    pub(crate) fn unregister_breakpoint(&mut self, backend_id: u32) {
        self.breakpoints.remove(&backend_id);
    }

    /// Add watchpoint owner, return the applied values cache shared by all owners.
    pub(crate) fn register_watchpoint(
        &mut self,
        backend_id: u32,
        owner: BreakpointId,
    ) -> Arc<AppliedCache> {
        self.watchpoints.entry(backend_id).or_default().push(owner);
        self.watchpoint_caches
            .entry(backend_id)
            .or_default()
            .clone()
    }

    /// Remove watchpoint owner, return number of remaining owners.
    pub(crate) fn unregister_watchpoint(&mut self, backend_id: u32, owner: BreakpointId) -> usize {
        let Some(owners) = self.watchpoints.get_mut(&backend_id) else {
            return 0;
        };
        owners.retain(|o| *o != owner);
        let remaining = owners.len();
        if remaining == 0 {
            self.watchpoints.remove(&backend_id);
            self.watchpoint_caches.remove(&backend_id);
        }
        remaining
    }

    pub fn breakpoint(&self, backend_id: u32) -> Option<BreakpointId> {
        self.breakpoints.get(&backend_id).copied()
    }

    /// Oldest live owner of a backend watchpoint.
    pub fn watchpoint(&self, backend_id: u32) -> Option<BreakpointId> {
        self.watchpoints
            .get(&backend_id)
            .and_then(|owners| owners.first())
            .copied()
    }

    pub fn watchpoint_ref_count(&self, backend_id: u32) -> usize {
        self.watchpoints.get(&backend_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty() && self.watchpoints.is_empty()
    }
}

/// Breakpoint of any kind stored in the registry.
pub enum BreakpointKind {
    Location(PendingBreakpoint),
    Data(Watchpoint),
}

impl BreakpointKind {
    fn as_breakpoint(&self) -> &dyn Breakpoint {
        match self {
            BreakpointKind::Location(bp) => bp,
            BreakpointKind::Data(wp) => wp,
        }
    }

    fn as_breakpoint_mut(&mut self) -> &mut dyn Breakpoint {
        match self {
            BreakpointKind::Location(bp) => bp,
            BreakpointKind::Data(wp) => wp,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Breakpoints that are not deleted.
    pub breakpoints: usize,
    /// Watchpoints that are not deleted.
    pub watchpoints: usize,
    /// Locations of all live breakpoints and watchpoints.
    pub bound_locations: usize,
}

/// Session-wide container of breakpoints and watchpoints.
///
/// Deleted entries stay in their slots, so an operation on a deleted breakpoint
/// reports [`Error::Deleted`] instead of touching another object.
pub struct BreakpointRegistry {
    resolver: Arc<dyn LocationResolver>,
    slots: Vec<BreakpointKind>,
    index: LocationIndex,
    /// Events produced by the last operations, delivered after the registry lock is released.
    outbox: Vec<DebugEvent>,
}

impl BreakpointRegistry {
    pub fn new(resolver: Arc<dyn LocationResolver>) -> Self {
        Self {
            resolver,
            slots: vec![],
            index: LocationIndex::default(),
            outbox: vec![],
        }
    }

    /// Create a breakpoint or a watchpoint (for data requests). Created object is unbound.
    pub fn create(&mut self, request: BreakpointRequest) -> BreakpointId {
        let id = BreakpointId(self.slots.len());
        let kind = if request.is_data() {
            BreakpointKind::Data(Watchpoint::new(id, request))
        } else {
            BreakpointKind::Location(PendingBreakpoint::new(id, request))
        };
        self.slots.push(kind);
        id
    }

    pub fn get(&self, id: BreakpointId) -> Result<&BreakpointKind, Error> {
        self.slots.get(id.0).ok_or(Error::UnknownBreakpoint(id))
    }

    fn with_breakpoint<T>(
        &mut self,
        id: BreakpointId,
        f: impl FnOnce(&mut dyn Breakpoint, &mut BindContext<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let Self {
            resolver,
            slots,
            index,
            outbox,
        } = self;
        let slot = slots.get_mut(id.0).ok_or(Error::UnknownBreakpoint(id))?;
        let mut ctx = BindContext {
            resolver: resolver.as_ref(),
            index,
            outbox,
        };
        f(slot.as_breakpoint_mut(), &mut ctx)
    }

    pub fn bind(&mut self, id: BreakpointId) -> Result<(), Error> {
        self.with_breakpoint(id, |bp, ctx| bp.bind(ctx))
    }

    pub fn can_bind(&self, id: BreakpointId) -> Result<(), Error> {
        self.get(id)?.as_breakpoint().can_bind()
    }

    pub fn delete(&mut self, id: BreakpointId) -> Result<(), Error> {
        let shared = match self.get(id)? {
            BreakpointKind::Data(wp) => wp.backend_id(),
            BreakpointKind::Location(_) => None,
        };
        self.with_breakpoint(id, |bp, ctx| bp.delete(ctx))?;

        // backend watchpoint still holds settings of the deleted owner
        let survivor = shared.and_then(|backend_id| self.find_watchpoint_location(backend_id));
        if let Some(location) = survivor {
            weak_error!(location.reapply(), "restore watchpoint settings:");
        }
        Ok(())
    }

    pub fn enable(&mut self, id: BreakpointId, enable: bool) -> Result<(), Error> {
        self.with_breakpoint(id, |bp, _| bp.enable(enable))
    }

    pub fn set_condition(&mut self, id: BreakpointId, condition: Condition) -> Result<(), Error> {
        self.with_breakpoint(id, |bp, _| bp.set_condition(condition))
    }

    pub fn set_pass_count(&mut self, id: BreakpointId, pass_count: PassCount) -> Result<(), Error> {
        self.with_breakpoint(id, |bp, _| bp.set_pass_count(pass_count))
    }

    pub fn state(&self, id: BreakpointId) -> Result<BreakpointState, Error> {
        Ok(self.get(id)?.as_breakpoint().state())
    }

    pub fn bound_locations(&self, id: BreakpointId) -> Result<Vec<Arc<BoundLocation>>, Error> {
        self.get(id)?.as_breakpoint().bound_locations()
    }

    pub fn last_error(&self, id: BreakpointId) -> Result<Option<BreakpointError>, Error> {
        Ok(self.get(id)?.as_breakpoint().last_error().cloned())
    }

    /// Backend id of a bound breakpoint or watchpoint.
    pub fn backend_id(&self, id: BreakpointId) -> Result<Option<u32>, Error> {
        Ok(self.get(id)?.as_breakpoint().backend_id())
    }

    /// Reconcile breakpoint locations with the backend. No-op for watchpoints.
    pub fn update_locations(&mut self, id: BreakpointId) -> Result<(), Error> {
        let Self {
            resolver,
            slots,
            index,
            outbox,
        } = self;
        let slot = slots.get_mut(id.0).ok_or(Error::UnknownBreakpoint(id))?;
        let BreakpointKind::Location(bp) = slot else {
            return Ok(());
        };
        bp.update_locations(&mut BindContext {
            resolver: resolver.as_ref(),
            index,
            outbox,
        })
    }

    /// Reconcile locations of a breakpoint known by its backend id.
    /// Return false if no live breakpoint owns this backend id.
    pub fn update_locations_by_backend_id(&mut self, backend_id: u32) -> Result<bool, Error> {
        let Some(id) = self.index.breakpoint(backend_id) else {
            debug!(target: "breakpoint", "breakpoint {backend_id} is not registered, skip update");
            return Ok(false);
        };
        self.update_locations(id)?;
        Ok(true)
    }

    /// Find a live bound location by backend breakpoint id and location id.
    pub fn find_bound_location(
        &self,
        backend_id: u32,
        location_id: u32,
    ) -> Option<Arc<BoundLocation>> {
        let id = self.index.breakpoint(backend_id)?;
        match self.slots.get(id.0)? {
            BreakpointKind::Location(bp) => bp
                .location(location_id)
                .filter(|location| !location.is_deleted()),
            BreakpointKind::Data(_) => None,
        }
    }

    /// Find a live watchpoint location by backend watchpoint id.
    pub fn find_watchpoint_location(&self, backend_id: u32) -> Option<Arc<BoundLocation>> {
        let id = self.index.watchpoint(backend_id)?;
        match self.slots.get(id.0)? {
            BreakpointKind::Data(wp) => wp.location().filter(|location| !location.is_deleted()),
            BreakpointKind::Location(_) => None,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        self.slots
            .iter()
            .fold(RegistryStats::default(), |mut stats, slot| {
                let bp = slot.as_breakpoint();
                if bp.state() == BreakpointState::Deleted {
                    return stats;
                }
                match slot {
                    BreakpointKind::Location(_) => stats.breakpoints += 1,
                    BreakpointKind::Data(_) => stats.watchpoints += 1,
                }
                stats.bound_locations += bp.bound_locations().map_or(0, |l| l.len());
                stats
            })
    }

    /// Delete all breakpoints and watchpoints, used at the end of a session.
    pub fn clear(&mut self) {
        for idx in 0..self.slots.len() {
            let id = BreakpointId(idx);
            if self.state(id).ok() == Some(BreakpointState::Deleted) {
                continue;
            }
            weak_error!(self.delete(id), "delete breakpoint:");
        }
        self.outbox.clear();
    }

    /// Take events produced since the last call.
    pub(crate) fn take_events(&mut self) -> Vec<DebugEvent> {
        mem::take(&mut self.outbox)
    }
}

/// Shared registry handle, used by the user-facing side and by the event listener.
///
/// Events produced by registry operations are forwarded to the sink once the
/// registry lock is released.
#[derive(Clone)]
pub struct Breakpoints {
    registry: Arc<Mutex<BreakpointRegistry>>,
    sink: Arc<dyn EventSink>,
}

impl Breakpoints {
    pub fn new(resolver: Arc<dyn LocationResolver>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(BreakpointRegistry::new(resolver))),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakpointRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_registry<T>(&self, f: impl FnOnce(&mut BreakpointRegistry) -> T) -> T {
        let (result, events) = {
            let mut registry = self.lock();
            let result = f(&mut registry);
            (result, registry.take_events())
        };
        for event in events {
            self.sink.emit(event, None);
        }
        result
    }

    pub fn create(&self, request: BreakpointRequest) -> BreakpointId {
        self.with_registry(|r| r.create(request))
    }

    pub fn bind(&self, id: BreakpointId) -> Result<(), Error> {
        self.with_registry(|r| r.bind(id))
    }

    pub fn can_bind(&self, id: BreakpointId) -> Result<(), Error> {
        self.lock().can_bind(id)
    }

    pub fn delete(&self, id: BreakpointId) -> Result<(), Error> {
        self.with_registry(|r| r.delete(id))
    }

    pub fn enable(&self, id: BreakpointId, enable: bool) -> Result<(), Error> {
        self.with_registry(|r| r.enable(id, enable))
    }

    pub fn set_condition(&self, id: BreakpointId, condition: Condition) -> Result<(), Error> {
        self.with_registry(|r| r.set_condition(id, condition))
    }

    pub fn set_pass_count(&self, id: BreakpointId, pass_count: PassCount) -> Result<(), Error> {
        self.with_registry(|r| r.set_pass_count(id, pass_count))
    }

    pub fn state(&self, id: BreakpointId) -> Result<BreakpointState, Error> {
        self.lock().state(id)
    }

    pub fn bound_locations(&self, id: BreakpointId) -> Result<Vec<Arc<BoundLocation>>, Error> {
        self.lock().bound_locations(id)
    }

    pub fn last_error(&self, id: BreakpointId) -> Result<Option<BreakpointError>, Error> {
        self.lock().last_error(id)
    }

    pub fn backend_id(&self, id: BreakpointId) -> Result<Option<u32>, Error> {
        self.lock().backend_id(id)
    }

    pub fn update_locations(&self, id: BreakpointId) -> Result<(), Error> {
        self.with_registry(|r| r.update_locations(id))
    }

    pub fn update_locations_by_backend_id(&self, backend_id: u32) -> Result<bool, Error> {
        self.with_registry(|r| r.update_locations_by_backend_id(backend_id))
    }

    pub fn find_bound_location(
        &self,
        backend_id: u32,
        location_id: u32,
    ) -> Option<Arc<BoundLocation>> {
        self.lock().find_bound_location(backend_id, location_id)
    }

    pub fn find_watchpoint_location(&self, backend_id: u32) -> Option<Arc<BoundLocation>> {
        self.lock().find_watchpoint_location(backend_id)
    }

    pub fn stats(&self) -> RegistryStats {
        self.lock().stats()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }
}
