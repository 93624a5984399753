use crate::debugger::address::Address;
use crate::debugger::backend::NativeLocation;
use crate::debugger::breakpoint::Condition;
use crate::debugger::pass_count::{self, PassCount};
use crate::debugger::registry::BreakpointId;
use crate::debugger::Error;
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Values last written into the backend, used to skip redundant backend calls.
#[derive(Default, Debug)]
struct Applied {
    enabled: Option<bool>,
    /// Ignore count and the backend hit count at the moment it was written.
    /// The backend consumes the ignore count on skipped hits, so the value is
    /// trusted only while the backend hit count stays the same.
    ignore_count: Option<(u32, u32)>,
    condition: Option<String>,
}

/// Last applied values of one backend object. Shared by every [`BoundLocation`]
/// wrapping the same backend object.
#[derive(Default, Debug)]
pub(crate) struct AppliedCache(Mutex<Applied>);

impl AppliedCache {
    fn lock(&self) -> MutexGuard<'_, Applied> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct LocationState {
    deleted: bool,
    /// Enabled flag requested by the user.
    enabled: bool,
    /// Location reached its pass count and must not stop, regardless of `enabled`.
    disabled_by_pass_count: bool,
    pass_count: PassCount,
    /// Backend hit count at the last hit count override.
    base_hit_count: i64,
    condition: String,
}

/// Current status of a location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationStatus {
    Enabled,
    Disabled,
    Deleted,
}

/// Consistent view of a location state.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationSnapshot {
    pub id: u32,
    pub owner: BreakpointId,
    pub address: Option<Address>,
    /// Enabled flag requested by the user.
    pub enabled: bool,
    /// Whether the location can actually stop the debuggee.
    pub armed: bool,
    pub hit_count: u32,
    pub pass_count: PassCount,
    pub condition: String,
}

/// Concrete, backend-resident instance of a breakpoint or a watchpoint.
pub struct BoundLocation {
    id: u32,
    owner: BreakpointId,
    address: Option<Address>,
    native: Arc<dyn NativeLocation>,
    applied: Arc<AppliedCache>,
    state: Mutex<LocationState>,
}

impl std::fmt::Debug for BoundLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundLocation")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("address", &self.address)
            .finish()
    }
}

impl LocationState {
    /// Backend hit count adjusted by the last override.
    fn hit_count(&self, native: &dyn NativeLocation) -> u32 {
        let total = i64::from(native.hit_count());
        if total < self.base_hit_count {
            warn!(
                target: "breakpoint",
                "inconsistent hit count, base ({}) is greater than actual ({total})",
                self.base_hit_count
            );
            return 0;
        }
        u32::try_from(total - self.base_hit_count).unwrap_or(u32::MAX)
    }

    /// Re-evaluate pass count policy and push the differences into the backend.
    fn apply(&mut self, native: &dyn NativeLocation, applied: &AppliedCache) {
        let total = native.hit_count();
        let hit_count = self.hit_count(native);
        let decision = pass_count::evaluate(self.pass_count, hit_count);
        self.disabled_by_pass_count = !decision.enabled;

        let mut applied = applied.lock();
        let enabled = self.enabled && decision.enabled;
        if applied.enabled != Some(enabled) {
            native.set_enabled(enabled);
            applied.enabled = Some(enabled);
        }

        if let Some(ignore_count) = decision.ignore_count {
            if applied.ignore_count != Some((ignore_count, total)) {
                native.set_ignore_count(ignore_count);
                applied.ignore_count = Some((ignore_count, total));
            }
        }
    }

    fn apply_condition(&self, native: &dyn NativeLocation, applied: &AppliedCache) {
        let mut applied = applied.lock();
        if applied.condition.as_deref() != Some(self.condition.as_str()) {
            native.set_condition(&self.condition);
            applied.condition = Some(self.condition.clone());
        }
    }
}

impl BoundLocation {
    /// Wrap a backend location. Backend state is untouched until [`BoundLocation::configure`].
    pub(crate) fn new(owner: BreakpointId, native: Arc<dyn NativeLocation>) -> Self {
        Self::with_cache(owner, native, Arc::default())
    }

    /// Wrap a backend object that is shared with other owners.
    pub(crate) fn with_cache(
        owner: BreakpointId,
        native: Arc<dyn NativeLocation>,
        applied: Arc<AppliedCache>,
    ) -> Self {
        Self {
            id: native.id(),
            owner,
            address: native.address().map(Address::from),
            native,
            applied,
            state: Mutex::new(LocationState {
                deleted: false,
                enabled: true,
                disabled_by_pass_count: false,
                pass_count: PassCount::NONE,
                base_hit_count: 0,
                condition: String::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_alive(&self) -> Result<MutexGuard<'_, LocationState>, Error> {
        let state = self.lock();
        if state.deleted {
            return Err(Error::Deleted);
        }
        Ok(state)
    }

    /// Apply settings inherited from the owning breakpoint.
    pub(crate) fn configure(
        &self,
        enabled: bool,
        condition: &Condition,
        pass_count: PassCount,
    ) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.enabled = enabled;
        state.pass_count = pass_count;
        state.condition = condition.as_backend_str()?.to_string();
        state.apply_condition(self.native.as_ref(), &self.applied);
        state.apply(self.native.as_ref(), &self.applied);
        Ok(())
    }

    /// Push the whole location state into the backend again, writing only values that
    /// differ from the last applied ones. Used when another owner of a shared backend
    /// object has gone.
    pub(crate) fn reapply(&self) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.apply_condition(self.native.as_ref(), &self.applied);
        state.apply(self.native.as_ref(), &self.applied);
        Ok(())
    }

    /// Backend-assigned location id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Breakpoint or watchpoint owning this location.
    pub fn owner(&self) -> BreakpointId {
        self.owner
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    /// Enable or disable location. A location disabled by its pass count stays
    /// disabled in the backend until the pass count or the hit count changes.
    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.enabled = enable;
        state.apply(self.native.as_ref(), &self.applied);
        Ok(())
    }

    pub fn set_condition(&self, condition: &Condition) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.condition = condition.as_backend_str()?.to_string();
        state.apply_condition(self.native.as_ref(), &self.applied);
        Ok(())
    }

    /// Condition text, empty if location is unconditional.
    pub fn condition(&self) -> Result<String, Error> {
        Ok(self.lock_alive()?.condition.clone())
    }

    pub fn set_pass_count(&self, pass_count: PassCount) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.pass_count = pass_count;
        state.apply(self.native.as_ref(), &self.applied);
        Ok(())
    }

    pub fn pass_count(&self) -> Result<PassCount, Error> {
        Ok(self.lock_alive()?.pass_count)
    }

    /// Override hit count. Pass count criteria are recalculated against the new value.
    pub fn set_hit_count(&self, hit_count: u32) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        let total = i64::from(self.native.hit_count());
        state.base_hit_count = total - i64::from(hit_count);
        state.apply(self.native.as_ref(), &self.applied);
        Ok(())
    }

    pub fn hit_count(&self) -> Result<u32, Error> {
        let state = self.lock_alive()?;
        Ok(state.hit_count(self.native.as_ref()))
    }

    /// Update location state after the backend reported a stop at this location.
    pub fn on_hit(&self) -> Result<(), Error> {
        let mut state = self.lock_alive()?;
        state.apply(self.native.as_ref(), &self.applied);
        debug!(
            target: "breakpoint",
            "location {} hit, hit count: {}, armed: {}",
            self.id,
            state.hit_count(self.native.as_ref()),
            state.enabled && !state.disabled_by_pass_count
        );
        Ok(())
    }

    /// Mark location as deleted. Idempotent.
    ///
    /// The backend object is released by the owning breakpoint, which knows whether
    /// the location still exists in the backend.
    pub fn delete(&self) {
        let mut state = self.lock();
        state.deleted = true;
        state.condition.clear();
    }

    pub fn is_deleted(&self) -> bool {
        self.lock().deleted
    }

    /// Status as requested by the user.
    pub fn status(&self) -> LocationStatus {
        let state = self.lock();
        if state.deleted {
            LocationStatus::Deleted
        } else if state.enabled {
            LocationStatus::Enabled
        } else {
            LocationStatus::Disabled
        }
    }

    /// Return all location attributes taken under a single lock.
    pub fn snapshot(&self) -> Result<LocationSnapshot, Error> {
        let state = self.lock_alive()?;
        Ok(LocationSnapshot {
            id: self.id,
            owner: self.owner,
            address: self.address,
            enabled: state.enabled,
            armed: state.enabled && !state.disabled_by_pass_count,
            hit_count: state.hit_count(self.native.as_ref()),
            pass_count: state.pass_count,
            condition: state.condition.clone(),
        })
    }
}
