use crate::debugger::backend::{NativeLocation, WatchAccess};
use crate::debugger::breakpoint::{
    BindContext, BindError, BindErrorReason, Breakpoint, BreakpointError, BreakpointErrorKind,
    BreakpointRequest, BreakpointState, Condition, LocationRequest, UNSUPPORTED_MESSAGE,
};
use crate::debugger::event::DebugEvent;
use crate::debugger::location::BoundLocation;
use crate::debugger::pass_count::PassCount;
use crate::debugger::registry::BreakpointId;
use crate::debugger::Error;
use log::{debug, warn};
use std::sync::Arc;

/// Data breakpoint, stops when memory at the watched address is written.
///
/// Watchpoint is bound to exactly one backend watchpoint. Backend may hand out the same
/// watchpoint for several requests on one address, so the backend object is shared through
/// the registry reference counter and removed only by the last owner.
pub struct Watchpoint {
    id: BreakpointId,
    request: BreakpointRequest,
    native: Option<Arc<dyn NativeLocation>>,
    location: Option<Arc<BoundLocation>>,
    enabled: bool,
    deleted: bool,
    last_error: Option<BreakpointError>,
}

impl Watchpoint {
    pub(crate) fn new(id: BreakpointId, request: BreakpointRequest) -> Self {
        Self {
            id,
            request,
            native: None,
            location: None,
            enabled: true,
            deleted: false,
            last_error: None,
        }
    }

    pub fn request(&self) -> &BreakpointRequest {
        &self.request
    }

    /// Bound location, `None` until bind.
    pub fn location(&self) -> Option<Arc<BoundLocation>> {
        self.location.clone()
    }

    fn set_error(&mut self, ctx: &mut BindContext, kind: BreakpointErrorKind, message: String) {
        let error = BreakpointError {
            breakpoint: self.id,
            kind,
            message,
        };
        warn!(target: "breakpoint", "watchpoint {}: {}", self.id, error.message);
        self.last_error = Some(error.clone());
        ctx.outbox.push(DebugEvent::BreakpointError(error));
    }
}

impl Breakpoint for Watchpoint {
    fn id(&self) -> BreakpointId {
        self.id
    }

    fn backend_id(&self) -> Option<u32> {
        self.native.as_ref().map(|native| native.id())
    }

    fn bind(&mut self, ctx: &mut BindContext) -> Result<(), Error> {
        if let Err(e) = self.can_bind() {
            if !matches!(e, Error::Deleted) {
                self.set_error(
                    ctx,
                    BreakpointErrorKind::Unsupported,
                    UNSUPPORTED_MESSAGE.to_string(),
                );
            }
            return Err(e);
        }
        if self.native.is_some() {
            return Ok(());
        }

        let LocationRequest::Data { address, size } = self.request.location else {
            unreachable!("infallible: request kind validated before resolve")
        };
        let native = match ctx
            .resolver
            .create_watchpoint(address, size, WatchAccess::WRITE)
        {
            Ok(native) => native,
            Err(e) => {
                let error = BindError::from(BindErrorReason::Backend(e.to_string()));
                self.set_error(ctx, BreakpointErrorKind::Unbound, error.to_string());
                return Err(error.into());
            }
        };

        let applied = ctx.index.register_watchpoint(native.id(), self.id);
        let location = Arc::new(BoundLocation::with_cache(self.id, native.clone(), applied));
        if let Err(e) =
            location.configure(self.enabled, &self.request.condition, self.request.pass_count)
        {
            if ctx.index.unregister_watchpoint(native.id(), self.id) == 0 {
                native.delete();
            }
            return Err(e);
        }
        debug!(
            target: "breakpoint",
            "watchpoint {} set at {address:#X} ({size} bytes), owners: {}",
            native.id(),
            ctx.index.watchpoint_ref_count(native.id())
        );
        ctx.outbox.push(DebugEvent::BreakpointBound {
            breakpoint: self.id,
            locations: vec![location.clone()],
        });

        self.native = Some(native);
        self.location = Some(location);
        self.last_error = None;
        Ok(())
    }

    fn can_bind(&self) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        if !self.request.is_data() {
            return Err(Error::UnsupportedLocation);
        }
        if let Condition::WhenChanged(_) = self.request.condition {
            return Err(Error::UnsupportedCondition);
        }
        Ok(())
    }

    /// Delete watchpoint. Repeated deletion is not an error.
    fn delete(&mut self, ctx: &mut BindContext) -> Result<(), Error> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;

        if let Some(location) = self.location.take() {
            location.delete();
        }
        if let Some(native) = self.native.take() {
            let remaining = ctx.index.unregister_watchpoint(native.id(), self.id);
            if remaining == 0 {
                native.delete();
            } else {
                debug!(
                    target: "breakpoint",
                    "watchpoint {} still used by {remaining} owner(s)",
                    native.id()
                );
            }
        }
        Ok(())
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        self.enabled = enable;
        match self.location {
            Some(ref location) => location.enable(enable),
            None => Ok(()),
        }
    }

    fn set_condition(&mut self, condition: Condition) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        condition.as_backend_str()?;
        if let Some(ref location) = self.location {
            location.set_condition(&condition)?;
        }
        self.request.condition = condition;
        Ok(())
    }

    fn set_pass_count(&mut self, pass_count: PassCount) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        self.request.pass_count = pass_count;
        match self.location {
            Some(ref location) => location.set_pass_count(pass_count),
            None => Ok(()),
        }
    }

    fn state(&self) -> BreakpointState {
        if self.deleted {
            BreakpointState::Deleted
        } else if self.enabled {
            BreakpointState::Enabled
        } else {
            BreakpointState::Disabled
        }
    }

    fn bound_locations(&self) -> Result<Vec<Arc<BoundLocation>>, Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        Ok(self.location.iter().cloned().collect())
    }

    fn last_error(&self) -> Option<&BreakpointError> {
        self.last_error.as_ref()
    }
}
