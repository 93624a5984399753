use crate::debugger::backend::{
    LocationResolver, NativeBreakpoint, NativeLocation, NativeRequest, ResolveError,
};
use crate::debugger::event::DebugEvent;
use crate::debugger::location::BoundLocation;
use crate::debugger::pass_count::PassCount;
use crate::debugger::registry::{BreakpointId, LocationIndex};
use crate::debugger::Error;
use log::{debug, warn};
use once_cell::sync;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::Display;

/// Message reported for a request the engine can not bind at all.
pub const UNSUPPORTED_MESSAGE: &str = "Breakpoint type is not supported.";

/// `{name, , } +offset`, the module part is not supported.
static FUNCTION_OFFSET_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
    Regex::new(
        r"^\s*\{\s*(?P<name>[a-zA-Z_][a-zA-Z0-9_:]*)\s*,\s*,\s*\}\s*\+?\s*(?P<offset>\d+)?\s*$",
    )
    .expect("must compile")
});

/// Where a breakpoint should stop.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRequest {
    /// Source position, line is 1-based.
    FileLine {
        file: Option<PathBuf>,
        line: Option<u32>,
    },
    /// Function name, optionally in the `{name, , } +offset` form.
    FunctionOffset { expression: Option<String> },
    /// Code address as a hex string.
    Address(Option<String>),
    /// Memory range watched for writes.
    Data { address: u64, size: u32 },
    /// Location kind the engine does not know how to bind.
    Unsupported(String),
}

/// Breakpoint condition.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    None,
    /// Stop only if expression evaluates to true.
    WhenTrue(String),
    /// Stop when expression value changes, backend has no support for it.
    WhenChanged(String),
}

impl Condition {
    /// Condition text in the form understood by the backend.
    pub(crate) fn as_backend_str(&self) -> Result<&str, Error> {
        match self {
            Condition::None => Ok(""),
            Condition::WhenTrue(expr) => Ok(expr.as_str()),
            Condition::WhenChanged(_) => Err(Error::UnsupportedCondition),
        }
    }
}

/// User request for a breakpoint or a watchpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BreakpointRequest {
    pub location: LocationRequest,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub pass_count: PassCount,
}

impl BreakpointRequest {
    pub fn new(location: LocationRequest) -> Self {
        Self {
            location,
            condition: Condition::None,
            pass_count: PassCount::NONE,
        }
    }

    pub fn with_condition(self, condition: Condition) -> Self {
        Self { condition, ..self }
    }

    pub fn with_pass_count(self, pass_count: PassCount) -> Self {
        Self { pass_count, ..self }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.location, LocationRequest::Data { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BindErrorReason {
    #[error("Unable to retrieve source code filename.")]
    NoSourceFilename,
    #[error("Unable to retrieve source code line number.")]
    NoSourceLineNumber,
    #[error("Unable to find function name.")]
    NoFunctionName,
    #[error("Unable to retrieve code address.")]
    NoCodeAddress,
    #[error("Unable to retrieve function information.")]
    NoFunctionFound,
    #[error("Unable to find a valid address to bind breakpoint.")]
    NoValidLocation,
    #[error("Unable to set breakpoint for the specified position.")]
    PositionNotAvailable,
    #[error("Unable to bind breakpoint.")]
    CreationFailed,
    #[error("{0}")]
    Backend(String),
}

/// Request has a bindable kind, but resolution failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct BindError {
    pub reason: BindErrorReason,
}

impl From<BindErrorReason> for BindError {
    fn from(reason: BindErrorReason) -> Self {
        Self { reason }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum BreakpointErrorKind {
    Unsupported,
    Unbound,
}

/// Per-breakpoint error delivered to the user interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointError {
    pub breakpoint: BreakpointId,
    pub kind: BreakpointErrorKind,
    pub message: String,
}

/// User visible state of a breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum BreakpointState {
    Enabled,
    Disabled,
    Deleted,
}

/// Borrowed registry parts needed while a breakpoint changes its bindings.
pub(crate) struct BindContext<'a> {
    pub(crate) resolver: &'a dyn LocationResolver,
    pub(crate) index: &'a mut LocationIndex,
    pub(crate) outbox: &'a mut Vec<DebugEvent>,
}

impl BindContext<'_> {
    fn report(&mut self, error: BreakpointError) {
        warn!(target: "breakpoint", "breakpoint {}: {}", error.breakpoint, error.message);
        self.outbox.push(DebugEvent::BreakpointError(error));
    }
}

/// Lifecycle operations shared by breakpoints and watchpoints.
pub(crate) trait Breakpoint {
    fn id(&self) -> BreakpointId;

    /// Id of the backend object, `None` while unbound.
    fn backend_id(&self) -> Option<u32>;

    fn bind(&mut self, ctx: &mut BindContext) -> Result<(), Error>;

    /// Validate request without any side effects.
    fn can_bind(&self) -> Result<(), Error>;

    fn delete(&mut self, ctx: &mut BindContext) -> Result<(), Error>;

    fn enable(&mut self, enable: bool) -> Result<(), Error>;

    fn set_condition(&mut self, condition: Condition) -> Result<(), Error>;

    fn set_pass_count(&mut self, pass_count: PassCount) -> Result<(), Error>;

    fn state(&self) -> BreakpointState;

    fn bound_locations(&self) -> Result<Vec<Arc<BoundLocation>>, Error>;

    fn last_error(&self) -> Option<&BreakpointError>;
}

/// User breakpoint request and locations it is currently bound to.
pub struct PendingBreakpoint {
    id: BreakpointId,
    request: BreakpointRequest,
    native: Option<Arc<dyn NativeBreakpoint>>,
    /// Bound locations by backend location id.
    locations: BTreeMap<u32, Arc<BoundLocation>>,
    enabled: bool,
    deleted: bool,
    last_error: Option<BreakpointError>,
}

impl PendingBreakpoint {
    pub(crate) fn new(id: BreakpointId, request: BreakpointRequest) -> Self {
        Self {
            id,
            request,
            native: None,
            locations: BTreeMap::new(),
            enabled: true,
            deleted: false,
            last_error: None,
        }
    }

    pub fn request(&self) -> &BreakpointRequest {
        &self.request
    }

    /// Return bound location by backend location id.
    pub fn location(&self, location_id: u32) -> Option<Arc<BoundLocation>> {
        self.locations.get(&location_id).cloned()
    }

    fn native_request(&self) -> Result<NativeRequest, BindError> {
        let request = match &self.request.location {
            LocationRequest::FileLine { file, line } => {
                let file = file.clone().ok_or(BindErrorReason::NoSourceFilename)?;
                let line = line.ok_or(BindErrorReason::NoSourceLineNumber)?;
                NativeRequest::FileLine { file, line }
            }
            LocationRequest::FunctionOffset { expression } => {
                let expression = expression
                    .as_deref()
                    .filter(|expr| !expr.trim().is_empty())
                    .ok_or(BindErrorReason::NoFunctionName)?;
                parse_function_expression(expression)
            }
            LocationRequest::Address(address) => {
                let address = address
                    .as_deref()
                    .and_then(parse_hex_address)
                    .ok_or(BindErrorReason::NoCodeAddress)?;
                NativeRequest::Address(address)
            }
            LocationRequest::Data { .. } | LocationRequest::Unsupported(_) => {
                unreachable!("infallible: request kind validated before resolve")
            }
        };
        Ok(request)
    }

    fn resolve(
        &self,
        resolver: &dyn LocationResolver,
    ) -> Result<Arc<dyn NativeBreakpoint>, BindError> {
        let request = self.native_request()?;
        let is_offset = matches!(request, NativeRequest::FunctionOffset { .. });
        resolver.create_breakpoint(&request).map_err(|e| {
            let reason = match e {
                ResolveError::Backend(msg) => BindErrorReason::Backend(msg),
                ResolveError::NoFunctionFound if is_offset => BindErrorReason::NoFunctionFound,
                ResolveError::NoFunctionLocation if is_offset => BindErrorReason::NoValidLocation,
                _ if is_offset => BindErrorReason::PositionNotAvailable,
                _ => BindErrorReason::CreationFailed,
            };
            BindError::from(reason)
        })
    }

    /// Wrap backend location and apply breakpoint settings to it.
    fn adopt(&self, native: Arc<dyn NativeLocation>) -> Result<Arc<BoundLocation>, Error> {
        let bound = Arc::new(BoundLocation::new(self.id, native));
        bound.configure(self.enabled, &self.request.condition, self.request.pass_count)?;
        Ok(bound)
    }

    fn fail(&mut self, ctx: &mut BindContext, error: BindError) -> Error {
        let report = BreakpointError {
            breakpoint: self.id,
            kind: BreakpointErrorKind::Unbound,
            message: error.to_string(),
        };
        self.last_error = Some(report.clone());
        ctx.report(report);
        Error::Bind(error)
    }

    fn report_unsupported(&mut self, ctx: &mut BindContext) {
        let report = BreakpointError {
            breakpoint: self.id,
            kind: BreakpointErrorKind::Unsupported,
            message: UNSUPPORTED_MESSAGE.to_string(),
        };
        self.last_error = Some(report.clone());
        ctx.report(report);
    }

    /// Re-query backend locations and reconcile bound locations with them.
    ///
    /// New locations inherit breakpoint settings and are announced with a bound event,
    /// locations gone from the backend are dropped. Losing the last location reports a bind error.
    pub(crate) fn update_locations(&mut self, ctx: &mut BindContext) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        let Some(native) = self.native.clone() else {
            return Ok(());
        };

        let mut remote = BTreeMap::new();
        for idx in 0..native.location_count() {
            match native.location_at(idx) {
                Some(location) if location.address().is_some() => {
                    remote.insert(location.id(), location);
                }
                Some(location) => {
                    warn!(
                        target: "breakpoint",
                        "location {} of breakpoint {} has no address",
                        location.id(),
                        native.id()
                    )
                }
                None => {
                    warn!(
                        target: "breakpoint",
                        "failed to get location {idx} of breakpoint {}",
                        native.id()
                    )
                }
            }
        }

        let was_bound = !self.locations.is_empty();
        self.locations.retain(|id, bound| {
            let keep = remote.contains_key(id);
            if !keep {
                debug!(target: "breakpoint", "location {id} of breakpoint {} removed", native.id());
                bound.delete();
            }
            keep
        });

        let mut added = vec![];
        for (id, location) in remote {
            if self.locations.contains_key(&id) {
                continue;
            }
            let bound = self.adopt(location)?;
            self.locations.insert(id, bound.clone());
            added.push(bound);
        }

        if self.locations.is_empty() {
            if was_bound {
                self.fail(ctx, BindErrorReason::NoValidLocation.into());
            }
        } else {
            self.last_error = None;
        }

        if !added.is_empty() {
            debug!(
                target: "breakpoint",
                "breakpoint {}: {} new location(s)",
                native.id(),
                added.len()
            );
            ctx.outbox.push(DebugEvent::BreakpointBound {
                breakpoint: self.id,
                locations: added,
            });
        }
        Ok(())
    }
}

impl Breakpoint for PendingBreakpoint {
    fn id(&self) -> BreakpointId {
        self.id
    }

    fn backend_id(&self) -> Option<u32> {
        self.native.as_ref().map(|native| native.id())
    }

    fn bind(&mut self, ctx: &mut BindContext) -> Result<(), Error> {
        if let Err(e) = self.can_bind() {
            if !matches!(e, Error::Deleted) {
                self.report_unsupported(ctx);
            }
            return Err(e);
        }

        if self.native.is_some() {
            return self.update_locations(ctx);
        }

        let native = match self.resolve(ctx.resolver) {
            Ok(native) => native,
            Err(e) => return Err(self.fail(ctx, e)),
        };

        let mut natives = Vec::with_capacity(native.location_count() as usize);
        for idx in 0..native.location_count() {
            match native.location_at(idx) {
                Some(location) if location.address().is_some() => natives.push(location),
                _ => break,
            }
        }
        if natives.is_empty() || natives.len() != native.location_count() as usize {
            native.delete();
            return Err(self.fail(ctx, BindErrorReason::NoValidLocation.into()));
        }

        let mut locations = BTreeMap::new();
        for location in natives {
            match self.adopt(location) {
                Ok(bound) => {
                    locations.insert(bound.id(), bound);
                }
                Err(e) => {
                    native.delete();
                    return Err(e);
                }
            }
        }

        ctx.index.register_breakpoint(native.id(), self.id);
        debug!(
            target: "breakpoint",
            "breakpoint {} bound to {} location(s)",
            native.id(),
            locations.len()
        );
        ctx.outbox.push(DebugEvent::BreakpointBound {
            breakpoint: self.id,
            locations: locations.values().cloned().collect(),
        });
        self.native = Some(native);
        self.locations = locations;
        self.last_error = None;
        Ok(())
    }

    fn can_bind(&self) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        match self.request.location {
            LocationRequest::FileLine { .. }
            | LocationRequest::FunctionOffset { .. }
            | LocationRequest::Address(_) => {}
            LocationRequest::Data { .. } | LocationRequest::Unsupported(_) => {
                return Err(Error::UnsupportedLocation)
            }
        }
        if let Condition::WhenChanged(_) = self.request.condition {
            return Err(Error::UnsupportedCondition);
        }
        Ok(())
    }

    fn delete(&mut self, ctx: &mut BindContext) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        self.deleted = true;

        if let Some(native) = self.native.take() {
            ctx.index.unregister_breakpoint(native.id());
            native.delete();
        }
        for location in self.locations.values() {
            location.delete();
        }
        self.locations.clear();
        self.last_error = None;
        Ok(())
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        self.enabled = enable;
        self.locations
            .values()
            .try_for_each(|location| location.enable(enable))
    }

    fn set_condition(&mut self, condition: Condition) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        condition.as_backend_str()?;
        self.locations
            .values()
            .try_for_each(|location| location.set_condition(&condition))?;
        self.request.condition = condition;
        Ok(())
    }

    fn set_pass_count(&mut self, pass_count: PassCount) -> Result<(), Error> {
        if self.deleted {
            return Err(Error::Deleted);
        }
        self.request.pass_count = pass_count;
        self.locations
            .values()
            .try_for_each(|location| location.set_pass_count(pass_count))
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
        Ok(self.locations.values().cloned().collect())
    }

    fn last_error(&self) -> Option<&BreakpointError> {
        self.last_error.as_ref()
    }
}

/// Split function expression into a backend request.
/// A zero or absent offset means a plain function breakpoint.
fn parse_function_expression(expression: &str) -> NativeRequest {
    if let Some(caps) = FUNCTION_OFFSET_RE.captures(expression) {
        let name = caps["name"].to_string();
        let offset = caps
            .name("offset")
            .and_then(|offset| offset.as_str().parse::<u32>().ok())
            .unwrap_or_default();
        if offset > 0 {
            return NativeRequest::FunctionOffset { name, offset };
        }
        return NativeRequest::Function { name };
    }
    NativeRequest::Function {
        name: expression.trim().to_string(),
    }
}

fn parse_hex_address(address: &str) -> Option<u64> {
    let address = address.trim();
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    u64::from_str_radix(digits, 16).ok()
}
