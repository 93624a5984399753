mod address;
pub mod backend;
mod breakpoint;
mod dispatch;
mod error;
pub mod event;
mod listener;
mod location;
mod pass_count;
mod registry;
mod watchpoint;

pub use address::Address;
pub use breakpoint::{
    BindError, BindErrorReason, BreakpointError, BreakpointErrorKind, BreakpointRequest,
    BreakpointState, Condition, LocationRequest, PendingBreakpoint, UNSUPPORTED_MESSAGE,
};
pub use dispatch::{ProgramState, StopEventDispatcher};
pub use error::Error;
pub use listener::EventListener;
pub use location::{BoundLocation, LocationSnapshot, LocationStatus};
pub use pass_count::{PassCount, PassCountStyle};
pub use registry::{
    BreakpointId, BreakpointKind, BreakpointRegistry, Breakpoints, LocationIndex, RegistryStats,
};
pub use watchpoint::Watchpoint;

use crate::config::EngineConfig;
use crate::debugger::backend::{EventSource, LocationResolver, ProcessControl, ProcessState};
use crate::debugger::event::EventSink;
use crate::debugger::listener::{report_backend_failure, RawEventHandler};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Backend services used by a debug session.
#[derive(Clone)]
pub struct Backend {
    pub resolver: Arc<dyn LocationResolver>,
    pub process: Arc<dyn ProcessControl>,
    pub events: Arc<dyn EventSource>,
}

impl Backend {
    /// Use one object for all backend services.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: LocationResolver + ProcessControl + EventSource + 'static,
    {
        Self {
            resolver: backend.clone(),
            process: backend.clone(),
            events: backend,
        }
    }
}

/// Debug session: breakpoint registry, stop dispatching and the backend event listener.
///
/// Dropping the session stops the listener and deletes all breakpoints and watchpoints.
pub struct DebugSession {
    config: EngineConfig,
    backend: Backend,
    breakpoints: Breakpoints,
    sink: Arc<dyn EventSink>,
    state: Arc<ProgramState>,
    listener: Option<EventListener>,
}

impl DebugSession {
    pub fn new(config: EngineConfig, backend: Backend, sink: Arc<dyn EventSink>) -> Self {
        let breakpoints = Breakpoints::new(backend.resolver.clone(), sink.clone());
        Self {
            config,
            backend,
            breakpoints,
            sink,
            state: Arc::default(),
            listener: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Breakpoint and watchpoint operations.
    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn program_state(&self) -> &ProgramState {
        &self.state
    }

    fn dispatcher(&self) -> StopEventDispatcher {
        StopEventDispatcher::new(
            self.backend.process.clone(),
            self.breakpoints.clone(),
            self.sink.clone(),
            self.state.clone(),
            self.config.break_on_first_exec,
        )
    }

    fn raw_event_handler(&self) -> RawEventHandler {
        RawEventHandler {
            dispatcher: self.dispatcher(),
            breakpoints: self.breakpoints.clone(),
        }
    }

    /// Dispatch a state change on the calling thread, without the listener.
    pub fn handle_state_changed(&self, state: ProcessState, restarted: bool) {
        self.dispatcher().on_state_changed(state, restarted)
    }

    /// Handle backend events on the calling thread until no event arrives within `timeout`.
    /// Return number of handled events.
    ///
    /// Not allowed while the background listener is running.
    pub fn process_events(&self, timeout: Duration) -> Result<usize, Error> {
        if self.is_listener_polling() {
            return Err(Error::ListenerAlreadyRunning);
        }
        let handler = self.raw_event_handler();
        let mut handled = 0;
        loop {
            let event = match self.backend.events.wait_for_event(timeout) {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(handled),
                Err(e) => {
                    report_backend_failure(self.sink.as_ref(), &e);
                    return Err(e.into());
                }
            };
            handler.handle(event);
            handled += 1;
        }
    }

    /// Start polling backend events in background.
    pub fn start_listener(&mut self) -> Result<(), Error> {
        if self.is_listener_polling() {
            return Err(Error::ListenerAlreadyRunning);
        }
        // previous listener may have stopped by itself (backend failure)
        self.stop_listener();

        let listener = EventListener::spawn(
            self.backend.events.clone(),
            self.raw_event_handler(),
            self.sink.clone(),
            self.config.listener_interval(),
        )?;
        self.listener = Some(listener);
        info!(target: "debugger", "debug session listener started");
        Ok(())
    }

    /// Stop the listener and wait for it. No-op if the listener is not running.
    pub fn stop_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
            debug!(target: "debugger", "debug session listener stopped");
        }
    }

    pub fn is_listener_polling(&self) -> bool {
        self.listener
            .as_ref()
            .map(EventListener::is_polling)
            .unwrap_or_default()
    }

    /// Mark the coming process exit as requested by the user.
    pub fn request_terminate(&self) {
        self.state.request_terminate()
    }

    /// Mark the coming detach as requested by the user.
    pub fn request_detach(&self) {
        self.state.request_detach()
    }

    pub fn stats(&self) -> RegistryStats {
        self.breakpoints.stats()
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.stop_listener();
        self.breakpoints.clear();
    }
}
