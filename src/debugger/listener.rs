use crate::debugger::backend::{BackendError, EventSource, RawEvent};
use crate::debugger::dispatch::StopEventDispatcher;
use crate::debugger::event::{DebugEvent, EventSink, ExitReason};
use crate::debugger::registry::Breakpoints;
use crate::debugger::Error;
use crate::weak_error;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background thread polling backend events.
///
/// Stopping is cooperative: the stop flag is checked after every bounded wait, so the loop
/// exits at most one wait interval after [`EventListener::stop`]. An event already taken from
/// the backend is always handled to completion.
pub struct EventListener {
    cancel: Arc<AtomicBool>,
    polling: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Routes raw backend events to the dispatcher and the breakpoint registry.
pub(crate) struct RawEventHandler {
    pub(crate) dispatcher: StopEventDispatcher,
    pub(crate) breakpoints: Breakpoints,
}

impl RawEventHandler {
    pub(crate) fn handle(&self, event: RawEvent) {
        match event {
            RawEvent::StateChanged { state, restarted } => {
                self.dispatcher.on_state_changed(state, restarted)
            }
            RawEvent::BreakpointChanged { breakpoint_id } => {
                debug!(target: "listener", "breakpoint {breakpoint_id} changed");
                weak_error!(
                    self.breakpoints.update_locations_by_backend_id(breakpoint_id),
                    "update breakpoint locations:"
                );
            }
            RawEvent::StructuredData(data) => {
                debug!(target: "listener", "structured data: {data}");
            }
            RawEvent::Interrupt => {
                debug!(target: "listener", "interrupt");
            }
        }
    }
}

/// Report a lost backend event stream as the end of the debuggee.
pub(crate) fn report_backend_failure(sink: &dyn EventSink, e: &BackendError) {
    error!(target: "listener", "wait for backend event: {e}");
    sink.emit(
        DebugEvent::ProgramDestroy {
            reason: ExitReason::Error(e.to_string()),
        },
        None,
    );
}

/// Clears the polling flag when the listener thread ends, including unwinding.
struct PollingGuard(Arc<AtomicBool>);

impl Drop for PollingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ListenerLoop {
    source: Arc<dyn EventSource>,
    handler: RawEventHandler,
    sink: Arc<dyn EventSink>,
    interval: Duration,
    cancel: Arc<AtomicBool>,
}

impl ListenerLoop {
    fn run(self) {
        info!(target: "listener", "event listener started");
        while !self.cancel.load(Ordering::SeqCst) {
            match self.source.wait_for_event(self.interval) {
                Ok(Some(event)) => self.handler.handle(event),
                Ok(None) => {}
                Err(e) => {
                    report_backend_failure(self.sink.as_ref(), &e);
                    break;
                }
            }
        }
        info!(target: "listener", "event listener stopped");
    }
}

impl EventListener {
    pub(crate) fn spawn(
        source: Arc<dyn EventSource>,
        handler: RawEventHandler,
        sink: Arc<dyn EventSink>,
        interval: Duration,
    ) -> Result<Self, Error> {
        let cancel = Arc::new(AtomicBool::new(false));
        let polling = Arc::new(AtomicBool::new(true));

        let listener_loop = ListenerLoop {
            source,
            handler,
            sink,
            interval,
            cancel: cancel.clone(),
        };
        let handle = thread::Builder::new()
            .name("event-listener".to_string())
            .spawn({
                let guard = PollingGuard(polling.clone());
                move || {
                    let _guard = guard;
                    listener_loop.run();
                }
            })?;

        Ok(Self {
            cancel,
            polling,
            handle: Some(handle),
        })
    }

    /// Return true while the loop is alive.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    /// Ask the loop to stop, return immediately.
    pub fn request_stop(&self) {
        self.cancel.store(true, Ordering::SeqCst)
    }

    /// Stop the loop and wait for its thread.
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(target: "listener", "event listener thread panicked");
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.stop();
    }
}
