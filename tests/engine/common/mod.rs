use haltpoint::config::EngineConfig;
use haltpoint::debugger::backend::scripted::ScriptedBackend;
use haltpoint::debugger::backend::{NativeRequest, TraceeId};
use haltpoint::debugger::event::{DebugEvent, EventEnvelope, EventSink};
use haltpoint::debugger::{Backend, DebugSession, LocationRequest};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Sink that keeps every emitted event.
#[derive(Clone, Default)]
pub struct TestSink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl TestSink {
    pub fn take(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    /// Wait until at least `count` events are collected, then take them.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<EventEnvelope> {
        let start = Instant::now();
        while self.events.lock().unwrap().len() < count && start.elapsed() < timeout {
            thread::sleep(Duration::from_millis(5));
        }
        self.take()
    }
}

impl EventSink for TestSink {
    fn emit(&self, event: DebugEvent, tracee: Option<TraceeId>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventEnvelope { event, tracee });
    }
}

pub struct TestSession {
    pub session: DebugSession,
    pub backend: Arc<ScriptedBackend>,
    pub sink: TestSink,
}

impl TestSession {
    pub fn new(config: EngineConfig) -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let sink = TestSink::default();
        let session = DebugSession::new(
            config,
            Backend::from_shared(backend.clone()),
            Arc::new(sink.clone()),
        );
        Self {
            session,
            backend,
            sink,
        }
    }

    /// Handle all queued backend events on the test thread.
    pub fn drain(&self) -> usize {
        self.session.process_events(Duration::ZERO).unwrap()
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

pub fn file_line(file: &str, line: u32) -> LocationRequest {
    LocationRequest::FileLine {
        file: Some(PathBuf::from(file)),
        line: Some(line),
    }
}

pub fn native_file_line(file: &str, line: u32) -> NativeRequest {
    NativeRequest::FileLine {
        file: PathBuf::from(file),
        line,
    }
}

#[macro_export]
macro_rules! assert_single_event {
    ($events: expr, $tracee: expr, $pattern: pat) => {{
        let events = $events;
        assert_eq!(events.len(), 1, "unexpected events: {events:?}");
        assert_eq!(events[0].tracee, $tracee);
        assert!(
            matches!(events[0].event, $pattern),
            "unexpected event: {:?}",
            events[0].event
        );
    }};
}
