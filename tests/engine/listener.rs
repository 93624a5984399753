use crate::assert_single_event;
use crate::common::{file_line, native_file_line, TestSession};
use haltpoint::config::EngineConfig;
use haltpoint::debugger::backend::scripted::ScriptedBackend;
use haltpoint::debugger::backend::TraceeId;
use haltpoint::debugger::event::{DebugEvent, EventSink, ExitReason};
use haltpoint::debugger::{Backend, BreakpointRequest, DebugSession, Error};
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn fast_session() -> TestSession {
    TestSession::new(EngineConfig {
        listener_interval_ms: 20,
        ..EngineConfig::default()
    })
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > WAIT {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
#[serial]
fn test_listener_dispatches_hits() {
    let mut t = fast_session();
    t.backend
        .define_locations(native_file_line("main.rs", 2), &[Some(0x1000)]);
    let id = t
        .session
        .breakpoints()
        .create(BreakpointRequest::new(file_line("main.rs", 2)));
    t.session.breakpoints().bind(id).unwrap();
    t.sink.take();

    t.session.start_listener().unwrap();
    assert!(t.session.is_listener_polling());

    assert!(t.backend.hit(1, 1, 12));
    assert_single_event!(
        t.sink.wait_for(1, WAIT),
        Some(TraceeId(12)),
        DebugEvent::Breakpoint { .. }
    );

    t.backend.add_location(1, Some(0x2000));
    t.backend.breakpoint_changed(1);
    assert_single_event!(
        t.sink.wait_for(1, WAIT),
        None,
        DebugEvent::BreakpointBound { .. }
    );

    t.session.stop_listener();
    assert!(!t.session.is_listener_polling());
}

#[test]
#[serial]
fn test_listener_single_instance() {
    let mut t = fast_session();
    t.session.start_listener().unwrap();
    assert!(matches!(
        t.session.start_listener(),
        Err(Error::ListenerAlreadyRunning)
    ));
    assert!(matches!(
        t.session.process_events(Duration::ZERO),
        Err(Error::ListenerAlreadyRunning)
    ));

    t.session.stop_listener();
    t.session.start_listener().unwrap();
    t.session.stop_listener();
}

#[test]
#[serial]
fn test_stop_is_bounded_by_interval() {
    let mut t = fast_session();
    t.session.start_listener().unwrap();
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    t.session.stop_listener();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(t.sink.take().is_empty());
}

#[test]
#[serial]
fn test_backend_failure_ends_session() {
    let mut t = fast_session();
    t.session.start_listener().unwrap();
    t.backend.push_failure("connection reset");

    assert_single_event!(
        t.sink.wait_for(1, WAIT),
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::Error(_)
        }
    );
    assert!(wait_until(|| !t.session.is_listener_polling()));

    // dead listener doesn't block a new one
    t.session.start_listener().unwrap();
    assert!(t.session.is_listener_polling());
    t.session.stop_listener();
}

#[test]
#[serial]
fn test_process_exit_through_listener() {
    let mut t = fast_session();
    t.session.start_listener().unwrap();
    t.session.request_terminate();
    t.backend.exit();

    let events = t.sink.wait_for(1, WAIT);
    assert_single_event!(
        &events,
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::DebuggerTerminated
        }
    );
    assert_eq!(
        events[0].event.to_string(),
        "program destroyed: debugger terminated"
    );
    t.session.stop_listener();
}

/// Sink that fails on the end of the debuggee.
struct FailingSink;

impl EventSink for FailingSink {
    fn emit(&self, event: DebugEvent, _: Option<TraceeId>) {
        if let DebugEvent::ProgramDestroy { .. } = event {
            panic!("sink is broken");
        }
    }
}

#[test]
#[serial]
fn test_listener_panic_releases_session() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut session = DebugSession::new(
        EngineConfig {
            listener_interval_ms: 20,
            ..EngineConfig::default()
        },
        Backend::from_shared(backend.clone()),
        Arc::new(FailingSink),
    );
    session.start_listener().unwrap();
    backend.exit();

    assert!(wait_until(|| !session.is_listener_polling()));
    assert_eq!(session.process_events(Duration::ZERO).unwrap(), 0);
    session.start_listener().unwrap();
    assert!(session.is_listener_polling());
    session.stop_listener();
}
