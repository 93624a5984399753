mod common;

mod dispatch;
mod listener;
mod watchpoints;

use crate::common::{file_line, native_file_line, TestSession};
use haltpoint::debugger::backend::TraceeId;
use haltpoint::debugger::event::DebugEvent;
use haltpoint::debugger::{BreakpointRequest, RegistryStats};

#[test]
fn test_session_drop_deletes_breakpoints() {
    let TestSession {
        session,
        backend,
        sink,
    } = TestSession::default();
    backend.define_locations(native_file_line("main.rs", 3), &[Some(0x1000)]);
    let id = session
        .breakpoints()
        .create(BreakpointRequest::new(file_line("main.rs", 3)));
    session.breakpoints().bind(id).unwrap();
    assert_eq!(
        session.stats(),
        RegistryStats {
            breakpoints: 1,
            watchpoints: 0,
            bound_locations: 1,
        }
    );

    drop(session);
    assert!(backend.breakpoint(1).unwrap().is_deleted());
    assert!(!backend.hit(1, 1, 1));
    let events = sink.take();
    assert!(matches!(events[0].event, DebugEvent::BreakpointBound { .. }));
    assert_eq!(events.len(), 1);
}

#[test]
fn test_breakpoint_hit_end_to_end() {
    let t = TestSession::default();
    t.backend
        .define_locations(native_file_line("main.rs", 8), &[Some(0x1000)]);
    let id = t
        .session
        .breakpoints()
        .create(BreakpointRequest::new(file_line("main.rs", 8)));
    t.session.breakpoints().bind(id).unwrap();
    t.sink.take();

    assert!(t.backend.hit(1, 1, 42));
    assert_eq!(t.drain(), 1);

    let events = t.sink.take();
    assert_single_event!(&events, Some(TraceeId(42)), DebugEvent::Breakpoint { .. });
    let DebugEvent::Breakpoint { locations } = &events[0].event else {
        unreachable!()
    };
    assert_eq!(locations[0].owner(), id);
    assert_eq!(locations[0].hit_count().unwrap(), 1);
}
