use crate::assert_single_event;
use crate::common::TestSession;
use haltpoint::debugger::backend::TraceeId;
use haltpoint::debugger::event::DebugEvent;
use haltpoint::debugger::{
    BreakpointErrorKind, BreakpointRequest, BreakpointState, Error, LocationRequest, PassCount,
    PassCountStyle,
};

fn data(address: u64, size: u32) -> BreakpointRequest {
    BreakpointRequest::new(LocationRequest::Data { address, size })
}

#[test]
fn test_watchpoint_hit() {
    let t = TestSession::default();
    let id = t.session.breakpoints().create(data(0x7ffd_1000, 8));
    t.session.breakpoints().bind(id).unwrap();
    assert_single_event!(t.sink.take(), None, DebugEvent::BreakpointBound { .. });
    assert_eq!(t.session.stats().watchpoints, 1);

    assert!(t.backend.hit_watchpoint(1, 77));
    t.drain();
    let events = t.sink.take();
    assert_single_event!(&events, Some(TraceeId(77)), DebugEvent::Breakpoint { .. });
    let DebugEvent::Breakpoint { locations } = &events[0].event else {
        unreachable!()
    };
    assert_eq!(locations[0].owner(), id);
    assert_eq!(locations[0].hit_count().unwrap(), 1);
}

#[test]
fn test_watchpoint_pass_count() {
    let t = TestSession::default();
    let id = t
        .session
        .breakpoints()
        .create(data(0x10, 4).with_pass_count(PassCount::new(PassCountStyle::EqualOrGreater, 2)));
    t.session.breakpoints().bind(id).unwrap();

    assert!(!t.backend.hit_watchpoint(1, 1));
    assert!(t.backend.hit_watchpoint(1, 1));
    t.drain();
    assert!(t.backend.hit_watchpoint(1, 1));
}

#[test]
fn test_backend_refuses_watchpoint() {
    let t = TestSession::default();
    t.backend.fail_watchpoint(0x20, "unaligned watchpoint address");
    let id = t.session.breakpoints().create(data(0x20, 3));

    let err = t.session.breakpoints().bind(id).unwrap_err();
    assert_eq!(err.to_string(), "unaligned watchpoint address");
    let report = t.session.breakpoints().last_error(id).unwrap().unwrap();
    assert_eq!(report.kind, BreakpointErrorKind::Unbound);
    assert_eq!(report.message, "unaligned watchpoint address");
}

#[test]
fn test_shared_watchpoint_lifetime() {
    let t = TestSession::default();
    let first = t.session.breakpoints().create(data(0x40, 4));
    let second = t.session.breakpoints().create(data(0x40, 4));
    t.session.breakpoints().bind(first).unwrap();
    t.session.breakpoints().bind(second).unwrap();
    assert_eq!(t.session.breakpoints().backend_id(first).unwrap(), Some(1));
    assert_eq!(t.session.breakpoints().backend_id(second).unwrap(), Some(1));

    t.session.breakpoints().delete(first).unwrap();
    assert!(!t.backend.watchpoint(1).unwrap().is_deleted());
    let location = t.session.breakpoints().find_watchpoint_location(1).unwrap();
    assert_eq!(location.owner(), second);

    // repeated delete is fine for watchpoints
    t.session.breakpoints().delete(first).unwrap();
    assert_eq!(t.session.breakpoints().state(first).unwrap(), BreakpointState::Deleted);

    t.session.breakpoints().delete(second).unwrap();
    assert!(t.backend.watchpoint(1).unwrap().is_deleted());
    assert!(t.session.breakpoints().find_watchpoint_location(1).is_none());
    assert!(matches!(
        t.session.breakpoints().enable(second, true),
        Err(Error::Deleted)
    ));
}

#[test]
fn test_shared_watchpoint_enable_state() {
    let t = TestSession::default();
    let first = t.session.breakpoints().create(data(0x50, 4));
    let second = t.session.breakpoints().create(data(0x50, 4));
    t.session.breakpoints().bind(first).unwrap();
    t.session.breakpoints().bind(second).unwrap();

    t.session.breakpoints().enable(first, false).unwrap();
    assert!(!t.backend.watchpoint(1).unwrap().is_enabled());
    t.session.breakpoints().enable(second, true).unwrap();
    assert!(t.backend.watchpoint(1).unwrap().is_enabled());

    t.session.breakpoints().enable(first, false).unwrap();
    t.session.breakpoints().delete(first).unwrap();
    // remaining owner settings are restored in the backend
    assert!(t.backend.watchpoint(1).unwrap().is_enabled());
    assert_eq!(t.session.breakpoints().state(second).unwrap(), BreakpointState::Enabled);
    t.session.breakpoints().enable(second, true).unwrap();
    assert!(t.backend.watchpoint(1).unwrap().is_enabled());

    assert!(t.backend.hit_watchpoint(1, 9));
    t.drain();
    let events = t.sink.take();
    assert_single_event!(&events, Some(TraceeId(9)), DebugEvent::Breakpoint { .. });
}
