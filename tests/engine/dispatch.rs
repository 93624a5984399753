use crate::assert_single_event;
use crate::common::{file_line, native_file_line, TestSession};
use haltpoint::config::EngineConfig;
use haltpoint::debugger::backend::{
    ProcessControl, ProcessState, RawEvent, StopReason, Tracee, TraceeId,
};
use haltpoint::debugger::event::{DebugEvent, ExitReason};
use haltpoint::debugger::BreakpointRequest;
use std::time::Duration;

fn stop(tracees: Vec<Tracee>) -> TestSession {
    let t = TestSession::default();
    t.backend.push_stop(tracees);
    t.drain();
    t
}

#[test]
fn test_signal_stop() {
    let t = stop(vec![
        Tracee::new(5, StopReason::Signal, vec![11]),
        Tracee::new(3, StopReason::None, vec![]),
    ]);
    let events = t.sink.take();
    assert_single_event!(&events, Some(TraceeId(5)), DebugEvent::Exception { .. });
    let DebugEvent::Exception {
        signal,
        code,
        description,
    } = &events[0].event
    else {
        unreachable!()
    };
    assert_eq!(signal, "SIGSEGV");
    assert_eq!(*code, 11);
    assert_eq!(description, "Segmentation fault");
    assert_eq!(t.backend.selected_tracee(), Some(TraceeId(5)));
}

#[test]
fn test_sigstop_is_break() {
    let t = stop(vec![Tracee::new(5, StopReason::Signal, vec![19])]);
    assert_single_event!(t.sink.take(), Some(TraceeId(5)), DebugEvent::Break);
}

#[test]
fn test_silent_signal() {
    let t = TestSession::default();
    t.backend.silence_signal(10);
    t.backend
        .push_stop(vec![Tracee::new(2, StopReason::Signal, vec![10])]);
    t.drain();
    assert!(t.sink.take().is_empty());
    assert_eq!(t.backend.selected_tracee(), None);
}

#[test]
fn test_step_wins_over_breakpoint() {
    let t = TestSession::default();
    t.backend
        .define_locations(native_file_line("main.rs", 1), &[Some(0x1000)]);
    let id = t
        .session
        .breakpoints()
        .create(BreakpointRequest::new(file_line("main.rs", 1)));
    t.session.breakpoints().bind(id).unwrap();
    t.sink.take();

    t.backend.push_stop(vec![
        Tracee::new(1, StopReason::Breakpoint, vec![1, 1]),
        Tracee::new(2, StopReason::PlanComplete, vec![]),
    ]);
    t.drain();
    assert_single_event!(t.sink.take(), Some(TraceeId(2)), DebugEvent::StepComplete);
    // breakpoint thread was not reported, hit is not accounted
    let location = t.session.breakpoints().find_bound_location(1, 1).unwrap();
    assert_eq!(location.hit_count().unwrap(), 0);
}

#[test]
fn test_lowest_thread_reports_breakpoint() {
    let t = TestSession::default();
    t.backend
        .define_locations(native_file_line("main.rs", 1), &[Some(0x1000), Some(0x2000)]);
    let id = t
        .session
        .breakpoints()
        .create(BreakpointRequest::new(file_line("main.rs", 1)));
    t.session.breakpoints().bind(id).unwrap();
    t.sink.take();

    t.backend.push_stop(vec![
        Tracee::new(9, StopReason::Breakpoint, vec![1, 1]),
        Tracee::new(4, StopReason::Breakpoint, vec![1, 2, 1, 1]),
    ]);
    t.drain();
    let events = t.sink.take();
    assert_single_event!(&events, Some(TraceeId(4)), DebugEvent::Breakpoint { .. });
    let DebugEvent::Breakpoint { locations } = &events[0].event else {
        unreachable!()
    };
    let ids: Vec<_> = locations.iter().map(|l| l.id()).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[test]
fn test_unknown_breakpoint_is_break() {
    let t = stop(vec![Tracee::new(6, StopReason::Breakpoint, vec![42, 1])]);
    assert_single_event!(t.sink.take(), Some(TraceeId(6)), DebugEvent::Break);
}

#[test]
fn test_first_exec_skipped() {
    let t = TestSession::default();
    t.backend.push_stop(vec![Tracee::new(1, StopReason::Exec, vec![])]);
    t.drain();
    assert!(t.sink.take().is_empty());
    assert_eq!(t.backend.continue_count(), 1);

    t.backend.push_stop(vec![Tracee::new(1, StopReason::Exec, vec![])]);
    t.drain();
    assert_single_event!(t.sink.take(), Some(TraceeId(1)), DebugEvent::Break);
    assert_eq!(t.backend.continue_count(), 1);
}

#[test]
fn test_break_on_first_exec() {
    let t = TestSession::new(EngineConfig {
        break_on_first_exec: true,
        ..EngineConfig::default()
    });
    t.backend.push_stop(vec![Tracee::new(1, StopReason::Exec, vec![])]);
    t.drain();
    assert_single_event!(t.sink.take(), Some(TraceeId(1)), DebugEvent::Break);
    assert_eq!(t.backend.continue_count(), 0);
}

#[test]
fn test_fallback_uses_selected_thread() {
    let t = TestSession::default();
    t.backend.select_tracee(TraceeId(8));
    t.backend.push_stop(vec![
        Tracee::new(2, StopReason::None, vec![]),
        Tracee::new(8, StopReason::Trace, vec![]),
    ]);
    t.drain();
    assert_single_event!(t.sink.take(), Some(TraceeId(8)), DebugEvent::Break);

    let t = stop(vec![
        Tracee::new(3, StopReason::None, vec![]),
        Tracee::new(2, StopReason::None, vec![]),
    ]);
    assert_single_event!(t.sink.take(), Some(TraceeId(3)), DebugEvent::Break);
}

#[test]
fn test_stop_without_threads() {
    let t = stop(vec![]);
    assert!(t.sink.take().is_empty());
}

#[test]
fn test_restarted_stop_is_silent() {
    let t = TestSession::default();
    t.backend.push_event(RawEvent::StateChanged {
        state: ProcessState::Stopped,
        restarted: true,
    });
    t.backend.push_event(RawEvent::StateChanged {
        state: ProcessState::Running,
        restarted: false,
    });
    t.backend.push_event(RawEvent::Interrupt);
    t.backend
        .push_event(RawEvent::StructuredData("{\"type\":\"progress\"}".to_string()));
    assert_eq!(t.drain(), 4);
    assert!(t.sink.take().is_empty());
}

#[test]
fn test_exit_reasons() {
    let t = TestSession::default();
    t.backend.exit();
    t.drain();
    assert_single_event!(
        t.sink.take(),
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::ProcessExited
        }
    );

    let t = TestSession::default();
    t.session.request_terminate();
    t.backend.exit();
    t.drain();
    assert_single_event!(
        t.sink.take(),
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::DebuggerTerminated
        }
    );

    let t = TestSession::default();
    t.backend.detach();
    t.drain();
    assert_single_event!(
        t.sink.take(),
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::ProcessDetached
        }
    );

    let t = TestSession::default();
    t.session.request_detach();
    t.backend.detach();
    t.drain();
    assert_single_event!(
        t.sink.take(),
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::DebuggerDetached
        }
    );
}

#[test]
fn test_backend_failure_reported_on_drain() {
    let t = TestSession::default();
    t.backend.push_failure("pipe closed");

    let err = t.session.process_events(Duration::ZERO).unwrap_err();
    assert!(err.is_fatal());
    let events = t.sink.take();
    assert_single_event!(
        &events,
        None,
        DebugEvent::ProgramDestroy {
            reason: ExitReason::Error(_)
        }
    );
    assert!(events[0].event.to_string().contains("pipe closed"));
}
