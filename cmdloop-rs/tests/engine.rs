mod common;

use std::io::Write;

use cmdloop::{
    do_cmdline, feed_lines, ContextError, ExecFlags, Limits, LineSource, Report, StopReason,
};

use common::{engine, feed, Recorder};

// ── Balance ───────────────────────────────────────────────────────────────────

#[test]
fn guards_balance_after_mixed_exits() {
    let (mut state, _log) = engine(Limits::default());
    let mut r = Recorder::default();
    let programs: [&[&str]; 4] = [
        &["nest 6", "note"],
        &["nest 2", "error bad", "note"],
        &["try X", "throw E1 x", "endtry"],
        &["interrupt", "never"],
    ];
    for program in programs {
        let t = do_cmdline(&mut state, feed(program), ExecFlags::REPEAT, &mut r).unwrap();
        assert_eq!(t.call_depth_delta, 0);
        assert_eq!(state.recursion(), 0);
        assert_eq!(state.call_depth(), 0);
        assert_eq!(state.exceptions.depth(), 0);
        assert!(state.messages().is_empty());
        assert!(!state.interrupted());
    }
    assert_eq!(r.max_depth(), 7);
}

// ── REPEAT ────────────────────────────────────────────────────────────────────

#[test]
fn repeat_dispatches_every_line_then_completes() {
    let (mut state, _log) = engine(Limits::default());
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["a", "b", "c", "d"]), ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(t.dispatched, 4);
    assert_eq!(r.lines(), vec!["a", "b", "c", "d"]);
}

#[test]
fn without_repeat_only_one_line_runs() {
    let (mut state, _log) = engine(Limits::default());
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["a", "b", "c"]), ExecFlags::empty(), &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(t.dispatched, 1);
    assert_eq!(r.lines(), vec!["a"]);
}

#[test]
fn repeat_keeps_going_after_errors() {
    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let program = feed(&["error one", "b", "error two"]);
    let t = do_cmdline(&mut state, program, ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(t.failed, 2);
    assert_eq!(
        *log.borrow(),
        vec![Report::Error("one".into()), Report::Error("two".into())]
    );
}

// ── Interrupt priority ────────────────────────────────────────────────────────

#[test]
fn interrupt_wins_over_pending_exception_which_is_kept() {
    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let program = feed(&["throw-and-interrupt", "never"]);
    let t = do_cmdline(&mut state, program, ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Interrupted);
    let exc = t.exception.expect("exception preserved");
    assert_eq!(exc.kind, "E1");
    assert_eq!(exc.message, "boom");
    assert_eq!(
        *log.borrow(),
        vec![Report::Interrupted, Report::Error("Exception not caught: E1: boom".into())]
    );
    assert!(!state.interrupted());
    assert!(!state.exceptions.has_pending());
}

#[test]
fn interrupt_in_nested_invocation_stops_every_level() {
    let dir = tempfile::tempdir().unwrap();
    let inner = dir.path().join("inner.cmd");
    std::fs::write(&inner, "one\ninterrupt\ntwo\n").unwrap();

    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let src = format!("source {}", inner.display());
    let t = do_cmdline(&mut state, feed(&[&src, "after"]), ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Interrupted);
    assert_eq!(r.lines(), vec![src.as_str(), "one", "interrupt"]);
    assert_eq!(r.nested[0].as_ref().unwrap().reason, StopReason::Interrupted);
    assert_eq!(*log.borrow(), vec![Report::Interrupted]);
}

// ── Recursion limit ───────────────────────────────────────────────────────────

#[test]
fn recursion_limit_refuses_the_next_context() {
    let (mut state, log) = engine(Limits { max_recursion: 3, max_call_depth: 100 });
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["nest 10"]), ExecFlags::empty(), &mut r).unwrap();

    // Three contexts ran one line each; the fourth dispatched nothing.
    assert_eq!(r.lines(), vec!["nest 10", "nest 9", "nest 8"]);
    assert_eq!(r.max_depth(), 3);
    assert_eq!(r.nested[0], Err(ContextError::RecursionLimitExceeded { limit: 3 }));
    assert_eq!(t.reason, StopReason::Error);
    assert_eq!(
        *log.borrow(),
        vec![Report::Error("command too recursive (limit 3)".into())]
    );
    assert_eq!(state.recursion(), 0);
    assert_eq!(state.call_depth(), 0);
}

#[test]
fn call_depth_limit_counts_scripted_sources() {
    let (mut state, _log) = engine(Limits { max_recursion: 100, max_call_depth: 2 });
    let mut r = Recorder::default();
    do_cmdline(&mut state, feed(&["nest 5"]), ExecFlags::empty(), &mut r).unwrap();
    assert_eq!(r.max_depth(), 2);
    assert_eq!(r.nested[0], Err(ContextError::CallDepthExceeded { limit: 2 }));
}

#[test]
fn outermost_refusal_is_an_error() {
    let (mut state, log) = engine(Limits { max_recursion: 0, max_call_depth: 0 });
    let mut r = Recorder::default();
    let err = do_cmdline(&mut state, feed(&["x"]), ExecFlags::REPEAT, &mut r).unwrap_err();
    assert_eq!(err, ContextError::RecursionLimitExceeded { limit: 0 });
    assert!(r.seen.is_empty());
    assert!(state.error_flag());
    // Nothing was flushed: no context existed to report through.
    assert!(log.borrow().is_empty());
    assert_eq!(state.messages().len(), 1);
}

// ── Catch / rethrow ───────────────────────────────────────────────────────────

#[test]
fn matching_catch_stops_propagation() {
    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let t = do_cmdline(
        &mut state,
        feed(&["try E*", "throw E1 x", "skipped", "catch", "handled", "endtry", "after"]),
        ExecFlags::REPEAT,
        &mut r,
    )
    .unwrap();
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(r.lines(), vec!["throw E1 x", "handled", "after"]);
    assert_eq!(state.exceptions.last_caught().map(|e| e.kind.as_str()), Some("E1"));
    assert!(log.borrow().is_empty());
}

#[test]
fn unmatched_throw_aborts_at_next_check_after_frame_closes() {
    let (mut state, _log) = engine(Limits::default());
    let mut r = Recorder::default();
    let t = do_cmdline(
        &mut state,
        feed(&["try X", "throw E1 x", "skipped", "finally", "cleanup", "endtry", "never"]),
        ExecFlags::REPEAT,
        &mut r,
    )
    .unwrap();
    assert_eq!(t.reason, StopReason::ExceptionPropagating);
    assert_eq!(t.dispatched, 6);
    assert_eq!(r.lines(), vec!["throw E1 x", "cleanup"]);
    assert_eq!(t.exception.map(|e| e.kind), Some("E1".to_owned()));
}

#[test]
fn error_inside_try_becomes_exception() {
    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let t = do_cmdline(
        &mut state,
        feed(&["try error", "error disk full", "skipped", "catch", "handled", "endtry"]),
        ExecFlags::REPEAT,
        &mut r,
    )
    .unwrap();
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(r.lines(), vec!["error disk full", "handled"]);
    let caught = state.exceptions.last_caught().unwrap();
    assert_eq!(caught.message, "disk full");
    assert_eq!(caught.throw_point.as_ref().map(|p| p.line), Some(2));
    assert!(!state.error_flag());
    assert!(log.borrow().is_empty());
}

// ── End to end ────────────────────────────────────────────────────────────────

#[test]
fn uncaught_exception_leaves_nested_source_and_stops_caller() {
    let dir = tempfile::tempdir().unwrap();
    let b = dir.path().join("b.cmd");
    let mut f = std::fs::File::create(&b).unwrap();
    writeln!(f, "first").unwrap();
    writeln!(f, "throw E1 from b").unwrap();
    drop(f);

    let a = dir.path().join("a.cmd");
    std::fs::write(&a, format!("source {}\nnot reached\n", b.display())).unwrap();

    let (mut state, log) = engine(Limits::default());
    let mut r = Recorder::default();
    let src: Box<dyn LineSource> = Box::new(cmdloop::ScriptFileSource::open(&a).unwrap());
    let t = do_cmdline(&mut state, src, ExecFlags::REPEAT, &mut r).unwrap();

    // B ran both lines and stopped propagating.
    let inner = r.nested[0].as_ref().unwrap();
    assert_eq!(inner.dispatched, 2);
    assert_eq!(inner.reason, StopReason::ExceptionPropagating);
    assert_eq!(inner.exception.as_ref().map(|e| e.kind.as_str()), Some("E1"));

    // A stopped right after the source line.
    assert_eq!(t.reason, StopReason::ExceptionPropagating);
    assert_eq!(t.dispatched, 1);
    assert!(!r.lines().contains(&"not reached"));

    assert_eq!(
        *log.borrow(),
        vec![Report::Error("Exception not caught: E1: from b".into())]
    );
    let point = t.exception.and_then(|e| e.throw_point).unwrap();
    assert_eq!(point.line, 2);
    assert!(point.source.ends_with("b.cmd"));
}

// ── Debug sessions ────────────────────────────────────────────────────────────

fn scripted_debugger(lines: &'static [&'static str]) -> cmdloop::state::DebuggerFactory {
    Box::new(move || -> Box<dyn LineSource> {
        Box::new(feed_lines("debugger", lines.iter().map(|s| s.to_string()).collect()))
    })
}

#[test]
fn stepping_breaks_into_debugger_and_cont_resumes() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(scripted_debugger(&["inspect", "cont"]));
    state.set_stepping(true);
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["a", "b"]), ExecFlags::REPEAT, &mut r).unwrap();

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(r.seen, vec![("inspect".to_owned(), 2), ("a".to_owned(), 1), ("b".to_owned(), 1)]);
    assert!(!state.stepping());
    assert_eq!(state.snapshot_depth(), 0);
    assert_eq!(*log.borrow(), vec![Report::Info(">>> a".into())]);
}

#[test]
fn step_breaks_before_every_line() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(scripted_debugger(&["step"]));
    state.set_stepping(true);
    let mut r = Recorder::default();
    do_cmdline(&mut state, feed(&["a", "b"]), ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![Report::Info(">>> a".into()), Report::Info(">>> b".into())]
    );
    assert!(state.stepping());
}

#[test]
fn quit_from_debugger_interrupts() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(scripted_debugger(&["quit"]));
    state.set_stepping(true);
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["a", "b"]), ExecFlags::REPEAT, &mut r).unwrap();
    assert_eq!(t.reason, StopReason::Interrupted);
    assert_eq!(t.dispatched, 0);
    assert!(r.seen.is_empty());
    assert!(!state.interrupted());
    assert_eq!(*log.borrow(), vec![Report::Info(">>> a".into()), Report::Interrupted]);
}

#[test]
fn debugger_cannot_disturb_the_interrupted_exception_environment() {
    let (mut state, log) = engine(Limits::default());
    // First break steps over `try`; the second, inside the try, throws.
    let mut sessions = vec![vec!["step"], vec!["throw E2 dbg"]].into_iter();
    state.set_debugger(Box::new(move || -> Box<dyn LineSource> {
        let lines = sessions.next().unwrap_or_default();
        Box::new(feed_lines("debugger", lines.into_iter().map(String::from).collect()))
    }));
    state.set_stepping(true);
    let mut r = Recorder::default();
    let t = do_cmdline(
        &mut state,
        feed(&["try E*", "work", "endtry"]),
        ExecFlags::REPEAT,
        &mut r,
    )
    .unwrap();

    // The open `try E*` never saw E2.
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(r.lines(), vec!["throw E2 dbg", "work"]);
    assert_eq!(
        *log.borrow(),
        vec![
            Report::Info(">>> try E*".into()),
            Report::Info(">>> work".into()),
            Report::Error("Exception not caught: E2: dbg".into()),
        ]
    );
    assert_eq!(state.exceptions.depth(), 0);
    assert!(state.exceptions.last_caught().is_none());
    assert_eq!(state.snapshot_depth(), 0);
}

#[test]
fn interrupt_in_debugger_reports_its_exception_before_the_restore() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(scripted_debugger(&["throw-and-interrupt"]));
    state.set_stepping(true);
    let mut r = Recorder::default();
    let t = do_cmdline(&mut state, feed(&["a", "b"]), ExecFlags::REPEAT, &mut r).unwrap();

    // Both belong to the debugger's invocation; the interrupted line runs on.
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(r.lines(), vec!["throw-and-interrupt", "a", "b"]);
    assert_eq!(
        *log.borrow(),
        vec![
            Report::Info(">>> a".into()),
            Report::Interrupted,
            Report::Error("Exception not caught: E1: boom".into()),
        ]
    );
    assert!(!state.interrupted());
    assert!(!state.exceptions.has_pending());
    assert_eq!(state.snapshot_depth(), 0);
}
