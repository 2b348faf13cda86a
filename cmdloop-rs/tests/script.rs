mod common;

use std::path::{Path, PathBuf};

use cmdloop::{
    do_cmdline, feed_lines, BatchSource, ExecFlags, InterpState, Limits, LineSource, Report,
    ScriptDispatcher, ScriptFileSource, StopReason, Teardown,
};

use common::engine;

fn run(
    state: &mut InterpState,
    source: Box<dyn LineSource>,
    flags: ExecFlags,
) -> (ScriptDispatcher, Teardown) {
    let mut d = ScriptDispatcher::new();
    let t = do_cmdline(state, source, flags, &mut d).unwrap();
    (d, t)
}

fn program(text: &str) -> Box<dyn LineSource> {
    Box::new(BatchSource::from_program("prog", text))
}

fn lines(v: &[&str]) -> Box<dyn LineSource> {
    Box::new(feed_lines("typed", v.iter().map(|s| s.to_string()).collect()))
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ── Nested sources ────────────────────────────────────────────────────────────

#[test]
fn outer_file_catches_exception_thrown_in_sourced_file() {
    let dir = tempfile::tempdir().unwrap();
    let b = write(dir.path(), "b.cmd", "echo b1\nthrow E1 from-b\necho b2\n");
    let a = write(
        dir.path(),
        "a.cmd",
        &format!(
            "try E*\nsource {}\necho skipped\ncatch\n\
             echo caught %exception at %throwpoint\nendtry\necho done\n",
            b.display()
        ),
    );

    let (mut state, log) = engine(Limits::default());
    let src = Box::new(ScriptFileSource::open(&a).unwrap());
    let (d, t) = run(&mut state, src, ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(
        d.output,
        vec![
            "b1".to_owned(),
            format!("caught E1: from-b at {}, line 2", b.display()),
            "done".to_owned(),
        ]
    );
    assert!(log.borrow().is_empty());
    assert_eq!(state.exceptions.depth(), 0);
}

#[test]
fn error_in_sourced_file_is_caught_by_outer_try() {
    let dir = tempfile::tempdir().unwrap();
    let b = write(dir.path(), "b.cmd", "error disk full\necho b-after\n");
    let (mut state, log) = engine(Limits::default());
    let text = format!(
        "try error\nsource {}\ncatch\necho %exception_kind / %exception_message\nendtry",
        b.display()
    );
    let (d, t) = run(&mut state, program(&text), ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["error / disk full"]);
    assert!(log.borrow().is_empty());
    assert!(!state.error_flag());
}

#[test]
fn interrupt_in_sourced_file_stops_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let b = write(dir.path(), "b.cmd", "echo b1\ninterrupt\necho b2\n");
    let (mut state, log) = engine(Limits::default());
    let text = format!("source {}\necho a2", b.display());
    let (d, t) = run(&mut state, program(&text), ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Interrupted);
    assert_eq!(d.output, vec!["b1"]);
    assert_eq!(*log.borrow(), vec![Report::Interrupted]);
    assert!(!state.interrupted());
}

#[test]
fn missing_endtry_in_sourced_file_is_reported_and_caller_goes_on() {
    let dir = tempfile::tempdir().unwrap();
    let b = write(dir.path(), "b.cmd", "try\necho b\n");
    let (mut state, log) = engine(Limits::default());
    let text = format!("source {}\necho after", b.display());
    let (d, t) = run(&mut state, program(&text), ExecFlags::REPEAT | ExecFlags::VERBOSE);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["b", "after"]);
    assert_eq!(
        *log.borrow(),
        vec![Report::Error("missing endtry (last command \"echo b\")".into())]
    );
    assert_eq!(state.exceptions.depth(), 0);
}

#[test]
fn missing_source_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.cmd");
    let (mut state, log) = engine(Limits::default());
    let text = format!("source {}", missing.display());
    let (_, t) = run(&mut state, program(&text), ExecFlags::REPEAT);

    assert_eq!(t.failed, 1);
    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert!(matches!(&log[0], Report::Error(m) if m.starts_with("can't open file")));
}

#[test]
fn unterminated_function_in_sourced_file_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let b = write(dir.path(), "b.cmd", "function f\necho inside");
    let (mut state, log) = engine(Limits::default());
    let text = format!("source {}\necho after\nerror parent-error", b.display());
    let (d, t) = run(&mut state, program(&text), ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["after"]);
    assert!(!d.has_function("f"));
    assert_eq!(
        *log.borrow(),
        vec![
            Report::Error("missing endfunction".into()),
            Report::Error("parent-error".into()),
        ]
    );
}

// ── Functions ─────────────────────────────────────────────────────────────────

#[test]
fn runaway_recursion_hits_call_depth_limit_once() {
    let (mut state, log) = engine(Limits { max_recursion: 200, max_call_depth: 5 });
    let (d, t) = run(
        &mut state,
        program("function r\necho %1\ncall r x%1\nendfunction\ncall r 1"),
        ExecFlags::REPEAT,
    );

    // The program itself counts as one level.
    assert_eq!(d.output, vec!["1", "x1", "xx1", "xxx1"]);
    assert_eq!(
        *log.borrow(),
        vec![Report::Error("call depth exceeds max_call_depth (5)".into())]
    );
    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(state.call_depth(), 0);
    assert_eq!(state.recursion(), 0);
    assert_eq!(d.vars.scope_depth(), 0);
}

#[test]
fn uncaught_exception_in_function_stops_caller() {
    let (mut state, log) = engine(Limits::default());
    let (d, t) = run(
        &mut state,
        program("function f\nthrow E3 oops\nendfunction\ncall f\necho never"),
        ExecFlags::REPEAT,
    );

    assert_eq!(t.reason, StopReason::ExceptionPropagating);
    assert!(d.output.is_empty());
    assert_eq!(*log.borrow(), vec![Report::Error("Exception not caught: E3: oops".into())]);
    let point = t.exception.and_then(|e| e.throw_point).unwrap();
    assert_eq!(point.to_string(), "f, line 1");
}

#[test]
fn finally_in_function_runs_while_exception_leaves() {
    let (mut state, _log) = engine(Limits::default());
    let (d, t) = run(
        &mut state,
        program(
            "function f\ntry E9\nthrow E1 x\nfinally\necho cleanup\nendtry\nendfunction\n\
             try E1\ncall f\ncatch\necho handled %exception_kind\nendtry",
        ),
        ExecFlags::REPEAT,
    );

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["cleanup", "handled E1"]);
    assert_eq!(state.exceptions.depth(), 0);
}

// ── Flags ─────────────────────────────────────────────────────────────────────

#[test]
fn verbose_reports_name_the_command_at_every_level() {
    let (mut state, log) = engine(Limits::default());
    run(&mut state, program("bogus arg\nexec bogus"), ExecFlags::REPEAT | ExecFlags::VERBOSE);
    assert_eq!(
        *log.borrow(),
        vec![
            Report::Error(
                "Error detected while processing \"bogus arg\": not a command: bogus".into()
            ),
            Report::Error("Error detected while processing \"bogus\": not a command: bogus".into()),
        ]
    );
}

#[test]
fn again_reruns_the_kept_line() {
    let (mut state, _log) = engine(Limits::default());
    let (d, _) = run(
        &mut state,
        lines(&["echo hi", "again", "again"]),
        ExecFlags::REPEAT | ExecFlags::KEEPLINE,
    );
    assert_eq!(d.output, vec!["hi", "hi", "hi"]);
    assert_eq!(state.last_line.as_deref(), Some("echo hi"));
}

#[test]
fn again_without_history_fails() {
    let (mut state, log) = engine(Limits::default());
    run(&mut state, lines(&["again"]), ExecFlags::KEEPLINE);
    assert_eq!(*log.borrow(), vec![Report::Error("again: no previous command".into())]);
}

// ── Debugging ─────────────────────────────────────────────────────────────────

#[test]
fn debug_on_breaks_before_next_typed_line() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(Box::new(|| -> Box<dyn LineSource> {
        Box::new(feed_lines("debugger", vec!["echo from-debugger".into(), "cont".into()]))
    }));
    let (d, t) = run(&mut state, lines(&["debug on", "echo a", "echo b"]), ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["from-debugger", "a", "b"]);
    assert_eq!(*log.borrow(), vec![Report::Info(">>> echo a".into())]);
    assert!(!state.stepping());
}

#[test]
fn batch_programs_never_break_into_the_debugger() {
    let (mut state, log) = engine(Limits::default());
    state.set_debugger(Box::new(|| -> Box<dyn LineSource> {
        Box::new(feed_lines("debugger", vec!["quit".into()]))
    }));
    let (d, t) = run(&mut state, program("debug on\necho a"), ExecFlags::REPEAT);

    assert_eq!(t.reason, StopReason::Completed);
    assert_eq!(d.output, vec!["a"]);
    assert!(log.borrow().is_empty());
}
