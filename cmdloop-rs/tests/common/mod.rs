//! A minimal dispatcher that records what it ran and where.

#![allow(dead_code)]

use cmdloop::message::ReportLog;
use cmdloop::{
    feed_lines, CollectReporter, ContextError, DispatchStatus, Dispatcher, ExecContext, ExecFlags,
    GenericSource, InterpState, Limits, LineSource, Pattern, ScriptFileSource, Teardown,
};

/// Commands:
///
/// | Line | Effect |
/// |------|--------|
/// | `try <pat>` / `catch` / `finally` / `endtry` | exception structure |
/// | `source <path>` | run a script file with `REPEAT` |
/// | `nest <n>` | re-enter `n` more times, one line each |
/// | `throw <kind> [msg]` | raise an exception |
/// | `error <msg>` | raise an error |
/// | `interrupt` | raise the interrupt flag |
/// | `throw-and-interrupt` | both, in that order |
/// | anything else | just recorded |
#[derive(Debug, Default)]
pub struct Recorder {
    /// Every executed line with the depth it ran at.
    pub seen: Vec<(String, usize)>,
    /// Results of nested invocations, innermost first.
    pub nested: Vec<Result<Teardown, ContextError>>,
}

impl Recorder {
    pub fn lines(&self) -> Vec<&str> {
        self.seen.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn max_depth(&self) -> usize {
        self.seen.iter().map(|&(_, d)| d).max().unwrap_or(0)
    }
}

impl Dispatcher for Recorder {
    fn dispatch(&mut self, line: &str, ctx: &mut ExecContext<'_>) -> DispatchStatus {
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        let exceptions = &mut ctx.state_mut().exceptions;
        match cmd {
            "try" => {
                exceptions.push_catch(Pattern::parse(arg).unwrap());
                return DispatchStatus::Ok;
            }
            "catch" => {
                exceptions.begin_catch().unwrap();
                return DispatchStatus::Ok;
            }
            "finally" => {
                exceptions.begin_finally().unwrap();
                return DispatchStatus::Ok;
            }
            "endtry" => {
                exceptions.end_try().unwrap();
                return DispatchStatus::Ok;
            }
            _ => {}
        }
        if !ctx.is_executing() {
            return DispatchStatus::Ok;
        }
        self.seen.push((line.to_owned(), ctx.depth()));

        match cmd {
            "source" => {
                let src = ScriptFileSource::open(arg).unwrap();
                let r = ctx.run_nested(Box::new(src), ExecFlags::REPEAT, self);
                self.nested.push(r);
            }
            "nest" => {
                let n: usize = arg.parse().unwrap();
                if n > 0 {
                    let next = GenericSource::once(format!("nest {}", n - 1));
                    let r = ctx.run_nested(Box::new(next), ExecFlags::empty(), self);
                    self.nested.push(r);
                }
            }
            "throw" => {
                let (kind, msg) = arg.split_once(' ').unwrap_or((arg, ""));
                ctx.throw(kind, msg);
            }
            "error" => {
                ctx.emsg(arg);
                return DispatchStatus::Failed;
            }
            "interrupt" => ctx.state().interrupt(),
            "throw-and-interrupt" => {
                ctx.throw("E1", "boom");
                ctx.state().interrupt();
            }
            _ => {}
        }
        DispatchStatus::Ok
    }
}

pub fn engine(limits: Limits) -> (InterpState, ReportLog) {
    let (reporter, log) = CollectReporter::with_log();
    (InterpState::new(limits).with_reporter(reporter), log)
}

pub fn feed(lines: &[&str]) -> Box<dyn LineSource> {
    Box::new(feed_lines("feed", lines.iter().map(|s| s.to_string()).collect()))
}
