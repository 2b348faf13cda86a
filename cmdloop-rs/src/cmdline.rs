//! The command-line loop.
//!
//! ```text
//! START ──► FETCH ──► DISPATCH ──► CHECK ──► CONTINUE ──► FETCH
//!             │                      │
//!             └── end of input ──────┴──► STOP
//! ```
//!
//! [`do_cmdline`] drives one invocation: it enters an
//! [`ExecContext`], pulls lines from its source, hands each to the
//! [`Dispatcher`], and asks [`classify`] whether to go on.  A dispatcher may
//! call back into [`do_cmdline`] (through [`ExecContext::run_nested`]) to
//! source a file or run a function body; the nested invocation finishes
//! before the outer one fetches again.
//!
//! ## Stop priority
//!
//! | Order | Signal | Result |
//! |-------|--------|--------|
//! | 1 | interrupt flag | [`StopReason::Interrupted`] |
//! | 2 | exception pending past this invocation's frames | [`StopReason::ExceptionPropagating`] |
//! | 3 | error flag without `REPEAT` | [`StopReason::Error`] |
//! | 4 | `REPEAT` | continue |
//! | - | otherwise | [`StopReason::Completed`] |

use std::fmt;

use tracing::{debug, trace};

use crate::context::{ContextError, ExecContext, ExecFlags};
use crate::debug::{debug_session, DebugAction};
use crate::exception::Exception;
use crate::source::LineSource;
use crate::state::InterpState;

// ── Dispatcher seam ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Ok,
    Failed,
}

/// Executes one command line.
///
/// Lines are handed over even while an exception is unwinding so that the
/// dispatcher can track `try` / `catch` / `finally` / `endtry`; anything
/// else should be skipped when [`ExecContext::is_executing`] is `false`.
pub trait Dispatcher {
    fn dispatch(&mut self, line: &str, ctx: &mut ExecContext<'_>) -> DispatchStatus;
}

impl<F> Dispatcher for F
where
    F: FnMut(&str, &mut ExecContext<'_>) -> DispatchStatus,
{
    fn dispatch(&mut self, line: &str, ctx: &mut ExecContext<'_>) -> DispatchStatus {
        self(line, ctx)
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source ran out, or a single line finished without `REPEAT`.
    Completed,
    Interrupted,
    /// An exception is pending that no frame of this invocation handles.
    ExceptionPropagating,
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::ExceptionPropagating => "exception propagating",
            Self::Error => "error",
        })
    }
}

/// The result of one pass through CHECK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Continue,
    Stop(StopReason),
}

/// Collapse the interrupt flag, the exception state and the error flag
/// into the next loop step.
pub fn classify(state: &InterpState, flags: ExecFlags, frame_base: usize) -> Iteration {
    if state.interrupted() {
        Iteration::Stop(StopReason::Interrupted)
    } else if state.exceptions.propagates_past(frame_base) {
        Iteration::Stop(StopReason::ExceptionPropagating)
    } else if state.error_flag() && !flags.contains(ExecFlags::REPEAT) {
        Iteration::Stop(StopReason::Error)
    } else if flags.contains(ExecFlags::REPEAT) {
        Iteration::Continue
    } else {
        Iteration::Stop(StopReason::Completed)
    }
}

/// What one invocation did, handed back to whoever started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub reason: StopReason,
    /// Lines handed to the dispatcher, skipped ones included.
    pub dispatched: usize,
    /// Lines the dispatcher reported as failed.
    pub failed: usize,
    /// Net change of the call depth across the invocation.  Always zero
    /// unless a dispatcher leaked a counter.
    pub call_depth_delta: isize,
    /// The exception still pending when the invocation stopped.
    pub exception: Option<Exception>,
}

impl Teardown {
    pub fn is_success(&self) -> bool {
        self.reason == StopReason::Completed
    }
}

// ── The loop ──────────────────────────────────────────────────────────────────

/// Run command lines from `source` until [`classify`] says stop.
///
/// Fails only when the invocation cannot start (nesting limits); the error
/// has already been recorded and reported through `state` by then.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(depth = state.recursion() + 1, flags = ?flags)
)]
pub fn do_cmdline<D: Dispatcher + ?Sized>(
    state: &mut InterpState,
    source: Box<dyn LineSource + '_>,
    flags: ExecFlags,
    dispatcher: &mut D,
) -> Result<Teardown, ContextError> {
    let outermost = state.recursion() == 0;
    if outermost {
        state.clear_error();
        // A ctrl-c at an idle prompt must not stop the next command.
        state.clear_interrupt();
    }

    let (reason, dispatched, failed, entry_call_depth, exception) = {
        let mut ctx = ExecContext::enter(&mut *state, source, flags)?;
        let mut reason = run(&mut ctx, dispatcher);
        ctx.close_frames();
        if reason == StopReason::Completed && ctx.state().exceptions.has_pending() {
            reason = StopReason::ExceptionPropagating;
        }
        let exception = ctx.state().exceptions.pending().cloned();
        if flags.contains(ExecFlags::EXCRESET) {
            // The snapshot restore would bury both.
            if reason == StopReason::Interrupted {
                ctx.state_mut().reporter_mut().interrupted();
            }
            if let Some(exc) = ctx.state_mut().exceptions.take_uncaught() {
                ctx.state_mut().reporter_mut().error(&format!("Exception not caught: {exc}"));
            }
        }
        (reason, ctx.dispatched(), ctx.failed(), ctx.entry_call_depth(), exception)
    };

    if outermost {
        if state.interrupted() {
            state.reporter_mut().interrupted();
            state.clear_interrupt();
        }
        if let Some(exc) = state.exceptions.take_uncaught() {
            state.reporter_mut().error(&format!("Exception not caught: {exc}"));
        }
    }

    let teardown = Teardown {
        reason,
        dispatched,
        failed,
        call_depth_delta: state.call_depth() as isize - entry_call_depth as isize,
        exception,
    };
    debug!(reason = %teardown.reason, dispatched, failed, "loop stopped");
    Ok(teardown)
}

/// FETCH → DISPATCH → CHECK until a stop.
fn run<D: Dispatcher + ?Sized>(ctx: &mut ExecContext<'_>, dispatcher: &mut D) -> StopReason {
    loop {
        let Some(line) = ctx.fetch() else {
            return StopReason::Completed;
        };
        trace!(%line, "fetched");

        if ctx.wants_debug_break()
            && debug_session(ctx.state_mut(), &line, dispatcher) == DebugAction::Quit
        {
            return StopReason::Interrupted;
        }

        let status = dispatcher.dispatch(&line, ctx);
        ctx.after_dispatch(status == DispatchStatus::Ok);

        match classify(ctx.state(), ctx.flags(), ctx.frame_base()) {
            Iteration::Continue => {}
            Iteration::Stop(reason) => return reason,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
