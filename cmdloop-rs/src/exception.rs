//! Structured exceptions and the catch-frame registry.
//!
//! The [`ExceptionStack`] is shared by every nesting level of the command
//! loop.  Frames are pushed by `try`, advanced by `catch` / `finally`, and
//! popped by `endtry`; the loop consults [`ExceptionStack::is_executing`] to
//! decide whether a fetched line runs or is skipped while unwinding, and
//! [`ExceptionStack::propagates_past`] to decide whether a pending exception
//! must leave the current invocation.
//!
//! ## Pending states
//!
//! | State | Meaning |
//! |-------|---------|
//! | none | normal execution |
//! | unwind to *d* | frame *d* caught the exception; skip to its `catch` |
//! | abort | nothing matched; `force_abort` + `need_rethrow`, exception in `current` |
//!
//! A `finally` section parks whatever is pending, runs, and `endtry` puts the
//! parked state back unless the section raised something new.

use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::pattern::Pattern;

// ── Exception record ──────────────────────────────────────────────────────────

/// Where an exception was raised: the source label and its 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrowPoint {
    pub source: String,
    pub line: usize,
}

impl fmt::Display for ThrowPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, line {}", self.source, self.line)
    }
}

/// An in-flight or caught exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    pub throw_point: Option<ThrowPoint>,
}

impl Exception {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            throw_point: None,
        }
    }

    /// Attach a throw point.
    pub fn at(mut self, point: Option<ThrowPoint>) -> Self {
        self.throw_point = point;
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Result of [`ExceptionStack::throw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowOutcome {
    /// The frame at `depth` caught it; lines are skipped up to its `catch`.
    Caught { depth: usize },
    /// No frame matched; abort is set and the exception leaves every
    /// invocation that has no frame left to unwind.
    Propagating,
}

/// Structural misuse of `try` / `catch` / `finally` / `endtry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionError {
    #[error("catch without try")]
    CatchWithoutTry,
    #[error("finally without try")]
    FinallyWithoutTry,
    #[error("endtry without try")]
    EndtryWithoutTry,
    #[error("catch after finally")]
    CatchAfterFinally,
    #[error("multiple catch clauses")]
    MultipleCatch,
    #[error("multiple finally clauses")]
    MultipleFinally,
}

// ── Catch frames ──────────────────────────────────────────────────────────────

/// Which clause of a `try` block the frame is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Try,
    Catch,
    Finally,
}

/// Pending state parked while a `finally` section runs.
#[derive(Debug, Clone)]
struct Parked {
    current: Option<Exception>,
    force_abort: bool,
    need_rethrow: bool,
    unwind_to: Option<usize>,
}

/// One `try` block.
#[derive(Debug, Clone)]
pub struct CatchFrame {
    pattern: Pattern,
    section: Section,
    /// The `try` line itself executed (was not skipped).
    entered: bool,
    caught: Option<Exception>,
    /// The catch section is running the handler for `caught`.
    handled: bool,
    parked: Option<Parked>,
}

impl CatchFrame {
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn caught(&self) -> Option<&Exception> {
        self.caught.as_ref()
    }
}

// ── ExceptionStack ────────────────────────────────────────────────────────────

/// Catch frames (innermost last) plus the abort / rethrow flags.
#[derive(Debug, Default, Clone)]
pub struct ExceptionStack {
    frames: Vec<CatchFrame>,
    current: Option<Exception>,
    force_abort: bool,
    need_rethrow: bool,
    unwind_to: Option<usize>,
    last_caught: Option<Exception>,
}

impl ExceptionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[CatchFrame] {
        &self.frames
    }

    pub fn force_abort(&self) -> bool {
        self.force_abort
    }

    pub fn need_rethrow(&self) -> bool {
        self.need_rethrow
    }

    /// The uncaught exception in flight, if any.
    pub fn current(&self) -> Option<&Exception> {
        self.current.as_ref()
    }

    /// The exception most recently handed to a `catch` section.
    pub fn last_caught(&self) -> Option<&Exception> {
        self.last_caught.as_ref()
    }

    /// `true` while an exception is unwinding or aborting.
    pub fn has_pending(&self) -> bool {
        self.force_abort || self.unwind_to.is_some()
    }

    /// The pending exception: the aborting one, or the one a frame caught
    /// but has not reached the handler for yet.
    pub fn pending(&self) -> Option<&Exception> {
        if self.force_abort {
            return self.current.as_ref();
        }
        self.unwind_to
            .and_then(|d| self.frames.get(d))
            .and_then(|f| f.caught.as_ref())
    }

    /// `true` when some executed `try` is still open, so errors should be
    /// promoted to exceptions rather than reported.
    pub fn in_try(&self) -> bool {
        self.frames.iter().any(|f| f.entered)
    }

    /// Whether the line about to be dispatched runs or is skipped.
    pub fn is_executing(&self) -> bool {
        let pending = self.has_pending();
        let Some(top) = self.frames.last() else { return !pending };
        if !top.entered {
            return false;
        }
        match top.section {
            Section::Try | Section::Finally => !pending,
            Section::Catch => top.handled && !pending,
        }
    }

    /// `true` when a pending exception has to leave an invocation whose own
    /// frames start at `base`: no frame of that invocation is left to run a
    /// handler or `finally` section.
    pub fn propagates_past(&self, base: usize) -> bool {
        self.frames.len() <= base && self.has_pending()
    }

    // ── Frame operations ──────────────────────────────────────────────────────

    /// Install a catch frame for a `try`.  Returns its depth.
    pub fn push_catch(&mut self, pattern: Pattern) -> usize {
        let entered = self.is_executing();
        trace!(depth = self.frames.len(), pattern = %pattern, entered, "push catch frame");
        self.frames.push(CatchFrame {
            pattern,
            section: Section::Try,
            entered,
            caught: None,
            handled: false,
            parked: None,
        });
        self.frames.len() - 1
    }

    /// Raise `exc`.  The innermost executed frame still in its try section
    /// whose pattern matches the kind catches it; otherwise abort is set.
    pub fn throw(&mut self, exc: Exception) -> ThrowOutcome {
        let target = self.frames.iter().rposition(|f| {
            f.entered
                && f.section == Section::Try
                && f.caught.is_none()
                && f.pattern.matches(&exc.kind)
        });
        match target {
            Some(depth) => {
                debug!(kind = %exc.kind, depth, "exception will be caught");
                self.frames[depth].caught = Some(exc);
                self.unwind_to = Some(depth);
                self.current = None;
                self.force_abort = false;
                self.need_rethrow = false;
                ThrowOutcome::Caught { depth }
            }
            None => {
                debug!(kind = %exc.kind, "exception not caught, aborting");
                self.current = Some(exc);
                self.unwind_to = None;
                self.force_abort = true;
                self.need_rethrow = true;
                ThrowOutcome::Propagating
            }
        }
    }

    /// Enter the catch section of the innermost frame.  Returns `true` when
    /// the handler runs, which also clears the pending state.
    pub fn begin_catch(&mut self) -> Result<bool, ExceptionError> {
        let depth = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or(ExceptionError::CatchWithoutTry)?;
        let frame = &mut self.frames[depth];
        match frame.section {
            Section::Finally => return Err(ExceptionError::CatchAfterFinally),
            Section::Catch => return Err(ExceptionError::MultipleCatch),
            Section::Try => {}
        }
        frame.section = Section::Catch;
        if frame.entered && self.unwind_to == Some(depth) {
            frame.handled = true;
            self.unwind_to = None;
            self.last_caught = frame.caught.clone();
            debug!(depth, "exception handled");
            return Ok(true);
        }
        Ok(false)
    }

    /// Enter the finally section of the innermost frame.  Pending state is
    /// parked so the section runs; returns `true` when it runs.
    pub fn begin_finally(&mut self) -> Result<bool, ExceptionError> {
        let depth = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or(ExceptionError::FinallyWithoutTry)?;
        if self.frames[depth].section == Section::Finally {
            return Err(ExceptionError::MultipleFinally);
        }
        self.frames[depth].section = Section::Finally;
        if !self.frames[depth].entered {
            return Ok(false);
        }
        // Caught here without a catch clause: the frame swallows it.
        let unwind_to = self.unwind_to.take().filter(|&d| d != depth);
        let parked = Parked {
            current: self.current.take(),
            force_abort: std::mem::take(&mut self.force_abort),
            need_rethrow: std::mem::take(&mut self.need_rethrow),
            unwind_to,
        };
        let pending = parked.force_abort || parked.unwind_to.is_some();
        trace!(depth, pending, "finally parks pending state");
        self.frames[depth].parked = Some(parked);
        Ok(true)
    }

    /// Close the innermost frame.
    pub fn end_try(&mut self) -> Result<(), ExceptionError> {
        let frame = self.frames.pop().ok_or(ExceptionError::EndtryWithoutTry)?;
        let depth = self.frames.len();
        if let Some(parked) = frame.parked {
            if self.has_pending() {
                debug!(depth, "finally raised a new exception, discarding parked one");
            } else {
                self.unpark(parked);
            }
        }
        if self.unwind_to == Some(depth) {
            self.unwind_to = None;
        }
        trace!(depth, "pop catch frame");
        Ok(())
    }

    /// Drop frames at and above `base`, left open by an invocation that is
    /// exiting.  An exception one of them had caught but not yet handled
    /// becomes an aborting one.  Returns the number of frames dropped.
    pub fn truncate(&mut self, base: usize) -> usize {
        if self.frames.len() <= base {
            return 0;
        }
        let dropped = self.frames.split_off(base);
        if !self.has_pending() {
            if let Some(parked) = dropped.iter().find_map(|f| f.parked.clone()) {
                self.unpark(parked);
            }
        }
        if let Some(to) = self.unwind_to.filter(|&d| d >= base) {
            self.unwind_to = None;
            self.current = dropped[to - base].caught.clone();
            self.force_abort = true;
            self.need_rethrow = true;
        }
        dropped.len()
    }

    /// Consume an exception that escaped every handler, clearing abort.
    pub fn take_uncaught(&mut self) -> Option<Exception> {
        if !self.force_abort {
            return None;
        }
        self.force_abort = false;
        self.need_rethrow = false;
        self.current.take()
    }

    fn unpark(&mut self, parked: Parked) {
        self.current = parked.current;
        self.force_abort = parked.force_abort;
        self.need_rethrow = parked.need_rethrow;
        self.unwind_to = parked.unwind_to;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
