//! Execution contexts: one per (possibly nested) invocation of the loop.
//!
//! [`ExecContext::enter`] acquires the ambient state and [`Drop`] gives it
//! back, so every exit path (completion, error, exception, interrupt, or a
//! panic unwinding through a dispatcher) restores the recursion guard, the
//! call depth, the caller's message list, and any debug snapshot exactly once.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use thiserror::Error;
use tracing::{error, trace, warn};

use crate::cmdline::{do_cmdline, Dispatcher, Teardown};
use crate::debug::SnapshotToken;
use crate::exception::{Exception, ThrowOutcome, ThrowPoint};
use crate::message::MessageList;
use crate::source::{LineRequest, LineSource, SourceKind};
use crate::state::InterpState;

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Combinable invocation flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExecFlags(u8);

impl ExecFlags {
    /// Include the offending command text in error reports.
    pub const VERBOSE: Self = Self(0x01);
    /// Don't prompt or pause for the user.
    pub const NOWAIT: Self = Self(0x02);
    /// Keep fetching until the source is exhausted.
    pub const REPEAT: Self = Self(0x04);
    /// Input counts as typed by the user.
    pub const KEYTYPED: Self = Self(0x08);
    /// Run with a fresh exception environment (debug sessions).
    pub const EXCRESET: Self = Self(0x10);
    /// Remember each line for repeat-last-command.
    pub const KEEPLINE: Self = Self(0x20);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::VERBOSE, "VERBOSE"),
        (Self::NOWAIT, "NOWAIT"),
        (Self::REPEAT, "REPEAT"),
        (Self::KEYTYPED, "KEYTYPED"),
        (Self::EXCRESET, "EXCRESET"),
        (Self::KEEPLINE, "KEEPLINE"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// A copy without `other`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for ExecFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExecFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ExecFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for ExecFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why an invocation could not start.  Nothing was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("command too recursive (limit {limit})")]
    RecursionLimitExceeded { limit: usize },
    #[error("call depth exceeds max_call_depth ({limit})")]
    CallDepthExceeded { limit: usize },
}

// ── ExecContext ───────────────────────────────────────────────────────────────

pub struct ExecContext<'s> {
    state: &'s mut InterpState,
    source: Box<dyn LineSource + 's>,
    flags: ExecFlags,
    /// The line being dispatched.
    cmdline: String,
    caller_messages: MessageList,
    /// Catch frames below this depth belong to enclosing invocations.
    frame_base: usize,
    did_inc: bool,
    entry_call_depth: usize,
    saved_key_typed: bool,
    snapshot: Option<SnapshotToken>,
    dispatched: usize,
    failed: usize,
    forget_line: bool,
}

impl<'s> ExecContext<'s> {
    /// Start an invocation.  Fails, recording the error in `state`, when a
    /// nesting limit would be exceeded.
    pub fn enter(
        state: &'s mut InterpState,
        source: Box<dyn LineSource + 's>,
        flags: ExecFlags,
    ) -> Result<Self, ContextError> {
        let did_inc = source.kind() != SourceKind::Interactive;
        let limit_error = if state.recursion >= state.limits.max_recursion {
            Some(ContextError::RecursionLimitExceeded { limit: state.limits.max_recursion })
        } else if did_inc && state.call_depth >= state.limits.max_call_depth {
            Some(ContextError::CallDepthExceeded { limit: state.limits.max_call_depth })
        } else {
            None
        };
        if let Some(e) = limit_error {
            warn!(
                recursion = state.recursion,
                call_depth = state.call_depth,
                error = %e,
                "invocation refused"
            );
            state.emsg(e.to_string(), None);
            return Err(e);
        }

        let entry_call_depth = state.call_depth;
        state.recursion += 1;
        if did_inc {
            state.call_depth += 1;
        }
        let caller_messages = std::mem::take(&mut state.messages);
        let saved_key_typed = state.key_typed;
        if !flags.contains(ExecFlags::KEYTYPED) {
            state.key_typed = false;
        }
        let snapshot = flags.contains(ExecFlags::EXCRESET).then(|| state.save_debug());
        let frame_base = state.exceptions.depth();
        trace!(recursion = state.recursion, call_depth = state.call_depth, ?flags, "enter context");

        Ok(Self {
            state,
            source,
            flags,
            cmdline: String::new(),
            caller_messages,
            frame_base,
            did_inc,
            entry_call_depth,
            saved_key_typed,
            snapshot,
            dispatched: 0,
            failed: 0,
            forget_line: false,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> &InterpState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut InterpState {
        &mut *self.state
    }

    pub fn flags(&self) -> ExecFlags {
        self.flags
    }

    /// Nesting depth of this invocation (1 = outermost).
    pub fn depth(&self) -> usize {
        self.state.recursion
    }

    /// The line currently being dispatched.
    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Where the current line came from.
    pub fn position(&self) -> Option<ThrowPoint> {
        self.source.position()
    }

    /// First catch-frame depth owned by this invocation.
    pub fn frame_base(&self) -> usize {
        self.frame_base
    }

    /// `false` while lines are being skipped by exception unwinding.
    pub fn is_executing(&self) -> bool {
        self.state.exceptions.is_executing()
    }

    pub fn key_typed(&self) -> bool {
        self.state.key_typed
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub(crate) fn entry_call_depth(&self) -> usize {
        self.entry_call_depth
    }

    // ── Operations for dispatchers ────────────────────────────────────────────

    /// Raise an error attributed to the current line.
    pub fn emsg(&mut self, text: impl Into<String>) {
        let command = (!self.cmdline.is_empty()).then_some(self.cmdline.as_str());
        self.state.emsg(text, command);
    }

    /// Raise a structured exception at the current position.
    pub fn throw(&mut self, kind: impl Into<String>, message: impl Into<String>) -> ThrowOutcome {
        let exc = Exception::new(kind, message).at(self.position());
        self.state.exceptions.throw(exc)
    }

    /// Don't keep the current line for repeat-last-command.
    pub fn forget_line(&mut self) {
        self.forget_line = true;
    }

    /// Run a nested invocation on the same state.
    pub fn run_nested<D: Dispatcher + ?Sized>(
        &mut self,
        source: Box<dyn LineSource + '_>,
        flags: ExecFlags,
        dispatcher: &mut D,
    ) -> Result<Teardown, ContextError> {
        do_cmdline(self.state, source, flags, dispatcher)
    }

    // ── Loop plumbing ─────────────────────────────────────────────────────────

    /// FETCH: the next line, or `None` at end of input.
    pub(crate) fn fetch(&mut self) -> Option<String> {
        let req = LineRequest { flags: self.flags, depth: self.state.recursion };
        let line = self.source.next_line(&req)?;
        if self.source.kind() == SourceKind::Interactive {
            if self.flags.contains(ExecFlags::KEYTYPED) {
                self.state.key_typed = true;
            }
            // ctrl-c while the top-level prompt was waiting.
            if self.state.recursion == 1 {
                self.state.clear_interrupt();
            }
        }
        self.cmdline.clear();
        self.cmdline.push_str(&line);
        self.forget_line = false;
        Some(line)
    }

    /// `true` when single-stepping should break before the fetched line.
    pub(crate) fn wants_debug_break(&self) -> bool {
        self.state.stepping()
            && self.state.has_debugger()
            && !self.flags.contains(ExecFlags::EXCRESET)
            && self.source.allows_stepping()
    }

    /// Bookkeeping after DISPATCH.
    pub(crate) fn after_dispatch(&mut self, ok: bool) {
        self.dispatched += 1;
        if !ok {
            self.failed += 1;
        }
        if self.flags.contains(ExecFlags::KEEPLINE)
            && !self.forget_line
            && !self.cmdline.trim().is_empty()
        {
            self.state.last_line = Some(self.cmdline.clone());
        }
        self.flush_messages();
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed
    }

    /// Promote queued errors to an exception when a `try` is active,
    /// otherwise report them.
    pub(crate) fn flush_messages(&mut self) {
        if self.state.messages.is_empty() {
            return;
        }
        let messages = self.state.messages.take_all();
        if self.state.exceptions.in_try() {
            let text = messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            trace!(%text, "error promoted to exception");
            self.state.clear_error();
            let exc = Exception::new("error", text).at(self.position());
            self.state.exceptions.throw(exc);
            return;
        }
        let verbose = self.flags.contains(ExecFlags::VERBOSE);
        for m in &messages {
            self.state.reporter_mut().error(&m.render(verbose));
        }
    }

    /// Discard catch frames this invocation left open.
    pub(crate) fn close_frames(&mut self) {
        let open = self.state.exceptions.depth().saturating_sub(self.frame_base);
        if open == 0 {
            return;
        }
        warn!(open, "invocation ended inside try");
        self.state.exceptions.truncate(self.frame_base);
        let verbose = self.flags.contains(ExecFlags::VERBOSE);
        let text = if verbose && !self.cmdline.is_empty() {
            format!("missing endtry (last command \"{}\")", self.cmdline)
        } else {
            "missing endtry".to_owned()
        };
        self.state.set_error();
        self.state.reporter_mut().error(&text);
    }
}

impl Drop for ExecContext<'_> {
    fn drop(&mut self) {
        self.close_frames();
        self.flush_messages();
        if let Some(token) = self.snapshot.take() {
            if let Err(e) = self.state.restore_debug(token) {
                error!(error = %e, "debug snapshot out of balance");
                debug_assert!(false, "{e}");
            }
        }
        self.state.messages = std::mem::take(&mut self.caller_messages);
        self.state.key_typed = self.saved_key_typed;
        if self.did_inc {
            self.state.call_depth -= 1;
        }
        self.state.recursion -= 1;
        trace!(recursion = self.state.recursion, dispatched = self.dispatched, "leave context");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
