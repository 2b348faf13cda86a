//! The ambient interpreter state shared by every nesting level.
//!
//! There is exactly one [`InterpState`] per engine.  Each
//! [`ExecContext`](crate::context::ExecContext) borrows it mutably for its
//! lifetime and hands a reborrow to nested invocations, so the borrow checker
//! enforces the single-writer, innermost-first discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::debug::DebugSnapshots;
use crate::exception::ExceptionStack;
use crate::message::{Message, MessageList, Reporter, StderrReporter};
use crate::source::LineSource;

/// Builds the line source a debug session reads from.
pub type DebuggerFactory = Box<dyn FnMut() -> Box<dyn LineSource>>;

/// Nesting limits checked when an invocation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Live invocations of the loop, of any kind.
    pub max_recursion: usize,
    /// Live invocations reading from scripts or function bodies.
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_recursion: 200,
            max_call_depth: 100,
        }
    }
}

pub struct InterpState {
    pub limits: Limits,
    pub(crate) recursion: usize,
    pub(crate) call_depth: usize,
    did_emsg: bool,
    interrupt: Arc<AtomicBool>,
    pub exceptions: ExceptionStack,
    pub(crate) messages: MessageList,
    pub(crate) snapshots: DebugSnapshots,
    reporter: Box<dyn Reporter>,
    /// Last command line kept by a `KEEPLINE` invocation.
    pub last_line: Option<String>,
    /// Input is being treated as typed by the user.
    pub key_typed: bool,
    stepping: bool,
    debugger: Option<DebuggerFactory>,
}

impl Default for InterpState {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl std::fmt::Debug for InterpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpState")
            .field("limits", &self.limits)
            .field("recursion", &self.recursion)
            .field("call_depth", &self.call_depth)
            .field("did_emsg", &self.did_emsg)
            .field("interrupted", &self.interrupted())
            .field("exceptions", &self.exceptions)
            .field("stepping", &self.stepping)
            .finish_non_exhaustive()
    }
}

impl InterpState {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            recursion: 0,
            call_depth: 0,
            did_emsg: false,
            interrupt: Arc::new(AtomicBool::new(false)),
            exceptions: ExceptionStack::new(),
            messages: MessageList::new(),
            snapshots: DebugSnapshots::default(),
            reporter: Box::new(StderrReporter),
            last_line: None,
            key_typed: false,
            stepping: false,
            debugger: None,
        }
    }

    /// Replace the reporter (builder style).
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    // ── Counters ──────────────────────────────────────────────────────────────

    /// Number of live invocations.
    pub fn recursion(&self) -> usize {
        self.recursion
    }

    /// Number of live script / function invocations.
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    // ── Error flag ────────────────────────────────────────────────────────────

    /// The sticky error flag.
    pub fn error_flag(&self) -> bool {
        self.did_emsg
    }

    pub fn set_error(&mut self) {
        self.did_emsg = true;
    }

    pub fn clear_error(&mut self) {
        self.did_emsg = false;
    }

    /// Raise an error: set the flag and queue the message for the current
    /// invocation.
    pub fn emsg(&mut self, text: impl Into<String>, command: Option<&str>) {
        self.did_emsg = true;
        self.messages.push(Message {
            text: text.into(),
            command: command.map(str::to_owned),
        });
    }

    /// Messages queued for the current invocation.
    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    // ── Interrupt ─────────────────────────────────────────────────────────────

    /// Handle for signal handlers; setting it interrupts every live loop.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Share an externally owned interrupt flag.
    pub fn set_interrupt_handle(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = flag;
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_interrupted(&self, value: bool) {
        self.interrupt.store(value, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.set_interrupted(false);
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    pub fn reporter_mut(&mut self) -> &mut dyn Reporter {
        self.reporter.as_mut()
    }

    // ── Debugging ─────────────────────────────────────────────────────────────

    /// Install the factory debug sessions read their commands from.
    pub fn set_debugger(&mut self, factory: DebuggerFactory) {
        self.debugger = Some(factory);
    }

    pub fn has_debugger(&self) -> bool {
        self.debugger.is_some()
    }

    pub(crate) fn debugger_source(&mut self) -> Option<Box<dyn LineSource>> {
        self.debugger.as_mut().map(|make| make())
    }

    /// Single-step mode: break into the debugger before every line.
    pub fn stepping(&self) -> bool {
        self.stepping
    }

    pub fn set_stepping(&mut self, on: bool) {
        self.stepping = on;
    }

    /// Number of saved debug snapshots.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }
}
