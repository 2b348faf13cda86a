//! Debug-mode re-entry: snapshots of the ambient state and the debugger
//! session that runs between single steps.
//!
//! A debug session is a nested loop invocation started while another one is
//! in the middle of a line.  It must not see, or disturb, the exception
//! environment of the line it interrupted, so its context is entered with
//! `EXCRESET`: [`InterpState::save_debug`] moves the exception stack and the
//! error / interrupt flags into a [`DebugSnapshot`] and resets them, and the
//! context's teardown hands them back with [`InterpState::restore_debug`].
//!
//! Snapshots nest strictly LIFO.  Restoring anything but the most recent one
//! is a bug in the caller and is rejected with [`SnapshotError`].

use std::cell::Cell;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cmdline::{do_cmdline, Dispatcher};
use crate::context::ExecFlags;
use crate::exception::{Exception, ExceptionStack, ThrowPoint};
use crate::source::{LineRequest, LineSource, SourceKind};
use crate::state::InterpState;

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// The ambient fields captured at a debug re-entry.  Immutable once taken.
#[derive(Debug)]
pub struct DebugSnapshot {
    recursion: usize,
    exceptions: ExceptionStack,
    error: bool,
    interrupted: bool,
}

impl DebugSnapshot {
    pub fn recursion(&self) -> usize {
        self.recursion
    }

    pub fn force_abort(&self) -> bool {
        self.exceptions.force_abort()
    }

    pub fn current_exception(&self) -> Option<&Exception> {
        self.exceptions.current()
    }

    /// Depth of the catch-frame stack at the time of capture.
    pub fn catch_depth(&self) -> usize {
        self.exceptions.depth()
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }
}

/// Identifies one saved snapshot; restoring must present the newest token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotToken(usize);

impl SnapshotToken {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("debug snapshot restore with nothing saved")]
    Empty,
    #[error("debug snapshot restored out of order: expected #{expected}, got #{got}")]
    OutOfOrder { expected: usize, got: usize },
}

/// LIFO stack of snapshots, indexed by nesting depth.
#[derive(Debug, Default)]
pub struct DebugSnapshots {
    stack: Vec<DebugSnapshot>,
}

impl DebugSnapshots {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The snapshot a token refers to, if it is still saved.
    pub fn get(&self, token: SnapshotToken) -> Option<&DebugSnapshot> {
        self.stack.get(token.0)
    }

    fn push(&mut self, snapshot: DebugSnapshot) -> SnapshotToken {
        self.stack.push(snapshot);
        SnapshotToken(self.stack.len() - 1)
    }

    fn pop(&mut self, token: SnapshotToken) -> Result<DebugSnapshot, SnapshotError> {
        let expected = self.stack.len().checked_sub(1).ok_or(SnapshotError::Empty)?;
        if token.0 != expected {
            return Err(SnapshotError::OutOfOrder { expected, got: token.0 });
        }
        self.stack.pop().ok_or(SnapshotError::Empty)
    }
}

impl InterpState {
    /// Capture the exception environment and error / interrupt flags, then
    /// reset them for a nested debug invocation.
    pub fn save_debug(&mut self) -> SnapshotToken {
        let snapshot = DebugSnapshot {
            recursion: self.recursion,
            exceptions: std::mem::take(&mut self.exceptions),
            error: self.error_flag(),
            interrupted: self.interrupted(),
        };
        self.clear_error();
        self.clear_interrupt();
        let token = self.snapshots.push(snapshot);
        debug!(index = token.0, "saved debug state");
        token
    }

    /// Write back the snapshot `token` names.  It must be the newest.
    pub fn restore_debug(&mut self, token: SnapshotToken) -> Result<(), SnapshotError> {
        let snapshot = self.snapshots.pop(token)?;
        if snapshot.recursion != self.recursion {
            warn!(
                saved = snapshot.recursion,
                now = self.recursion,
                "recursion guard moved across debug session"
            );
        }
        self.recursion = snapshot.recursion;
        self.exceptions = snapshot.exceptions;
        if snapshot.error {
            self.set_error();
        } else {
            self.clear_error();
        }
        self.set_interrupted(snapshot.interrupted);
        debug!(index = token.0, "restored debug state");
        Ok(())
    }
}

// ── Debug session ─────────────────────────────────────────────────────────────

/// How a debug session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    /// Leave single-step mode and run on.
    Continue,
    /// Run the pending line, then break again.
    Step,
    /// Interrupt everything.
    Quit,
}

/// Wraps the debugger's input: the session commands end the nested loop
/// instead of being dispatched.
struct DebugPrompt {
    inner: Box<dyn LineSource>,
    action: Rc<Cell<DebugAction>>,
}

impl LineSource for DebugPrompt {
    fn next_line(&mut self, req: &LineRequest) -> Option<String> {
        let line = self.inner.next_line(req)?;
        let action = match line.trim() {
            "cont" | "c" => DebugAction::Continue,
            "step" | "s" | "next" | "n" | "" => DebugAction::Step,
            "quit" | "q" => DebugAction::Quit,
            _ => return Some(line),
        };
        self.action.set(action);
        None
    }

    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn position(&self) -> Option<ThrowPoint> {
        self.inner.position()
    }
}

/// Break into the debugger before `pending_line` runs.
///
/// Debugger input is dispatched in its own invocation entered with
/// `VERBOSE | EXCRESET | REPEAT`.  End of debugger input counts as `cont`.
pub fn debug_session<D: Dispatcher + ?Sized>(
    state: &mut InterpState,
    pending_line: &str,
    dispatcher: &mut D,
) -> DebugAction {
    let Some(input) = state.debugger_source() else {
        return DebugAction::Continue;
    };
    state.reporter_mut().info(&format!(">>> {pending_line}"));

    let action = Rc::new(Cell::new(DebugAction::Continue));
    let prompt = DebugPrompt {
        inner: input,
        action: Rc::clone(&action),
    };
    let flags = ExecFlags::VERBOSE | ExecFlags::EXCRESET | ExecFlags::REPEAT;
    if let Err(e) = do_cmdline(state, Box::new(prompt), flags, dispatcher) {
        warn!(error = %e, "debug session could not start");
    }

    let action = action.get();
    match action {
        DebugAction::Continue => state.set_stepping(false),
        DebugAction::Step => {}
        DebugAction::Quit => {
            state.set_stepping(false);
            state.interrupt();
        }
    }
    debug!(?action, "debug session ended");
    action
}

// ── Tests ─────────────────────────────────────────────────────────────────────
