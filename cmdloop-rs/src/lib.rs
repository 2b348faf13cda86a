//! A reentrant command-execution engine.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`source`] | where lines come from |
//! | [`context`] | flags and the per-invocation scope guard |
//! | [`cmdline`] | the fetch / dispatch / check loop |
//! | [`exception`] | try / catch / finally bookkeeping |
//! | [`debug`] | debug snapshots and single-step sessions |
//! | [`state`] | the interpreter state shared by every nesting level |
//! | [`message`] | error lists and the reporter seam |
//! | [`script`] | a built-in command language driving the engine |

pub mod cli;
pub mod cmdline;
pub mod config;
pub mod context;
pub mod debug;
pub mod exception;
pub mod message;
pub mod pattern;
pub mod script;
pub mod source;
pub mod state;
pub mod var;

pub use cmdline::{
    classify, do_cmdline, DispatchStatus, Dispatcher, Iteration, StopReason, Teardown,
};
pub use context::{ContextError, ExecContext, ExecFlags};
pub use debug::{debug_session, DebugAction, DebugSnapshot, SnapshotError, SnapshotToken};
pub use exception::{Exception, ExceptionError, ExceptionStack, ThrowOutcome, ThrowPoint};
pub use message::{CollectReporter, Report, Reporter, StderrReporter};
pub use pattern::Pattern;
pub use script::ScriptDispatcher;
pub use source::{
    feed_lines, BatchSource, FeedSource, GenericSource, InteractiveSource, LineRequest, LineSource,
    ScriptFileSource, SourceKind, StdinLines,
};
pub use state::{InterpState, Limits};
