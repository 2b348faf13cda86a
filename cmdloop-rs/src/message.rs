//! Error messages and the display seam.
//!
//! Every invocation of the command loop collects the errors raised while its
//! lines run into a private [`MessageList`].  After each dispatch the list is
//! either promoted to an exception (inside a `try`) or handed to the
//! [`Reporter`].

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

// ── MessageList ───────────────────────────────────────────────────────────────

/// One error raised by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    /// The command line that raised it, when known.
    pub command: Option<String>,
}

impl Message {
    /// Render for display; `verbose` includes the offending command text.
    pub fn render(&self, verbose: bool) -> String {
        match (&self.command, verbose) {
            (Some(cmd), true) => {
                format!("Error detected while processing \"{cmd}\": {}", self.text)
            }
            _ => self.text.clone(),
        }
    }
}

/// Errors collected during one invocation.
#[derive(Debug, Default)]
pub struct MessageList {
    items: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.items.push(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    /// Remove and return everything collected so far.
    pub fn take_all(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.items)
    }
}

// ── Reporter ──────────────────────────────────────────────────────────────────

/// The message/display subsystem.
pub trait Reporter {
    /// An unhandled error or exception.
    fn error(&mut self, text: &str);

    /// Informational output (debugger banners, etc.).
    fn info(&mut self, text: &str);

    /// The user interrupted execution.
    fn interrupted(&mut self) {
        self.info("Interrupted");
    }
}

/// Writes to standard error.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn error(&mut self, text: &str) {
        let _ = writeln!(std::io::stderr(), "{text}");
    }

    fn info(&mut self, text: &str) {
        let _ = writeln!(std::io::stderr(), "{text}");
    }
}

/// What a [`CollectReporter`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Error(String),
    Info(String),
    Interrupted,
}

/// Shared view of a [`CollectReporter`]'s log.
pub type ReportLog = Rc<RefCell<Vec<Report>>>;

/// Keeps every report in memory; the log handle stays readable after the
/// reporter itself is boxed into an `InterpState`.
#[derive(Debug, Default)]
pub struct CollectReporter {
    log: ReportLog,
}

impl CollectReporter {
    /// Create a reporter and a handle onto its log.
    pub fn with_log() -> (Self, ReportLog) {
        let reporter = Self::default();
        let log = Rc::clone(&reporter.log);
        (reporter, log)
    }
}

impl Reporter for CollectReporter {
    fn error(&mut self, text: &str) {
        self.log.borrow_mut().push(Report::Error(text.to_owned()));
    }

    fn info(&mut self, text: &str) {
        self.log.borrow_mut().push(Report::Info(text.to_owned()));
    }

    fn interrupted(&mut self) {
        self.log.borrow_mut().push(Report::Interrupted);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
