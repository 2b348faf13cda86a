//! Line sources: where the command loop gets its next line.
//!
//! | Type | Kind | Feeds |
//! |------|------|-------|
//! | [`FeedSource`] | [`SourceKind::Feed`] | a caller producer, counted (function bodies) |
//! | [`InteractiveSource`] | [`SourceKind::Interactive`] | a prompt on a reader / writer pair |
//! | [`BatchSource`] | [`SourceKind::Batch`] | a whole program supplied up front |
//! | [`ScriptFileSource`] | [`SourceKind::ScriptFile`] | an open script file |
//! | [`GenericSource`] | [`SourceKind::Generic`] | an opaque boxed producer |
//!
//! `None` is the end-of-input sentinel.  Every source is fused: once it has
//! returned `None` it keeps doing so.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Stdout, Write};
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::context::ExecFlags;
use crate::exception::ThrowPoint;

// ── Contract ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Feed,
    Interactive,
    Batch,
    ScriptFile,
    Generic,
}

/// What the loop tells a source when asking for a line.
#[derive(Debug, Clone, Copy)]
pub struct LineRequest {
    pub flags: ExecFlags,
    /// Nesting depth of the asking invocation (1 = outermost).
    pub depth: usize,
}

pub trait LineSource {
    /// The next line, or `None` at end of input.
    fn next_line(&mut self, req: &LineRequest) -> Option<String>;

    fn kind(&self) -> SourceKind;

    /// Where the most recently returned line came from.
    fn position(&self) -> Option<ThrowPoint> {
        None
    }

    /// Whether single-step debugging may break before this source's lines.
    fn allows_stepping(&self) -> bool {
        true
    }
}

// ── Direct feed ───────────────────────────────────────────────────────────────

/// Pulls lines from a caller-supplied closure and numbers them.
pub struct FeedSource<F> {
    name: String,
    producer: F,
    line: usize,
    done: bool,
}

impl<F: FnMut() -> Option<String>> FeedSource<F> {
    pub fn new(name: impl Into<String>, producer: F) -> Self {
        Self {
            name: name.into(),
            producer,
            line: 0,
            done: false,
        }
    }
}

/// A [`FeedSource`] over an owned list of lines.
pub fn feed_lines(
    name: impl Into<String>,
    lines: Vec<String>,
) -> FeedSource<impl FnMut() -> Option<String>> {
    let mut lines = lines.into_iter();
    FeedSource::new(name, move || lines.next())
}

impl<F: FnMut() -> Option<String>> LineSource for FeedSource<F> {
    fn next_line(&mut self, _req: &LineRequest) -> Option<String> {
        if self.done {
            return None;
        }
        match (self.producer)() {
            Some(line) => {
                self.line += 1;
                Some(line)
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn position(&self) -> Option<ThrowPoint> {
        Some(ThrowPoint { source: self.name.clone(), line: self.line })
    }
}

// ── Interactive entry ─────────────────────────────────────────────────────────

/// Prompts on `output` and reads one line at a time from `input`.
///
/// `NOWAIT` suppresses the prompt; `VERBOSE` echoes each line read.
pub struct InteractiveSource<R, W> {
    input: R,
    output: W,
    prompt: String,
    line: usize,
    /// The prompt is on screen and no input has arrived yet.
    prompted: bool,
    done: bool,
}

impl<R: BufRead, W: Write> InteractiveSource<R, W> {
    pub fn new(input: R, output: W, prompt: impl Into<String>) -> Self {
        Self {
            input,
            output,
            prompt: prompt.into(),
            line: 0,
            prompted: false,
            done: false,
        }
    }

    /// `true` while the prompt is displayed and awaiting input.
    pub fn is_prompted(&self) -> bool {
        self.prompted
    }

    /// Give back the reader and writer.
    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl InteractiveSource<StdinLines, Stdout> {
    /// Read from the process's stdin, prompting on stdout.
    pub fn stdio(prompt: impl Into<String>) -> Self {
        Self::new(StdinLines::default(), io::stdout(), prompt)
    }
}

/// Line-at-a-time reader over the process's stdin.
///
/// The stdin lock is taken for each line only, so a debugger prompt can
/// read from stdin while an interactive source is live.
#[derive(Debug, Default)]
pub struct StdinLines {
    buf: Vec<u8>,
    pos: usize,
}

impl Read for StdinLines {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = {
            let avail = self.fill_buf()?;
            let n = avail.len().min(out.len());
            out[..n].copy_from_slice(&avail[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for StdinLines {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            self.buf = line.into_bytes();
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

impl<R: BufRead, W: Write> LineSource for InteractiveSource<R, W> {
    fn next_line(&mut self, req: &LineRequest) -> Option<String> {
        if self.done {
            return None;
        }
        if !req.flags.contains(ExecFlags::NOWAIT) {
            let _ = write!(self.output, "{}", self.prompt);
            let _ = self.output.flush();
            self.prompted = true;
        }
        let mut buf = String::new();
        let read = self.input.read_line(&mut buf);
        self.prompted = false;
        match read {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                strip_newline(&mut buf);
                self.line += 1;
                if req.flags.contains(ExecFlags::VERBOSE) {
                    let _ = writeln!(self.output, "{buf}");
                }
                Some(buf)
            }
            Err(e) => {
                warn!(error = %e, "interactive input failed");
                self.done = true;
                None
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Interactive
    }

    fn position(&self) -> Option<ThrowPoint> {
        Some(ThrowPoint { source: "input".into(), line: self.line })
    }
}

// ── Batch entry ───────────────────────────────────────────────────────────────

/// A complete program handed over up front.  Never echoes, never steps.
#[derive(Debug)]
pub struct BatchSource {
    name: String,
    lines: VecDeque<String>,
    line: usize,
}

impl BatchSource {
    pub fn from_program(name: impl Into<String>, program: &str) -> Self {
        Self {
            name: name.into(),
            lines: program.lines().map(str::to_owned).collect(),
            line: 0,
        }
    }

    /// Lines not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl LineSource for BatchSource {
    fn next_line(&mut self, _req: &LineRequest) -> Option<String> {
        let line = self.lines.pop_front()?;
        self.line += 1;
        Some(line)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Batch
    }

    fn position(&self) -> Option<ThrowPoint> {
        Some(ThrowPoint { source: self.name.clone(), line: self.line })
    }

    fn allows_stepping(&self) -> bool {
        false
    }
}

// ── Script file ───────────────────────────────────────────────────────────────

/// Sequential lines of a script file.
///
/// A line whose first non-blank character is `\` continues the previous
/// line; the backslash is dropped and the rest appended.  Positions report
/// the line the command started on.
pub struct ScriptFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    /// Physical lines read so far.
    physical: usize,
    /// Start line of the command most recently returned.
    start: usize,
    lookahead: Option<String>,
    done: bool,
}

impl ScriptFileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            physical: 0,
            start: 0,
            lookahead: None,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_physical(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let mut buf = String::new();
        match self.reader.read_line(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                strip_newline(&mut buf);
                self.physical += 1;
                Some(buf)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    line = self.physical + 1,
                    error = %e,
                    "script read failed"
                );
                self.done = true;
                None
            }
        }
    }
}

impl LineSource for ScriptFileSource {
    fn next_line(&mut self, _req: &LineRequest) -> Option<String> {
        let mut line = match self.lookahead.take() {
            Some(l) => l,
            None => self.read_physical()?,
        };
        self.start = self.physical;
        while let Some(next) = self.read_physical() {
            match next.trim_start().strip_prefix('\\') {
                Some(rest) => line.push_str(rest),
                None => {
                    self.lookahead = Some(next);
                    break;
                }
            }
        }
        trace!(path = %self.path.display(), line = self.start, "script line");
        Some(line)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ScriptFile
    }

    fn position(&self) -> Option<ThrowPoint> {
        Some(ThrowPoint { source: self.path.display().to_string(), line: self.start })
    }
}

// ── Generic ───────────────────────────────────────────────────────────────────

/// An opaque boxed producer.
pub struct GenericSource {
    producer: Box<dyn FnMut() -> Option<String>>,
    done: bool,
}

impl GenericSource {
    pub fn new(producer: impl FnMut() -> Option<String> + 'static) -> Self {
        Self {
            producer: Box::new(producer),
            done: false,
        }
    }

    /// A source that yields `line` once.
    pub fn once(line: impl Into<String>) -> Self {
        let mut line = Some(line.into());
        Self::new(move || line.take())
    }
}

impl LineSource for GenericSource {
    fn next_line(&mut self, _req: &LineRequest) -> Option<String> {
        if self.done {
            return None;
        }
        let line = (self.producer)();
        self.done = line.is_none();
        line
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Generic
    }
}

fn strip_newline(buf: &mut String) {
    if buf.ends_with('\n') {
        buf.pop();
        if buf.ends_with('\r') {
            buf.pop();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
