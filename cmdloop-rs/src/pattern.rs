//! Catch-clause patterns.
//!
//! A `try` frame names the exception kinds it is willing to catch with a
//! pattern written after the `try` keyword:
//!
//! | Form | Mode | Example |
//! |------|------|---------|
//! | `/re/` | [`MatchMode::Regexp`] | `/^E\d+$/` |
//! | anything else | [`MatchMode::Glob`] | `E1*`, `io.[rw]*` |
//! | empty | either | matches every kind |
//!
//! Matching is case-sensitive: exception kinds are identifiers, not prose.

use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

// ── Public types ─────────────────────────────────────────────────────────────

/// Which matching algorithm a [`Pattern`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Regexp,
    Glob,
}

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("regex error: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("glob error: {0}")]
    InvalidGlob(String),
}

#[derive(Clone)]
enum Compiled {
    Regex(Arc<Regex>),
    Glob,
}

/// A compiled catch pattern.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    mode: MatchMode,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("mode", &self.mode)
            .finish()
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            MatchMode::Regexp => write!(f, "/{}/", self.src),
            MatchMode::Glob => f.write_str(&self.src),
        }
    }
}

impl Pattern {
    /// Compile `src` using `mode`.
    pub fn new(src: &str, mode: MatchMode) -> Result<Self, PatternError> {
        let compiled = match mode {
            MatchMode::Regexp => Compiled::Regex(Arc::new(Regex::new(src)?)),
            MatchMode::Glob => {
                check_glob(src).map_err(PatternError::InvalidGlob)?;
                Compiled::Glob
            }
        };
        Ok(Self {
            src: src.to_owned(),
            mode,
            compiled,
        })
    }

    /// Parse the argument of a `try` line: `/re/` is a regex, anything else
    /// a glob.
    pub fn parse(spec: &str) -> Result<Self, PatternError> {
        let spec = spec.trim();
        match spec.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
            Some(re) => Self::new(re, MatchMode::Regexp),
            None => Self::new(spec, MatchMode::Glob),
        }
    }

    /// The catch-all pattern.
    pub fn any() -> Self {
        Self {
            src: String::new(),
            mode: MatchMode::Glob,
            compiled: Compiled::Glob,
        }
    }

    /// The original source string (without `/` delimiters).
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Returns `true` if this pattern matches `kind`.
    ///
    /// An empty source string always matches.
    pub fn matches(&self, kind: &str) -> bool {
        if self.src.is_empty() {
            return true;
        }
        match &self.compiled {
            Compiled::Regex(re) => re.is_match(kind),
            Compiled::Glob => glob_match(&self.src, kind),
        }
    }
}

// ── Glob matching ────────────────────────────────────────────────────────────

/// Match `text` against a glob: `*`, `?`, `[a-z]`, `[!x]`, and `\` escapes.
///
/// Single-star backtracking; linear in practice for the short kinds
/// exceptions carry.
pub fn glob_match(pat: &str, text: &str) -> bool {
    let p: Vec<char> = pat.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    // (pattern index of the last `*`, text index it is currently absorbing up to)
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
            continue;
        }
        if pi < p.len() {
            if let Some(next) = match_one(&p, pi, t[ti]) {
                pi = next;
                ti += 1;
                continue;
            }
        }
        let Some((sp, st)) = star else { return false };
        pi = sp + 1;
        ti = st + 1;
        star = Some((sp, st + 1));
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Try to match the single-character token at `p[pi]` against `ch`.
/// Returns the index of the next token on success.
fn match_one(p: &[char], pi: usize, ch: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == ch).then_some(pi + 2),
        '[' => match class_end(p, pi) {
            Some(end) => class_matches(&p[pi + 1..end], ch).then_some(end + 1),
            None => (ch == '[').then_some(pi + 1),
        },
        c => (c == ch).then_some(pi + 1),
    }
}

/// Index of the `]` closing the class opened at `p[open]`.
fn class_end(p: &[char], open: usize) -> Option<usize> {
    let mut i = open + 1;
    if i < p.len() && (p[i] == '!' || p[i] == '^') {
        i += 1;
    }
    // A leading `]` is a literal member.
    if i < p.len() && p[i] == ']' {
        i += 1;
    }
    while i < p.len() {
        match p[i] {
            ']' => return Some(i),
            '\\' => i += 2,
            _ => i += 1,
        }
    }
    None
}

fn class_matches(body: &[char], ch: char) -> bool {
    let (negated, body) = match body.first() {
        Some('!' | '^') => (true, &body[1..]),
        _ => (false, body),
    };
    let mut hit = false;
    let mut i = 0;
    while i < body.len() {
        let mut lo = body[i];
        if lo == '\\' && i + 1 < body.len() {
            i += 1;
            lo = body[i];
        }
        if i + 2 < body.len() && body[i + 1] == '-' {
            if lo <= ch && ch <= body[i + 2] {
                hit = true;
            }
            i += 3;
        } else {
            if lo == ch {
                hit = true;
            }
            i += 1;
        }
    }
    hit != negated
}

/// Validate glob syntax: every `[` closes and no dangling `\`.
pub fn check_glob(pat: &str) -> Result<(), String> {
    let p: Vec<char> = pat.chars().collect();
    let mut i = 0;
    while i < p.len() {
        match p[i] {
            '\\' if i + 1 == p.len() => return Err("trailing backslash".into()),
            '\\' => i += 2,
            '[' => match class_end(&p, i) {
                Some(end) => i = end + 1,
                None => return Err(format!("unmatched '[' at {i}")),
            },
            _ => i += 1,
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
