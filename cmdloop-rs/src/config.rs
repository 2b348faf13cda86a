//! `.cmdlooprc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | set a variable |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Engine settings are read back from the variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `max_recursion` | 200 | live loop invocations |
//! | `max_call_depth` | 100 | live script / function invocations |
//! | `verbose` | 0 | report errors with the command text |
//! | `prompt` | `": "` | interactive prompt |
//!
//! Every other variable is handed to the command language as a global.

use std::path::Path;

use thiserror::Error;

use crate::state::Limits;
use crate::var::VarStore;

pub const DEFAULT_PROMPT: &str = ": ";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error on one line of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Config {
    pub vars: VarStore,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Unknown directives are skipped.  Returns the config and the errors
    /// found on recognised lines.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };
            let (cmd, args) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));

            if cmd == "set" {
                let tokens = split_args(args.trim());
                if let Err(message) = parse_set(&tokens, &mut config.vars) {
                    errors.push(ConfigError { line: lineno, message });
                }
            }
        }

        errors.extend(config.validate());
        (config, errors)
    }

    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Fold `other` on top of `self`; later files win.
    pub fn merge(&mut self, other: Config) {
        for (k, v) in other.vars.sorted() {
            self.vars.set(k, v);
        }
    }

    // ── Typed settings ────────────────────────────────────────────────────────

    pub fn limits(&self) -> Limits {
        let defaults = Limits::default();
        Limits {
            max_recursion: self.usize_var("max_recursion").unwrap_or(defaults.max_recursion),
            max_call_depth: self.usize_var("max_call_depth").unwrap_or(defaults.max_call_depth),
        }
    }

    pub fn verbose(&self) -> bool {
        self.vars.get_int("verbose").is_some_and(|v| v != 0)
    }

    pub fn prompt(&self) -> &str {
        self.vars.get("prompt").unwrap_or(DEFAULT_PROMPT)
    }

    fn usize_var(&self, name: &str) -> Option<usize> {
        self.vars.get(name)?.trim().parse().ok()
    }

    /// Numeric settings that don't parse.  The line number is unknown by
    /// now, so it is reported as 0.
    fn validate(&self) -> Vec<ConfigError> {
        ["max_recursion", "max_call_depth", "verbose"]
            .into_iter()
            .filter(|name| {
                self.vars
                    .get(name)
                    .is_some_and(|v| v.trim().parse::<usize>().is_err())
            })
            .map(|name| ConfigError {
                line: 0,
                message: format!("{name}: expected a non-negative integer"),
            })
            .collect()
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
pub(crate) fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── /set ─────────────────────────────────────────────────────────────────────

/// Parse `<name>=<value>` or `<name> <value>`.
pub(crate) fn parse_set(tokens: &[String], vars: &mut VarStore) -> Result<(), String> {
    let Some(first) = tokens.first() else {
        return Err("set: requires an argument".into());
    };

    let (name, value) = if let Some((name, value)) = first.split_once('=') {
        let rest = tokens[1..].iter().map(String::as_str);
        (name.to_owned(), std::iter::once(value).chain(rest).collect::<Vec<_>>().join(" "))
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("set: missing value for '{first}'"));
    };

    if name.is_empty() {
        return Err("set: variable name cannot be empty".into());
    }
    vars.set(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
