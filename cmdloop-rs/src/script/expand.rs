//! Variable expansion.
//!
//! | Sequence  | Meaning                                   |
//! |-----------|-------------------------------------------|
//! | `%{name}` | variable `name`                           |
//! | `%name`   | same, for an identifier                   |
//! | `%n`      | positional argument `n` of the current call |
//! | `%#`      | number of positional arguments            |
//! | `%%`      | a literal `%`                             |
//!
//! Unset variables expand to nothing.  A `%` followed by anything else is
//! left as is.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::var::VarStore;

fn sub_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"%(?:(%)|\{([^}]*)\}|([A-Za-z_][A-Za-z0-9_]*|[0-9]+|#))")
            .expect("substitution pattern is valid")
    })
}

/// Expand every substitution in `src`.
pub fn expand(src: &str, vars: &VarStore) -> String {
    if !src.contains('%') {
        return src.to_owned();
    }
    sub_re()
        .replace_all(src, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return "%".to_owned();
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str().trim());
            vars.lookup(name).unwrap_or_default()
        })
        .into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
