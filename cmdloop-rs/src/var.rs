//! Variable store for the built-in command language.
//!
//! Globals live in one table.  Every `call` pushes a scope holding its
//! positional arguments (`%1`, `%2`, ... and `%#` for the count); lookups
//! of numeric names consult the innermost scope only.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct VarStore {
    globals: HashMap<String, String>,
    scopes: Vec<Vec<String>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Look up `name`.  Positional names read the innermost call scope.
    pub fn get(&self, name: &str) -> Option<&str> {
        if name == "#" {
            return None;
        }
        match name.parse::<usize>() {
            Ok(0) => None,
            Ok(n) => self.scopes.last()?.get(n - 1).map(String::as_str),
            Err(_) => self.globals.get(name).map(String::as_str),
        }
    }

    /// Like [`get`](Self::get), with `#` resolving to the argument count.
    pub fn lookup(&self, name: &str) -> Option<String> {
        if name == "#" {
            return Some(self.scopes.last().map_or(0, Vec::len).to_string());
        }
        self.get(name).map(str::to_owned)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    /// Remove a global.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.globals.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Globals in name order.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut all: Vec<_> = self.globals.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        all.sort_unstable();
        all
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    // ── Call scopes ───────────────────────────────────────────────────────────

    pub fn push_scope(&mut self, args: Vec<String>) {
        self.scopes.push(args);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
