//! The built-in command language.
//!
//! [`ScriptDispatcher`] executes one line at a time on behalf of the loop.
//! Commands that run other lines (`source`, `call`, `exec`, `again`) do so
//! by re-entering the loop through [`ExecContext::run_nested`], so nesting
//! limits, error promotion and exception propagation all apply to them.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `echo <text>` | append `text` to the output |
//! | `set <name>=<value>` / `set <name> <value>` / `set` | set or list variables |
//! | `unset <name>` | remove a variable |
//! | `source <file>` | run a script file |
//! | `function <name>` ... `endfunction` | define a function |
//! | `call <name> [args]` | run a function; args are `%1`, `%2`, ... |
//! | `exec <command>` | run one command line |
//! | `again` | rerun the last remembered line |
//! | `try [pattern]` / `catch` / `finally` / `endtry` | exception handling |
//! | `throw <kind> [message]` | raise an exception |
//! | `error <message>` | raise an error |
//! | `interrupt` | raise the interrupt flag |
//! | `debug on\|off` | toggle single-step mode |
//! | `quit` | ask the driver to stop |
//!
//! Lines starting with `"` or `;` are comments.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::cmdline::{DispatchStatus, Dispatcher, StopReason, Teardown};
use crate::config::{parse_set, split_args};
use crate::context::{ExecContext, ExecFlags};
use crate::pattern::Pattern;
use crate::source::{feed_lines, GenericSource, LineSource, ScriptFileSource};
use crate::var::VarStore;

use super::expand::expand;

/// A `function` block being collected.
#[derive(Debug)]
struct Definition {
    name: String,
    body: Vec<String>,
    /// `false` when the `function` line itself was skipped; the body is
    /// swallowed without being stored.
    active: bool,
    /// Nesting depth of the context the `function` line ran in.
    depth: usize,
}

#[derive(Debug, Default)]
pub struct ScriptDispatcher {
    pub vars: VarStore,
    functions: HashMap<String, Vec<String>>,
    defining: Option<Definition>,
    /// Text produced by `echo` and `set`, in order.
    pub output: Vec<String>,
    quit: bool,
}

impl ScriptDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars(vars: VarStore) -> Self {
        Self { vars, ..Self::default() }
    }

    /// `true` once `quit` ran.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Define a function directly.
    pub fn define_function(&mut self, name: impl Into<String>, body: Vec<String>) {
        self.functions.insert(name.into(), body);
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    // ── Structure ─────────────────────────────────────────────────────────────

    /// Collect a line of a function body.  Returns `false` when not defining.
    fn collect_definition(&mut self, cmd: &str, line: &str) -> bool {
        let Some(def) = self.defining.as_mut() else { return false };
        if cmd != "endfunction" {
            def.body.push(line.to_owned());
            return true;
        }
        if let Some(def) = self.defining.take() {
            if def.active {
                debug!(name = %def.name, lines = def.body.len(), "function defined");
                self.functions.insert(def.name, def.body);
            }
        }
        true
    }

    /// `try` / `catch` / `finally` / `endtry` / `function`.  These run even
    /// while lines are being skipped.
    fn structural(
        &mut self,
        cmd: &str,
        args: &str,
        ctx: &mut ExecContext<'_>,
    ) -> Option<DispatchStatus> {
        let executing = ctx.is_executing();
        let result = match cmd {
            "try" => {
                let pattern = match args.trim() {
                    "" => Ok(Pattern::any()),
                    src if executing => Pattern::parse(&expand(src, &self.vars)),
                    _ => Ok(Pattern::any()),
                };
                match pattern {
                    Ok(p) => {
                        ctx.state_mut().exceptions.push_catch(p);
                        Ok(())
                    }
                    Err(e) => {
                        // Keep try / endtry balanced.
                        ctx.state_mut().exceptions.push_catch(Pattern::any());
                        Err(format!("try: {e}"))
                    }
                }
            }
            "catch" => match ctx.state_mut().exceptions.begin_catch() {
                Ok(true) => {
                    self.bind_caught(ctx);
                    Ok(())
                }
                Ok(false) => Ok(()),
                Err(e) => Err(e.to_string()),
            },
            "finally" => ctx
                .state_mut()
                .exceptions
                .begin_finally()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "endtry" => ctx.state_mut().exceptions.end_try().map_err(|e| e.to_string()),
            "function" => {
                let name = args.trim();
                if name.is_empty() && executing {
                    Err("function: missing name".to_owned())
                } else {
                    self.defining = Some(Definition {
                        name: name.to_owned(),
                        body: Vec::new(),
                        active: executing,
                        depth: ctx.depth(),
                    });
                    Ok(())
                }
            }
            "endfunction" => Err("endfunction without function".to_owned()),
            _ => return None,
        };
        Some(match result {
            Ok(()) => DispatchStatus::Ok,
            Err(msg) => {
                ctx.emsg(msg);
                DispatchStatus::Failed
            }
        })
    }

    /// Expose the exception a `catch` section is handling.
    fn bind_caught(&mut self, ctx: &ExecContext<'_>) {
        let Some(exc) = ctx.state().exceptions.last_caught() else { return };
        self.vars.set("exception", exc.to_string());
        self.vars.set("exception_kind", exc.kind.clone());
        self.vars.set("exception_message", exc.message.clone());
        let point = exc.throw_point.as_ref().map(ToString::to_string).unwrap_or_default();
        self.vars.set("throwpoint", point);
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn command(&mut self, cmd: &str, args: &str, ctx: &mut ExecContext<'_>) -> DispatchStatus {
        match cmd {
            "echo" => {
                self.output.push(args.to_owned());
                DispatchStatus::Ok
            }
            "set" => {
                let tokens = split_args(args);
                if tokens.is_empty() {
                    let listing: Vec<String> =
                        self.vars.sorted().into_iter().map(|(k, v)| format!("{k}={v}")).collect();
                    self.output.extend(listing);
                    return DispatchStatus::Ok;
                }
                match parse_set(&tokens, &mut self.vars) {
                    Ok(()) => DispatchStatus::Ok,
                    Err(msg) => fail(ctx, msg),
                }
            }
            "unset" => {
                let name = args.trim();
                if self.vars.unset(name) {
                    DispatchStatus::Ok
                } else {
                    fail(ctx, format!("unset: no such variable: {name}"))
                }
            }
            "source" => {
                let path = args.trim();
                if path.is_empty() {
                    return fail(ctx, "source: missing file name");
                }
                match ScriptFileSource::open(path) {
                    Ok(src) => {
                        let flags = inherited(ctx.flags()) | ExecFlags::REPEAT;
                        self.nested(ctx, Box::new(src), flags)
                    }
                    Err(e) => fail(ctx, format!("can't open file {path}: {e}")),
                }
            }
            "call" => {
                let tokens = split_args(args);
                let Some((name, call_args)) = tokens.split_first() else {
                    return fail(ctx, "call: missing function name");
                };
                let Some(body) = self.functions.get(name).cloned() else {
                    return fail(ctx, format!("unknown function: {name}"));
                };
                self.vars.push_scope(call_args.to_vec());
                let flags = inherited(ctx.flags()) | ExecFlags::REPEAT;
                let status = self.nested(ctx, Box::new(feed_lines(name.clone(), body)), flags);
                self.vars.pop_scope();
                status
            }
            "exec" => {
                let line = args.trim();
                if line.is_empty() {
                    return DispatchStatus::Ok;
                }
                let src = GenericSource::once(line);
                self.nested(ctx, Box::new(src), inherited(ctx.flags()))
            }
            "again" => {
                ctx.forget_line();
                let Some(last) = ctx.state().last_line.clone() else {
                    return fail(ctx, "again: no previous command");
                };
                self.nested(ctx, Box::new(GenericSource::once(last)), inherited(ctx.flags()))
            }
            "throw" => {
                let (kind, message) = split_word(args);
                if kind.is_empty() {
                    return fail(ctx, "throw: missing exception kind");
                }
                let outcome = ctx.throw(kind, message.trim());
                trace!(?outcome, "throw");
                DispatchStatus::Ok
            }
            "error" => {
                let text = args.trim();
                fail(ctx, if text.is_empty() { "error" } else { text })
            }
            "interrupt" => {
                ctx.state().interrupt();
                DispatchStatus::Ok
            }
            "debug" => match args.trim() {
                "on" => {
                    ctx.state_mut().set_stepping(true);
                    DispatchStatus::Ok
                }
                "off" => {
                    ctx.state_mut().set_stepping(false);
                    DispatchStatus::Ok
                }
                other => fail(ctx, format!("debug: expected on or off, got '{other}'")),
            },
            "quit" => {
                self.quit = true;
                DispatchStatus::Ok
            }
            other => fail(ctx, format!("not a command: {other}")),
        }
    }

    fn nested(
        &mut self,
        ctx: &mut ExecContext<'_>,
        source: Box<dyn LineSource + '_>,
        flags: ExecFlags,
    ) -> DispatchStatus {
        let status = match ctx.run_nested(source, flags, self) {
            Ok(Teardown { reason: StopReason::Error, .. }) => DispatchStatus::Failed,
            Ok(_) => DispatchStatus::Ok,
            // Already reported when the invocation was refused.
            Err(_) => DispatchStatus::Failed,
        };
        // A definition cannot outlive the context that opened it.
        if self.defining.as_ref().is_some_and(|def| def.depth > ctx.depth()) {
            if let Some(def) = self.defining.take() {
                debug!(name = %def.name, lines = def.body.len(), "unterminated function dropped");
                if def.active {
                    return fail(ctx, "missing endfunction");
                }
            }
        }
        status
    }
}

impl Dispatcher for ScriptDispatcher {
    fn dispatch(&mut self, line: &str, ctx: &mut ExecContext<'_>) -> DispatchStatus {
        let trimmed = line.trim();
        let (cmd, args) = split_word(trimmed);
        if self.collect_definition(cmd, line) {
            return DispatchStatus::Ok;
        }
        if trimmed.is_empty() || trimmed.starts_with('"') || trimmed.starts_with(';') {
            return DispatchStatus::Ok;
        }
        if let Some(status) = self.structural(cmd, args, ctx) {
            return status;
        }
        if !ctx.is_executing() {
            trace!(%line, "skipped");
            return DispatchStatus::Ok;
        }
        let args = expand(args, &self.vars);
        self.command(cmd, &args, ctx)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Flags a nested invocation takes over from its caller.
fn inherited(flags: ExecFlags) -> ExecFlags {
    flags & (ExecFlags::VERBOSE | ExecFlags::NOWAIT)
}

fn fail(ctx: &mut ExecContext<'_>, msg: impl Into<String>) -> DispatchStatus {
    ctx.emsg(msg);
    DispatchStatus::Failed
}

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    s.split_once(|c: char| c.is_ascii_whitespace()).unwrap_or((s, ""))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
