//! The built-in command language.
//!
//! A small line-oriented language that exercises every part
//! of the engine: nested sourcing, function calls, `try` / `catch` /
//! `finally`, errors, interrupts and single-stepping.
//!
//! # Quick start
//!
//! ```rust
//! use cmdloop::{do_cmdline, BatchSource, ExecFlags, InterpState, ScriptDispatcher};
//!
//! let mut state = InterpState::default();
//! let mut d = ScriptDispatcher::new();
//! let program = BatchSource::from_program("demo", "set x=6\necho x is %x");
//! do_cmdline(&mut state, Box::new(program), ExecFlags::REPEAT, &mut d).unwrap();
//! assert_eq!(d.output, vec!["x is 6"]);
//! ```

pub mod expand;
pub mod interp;

pub use expand::expand;
pub use interp::ScriptDispatcher;
