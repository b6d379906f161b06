//! Execution control for the script debugger.
//!
//! The [`Debugger`] owns the stepping state machine and the breakpoint
//! set, and mediates between two threads: the VM thread, which invokes
//! [`Debugger::on_statement`] synchronously before every source statement
//! and blocks inside it while suspended, and a control thread, which
//! issues stepping/continue/breakpoint commands and reads the active
//! [`inspector::DebugCache`] to render.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod breakpoints;
mod control;

pub use breakpoints::Breakpoint;
pub use control::{Action, Debugger};
