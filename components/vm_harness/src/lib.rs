//! Scripted in-memory VM for exercising the debugger core.
//!
//! [`HarnessVm`] implements the full [`vm_interface::VmContext`] surface
//! over a flat byte array: tests allocate storage, register types, lay
//! out frames and globals by hand, then inspect them through the real
//! cache. [`run_script`] drives a sequence of [`ScriptOp`]s on a separate
//! thread, invoking a statement hook the way a live VM would, for
//! stepping and breakpoint tests.
//!
//! Every `VmContext` call is counted, so tests can assert that a cached
//! read issues zero additional reflection calls.

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod script;
mod vm;

pub use script::{run_script, ScriptOp};
pub use vm::{HarnessVm, IterElement};
