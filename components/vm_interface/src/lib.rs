//! Reflection contract between the debugger core and an embedded script VM.
//!
//! This crate defines the types the debugger uses to talk about a live
//! script program without knowing which VM is running it:
//!
//! - [`TypeId`] / [`TypeDecl`] - the declared type surface
//! - [`Addr`] - an opaque address into VM memory or a debugger-owned buffer
//! - [`VmContext`] - the reflection surface a paused execution context
//!   must expose (call stack, locals, globals, memory reads, method calls)
//!
//! The debugger never dereferences raw pointers itself; every memory access
//! goes through [`VmContext`], so a hosting VM decides what is readable.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod addr;
mod reflect;
mod types;

pub use addr::{Addr, BufferId};
pub use reflect::{
    CallOutcome, ExceptionInfo, FrameFunction, FramePos, GlobalDecl, LocalDecl, VmContext,
};
pub use types::{
    type_seq, EnumConstant, FunctionId, MethodDecl, PropertyDecl, TypeDecl, TypeId, TypeKind,
    TypeModifiers,
};
