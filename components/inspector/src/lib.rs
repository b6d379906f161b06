//! Variable inspection and caching for the script debugger.
//!
//! Everything the debugger shows for one paused session lives in a
//! [`DebugCache`]: the call stack, locals partitioned by category, globals,
//! watch entries, and one [`VarState`] per distinct (type, constness,
//! address) key. The cache is built fresh on every suspend and pins the
//! paused VM context alive for its own lifetime; values and children are
//! computed lazily on first request and memoized after that.
//!
//! Value formatting is dispatched through an [`EvaluatorRegistry`], which
//! supports per-type overrides on top of the built-in fallbacks for
//! primitives, enums, function references and plain objects.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod cache;
mod evaluate;
mod expand;
mod expr;
mod resolve;
mod var;

pub use cache::{DebugCache, StackEntry, WatchEntry};
pub use evaluate::{EvaluatorRegistry, TypeEvaluator};
pub use expr::{evaluate_expression, Evaluated, ExprError};
pub use var::{ExpandKind, Expansion, LocalCategory, LocalKey, VarKey, VarState, VarValue, VarView};
