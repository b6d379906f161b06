//! Dotted-path expression evaluation.
//!
//! Grammar: `root('.'field)*`. Roots are `&<N>` (a direct local slot
//! index), `this`, or a bare identifier looked up in order: in-scope
//! locals of the frame (most recently declared first), fields of `this`,
//! then module globals. Subscript expressions are not supported and fail
//! with a dedicated error rather than a parse attempt.

use thiserror::Error;
use vm_interface::{Addr, TypeId, TypeModifiers};

use crate::cache::DebugCache;
use crate::resolve;
use crate::var::VarKey;

/// Why an expression did not resolve. All of these are non-fatal; the
/// caller reports them and moves on.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The expression was empty or had an empty segment.
    #[error("empty expression")]
    Empty,
    /// A `[` or `]` appeared; indexed access is not supported.
    #[error("subscript expressions are not supported")]
    Subscript,
    /// The requested frame does not exist.
    #[error("frame {0} is out of range")]
    FrameOutOfRange(usize),
    /// The root identifier matched nothing.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    /// An `&N` root did not parse as a slot index.
    #[error("invalid slot reference `{0}`")]
    BadSlotIndex(String),
    /// An `&N` root named a slot the frame does not have.
    #[error("slot {0} is out of range")]
    SlotOutOfRange(usize),
    /// An `&N` root named a slot that is not in scope here.
    #[error("slot {0} is not in scope")]
    SlotOutOfScope(usize),
    /// A `.field` segment named no declared field.
    #[error("type `{type_name}` has no field `{field}`")]
    NoSuchField {
        /// The type searched.
        type_name: String,
        /// The field that was not found.
        field: String,
    },
    /// A `.field` segment was applied to a type with no fields.
    #[error("`{0}` cannot be drilled into")]
    NotDrillable(String),
}

/// A successfully resolved expression.
#[derive(Debug, Clone)]
pub struct Evaluated {
    /// Cache key of the resolved value.
    pub key: VarKey,
    /// Rendered type text.
    pub type_name: String,
    /// Formatted display value.
    pub value: String,
}

enum Root {
    At(TypeId, bool, Addr),
    /// Resolution hit a null intermediate pointer; terminal null result.
    NullResult(TypeId, bool),
}

/// Resolve a dotted expression against a frame of the paused session.
pub fn evaluate_expression(
    cache: &mut DebugCache,
    frame: usize,
    expression: &str,
) -> Result<Evaluated, ExprError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ExprError::Empty);
    }
    if expression.contains('[') || expression.contains(']') {
        return Err(ExprError::Subscript);
    }
    if frame >= cache.ctx().stack_size() {
        return Err(ExprError::FrameOutOfRange(frame));
    }

    let mut segments = expression.split('.').map(str::trim);
    let root = segments.next().ok_or(ExprError::Empty)?;
    if root.is_empty() {
        return Err(ExprError::Empty);
    }

    let (mut type_id, mut is_const, mut addr) = match resolve_root(cache, frame, root)? {
        Root::At(t, c, a) => (t, c, a),
        Root::NullResult(t, c) => return Ok(null_result(cache, t, c)),
    };

    for segment in segments {
        if segment.is_empty() {
            return Err(ExprError::Empty);
        }

        // a handle must be followed before its fields can be reached
        let base = if type_id.is_handle() {
            match cache.read_ptr(addr) {
                Some(target) if target != 0 => Addr::Vm(target),
                _ => return Ok(null_result(cache, type_id, is_const)),
            }
        } else {
            addr
        };

        let Some(decl) = cache.ctx().type_decl(type_id) else {
            let name = cache.type_name(type_id, TypeModifiers::NONE);
            return Err(ExprError::NotDrillable(name));
        };
        let Some(prop) = decl.property(segment) else {
            return Err(ExprError::NoSuchField {
                type_name: decl.name.clone(),
                field: segment.to_string(),
            });
        };

        match resolve::property_address(cache, base, prop) {
            Some(a) => {
                type_id = prop.type_id;
                is_const = prop.read_only;
                addr = a;
            }
            None => return Ok(null_result(cache, prop.type_id, prop.read_only)),
        }
    }

    let (_, key) = cache.lookup_or_create(type_id, is_const, addr);
    let value = cache
        .state(key)
        .map(|s| s.value.text.clone())
        .unwrap_or_default();
    let modifiers = if is_const {
        TypeModifiers::CONST
    } else {
        TypeModifiers::NONE
    };
    Ok(Evaluated {
        key,
        type_name: cache.type_name(type_id, modifiers),
        value,
    })
}

fn null_result(cache: &mut DebugCache, type_id: TypeId, is_const: bool) -> Evaluated {
    let (_, key) = cache.intern_sentinel(type_id, is_const, "(null)");
    Evaluated {
        key,
        type_name: cache.type_name(type_id, TypeModifiers::NONE),
        value: "(null)".to_string(),
    }
}

fn resolve_root(cache: &mut DebugCache, frame: usize, root: &str) -> Result<Root, ExprError> {
    let ctx = cache.ctx().clone();

    // direct slot reference
    if let Some(rest) = root.strip_prefix('&') {
        let slot: usize = rest
            .trim()
            .parse()
            .map_err(|_| ExprError::BadSlotIndex(root.to_string()))?;
        if slot >= ctx.var_count(frame) {
            return Err(ExprError::SlotOutOfRange(slot));
        }
        if !ctx.var_in_scope(slot, frame) {
            return Err(ExprError::SlotOutOfScope(slot));
        }
        let decl = ctx
            .var_decl(slot, frame)
            .ok_or(ExprError::SlotOutOfRange(slot))?;
        let addr = ctx.var_addr(slot, frame).map(Addr::vm).unwrap_or(Addr::Null);
        return Ok(Root::At(decl.type_id, decl.modifiers.is_const(), addr));
    }

    if root == "this" {
        return match ctx.this_ptr(frame) {
            Some((type_id, addr)) => Ok(Root::At(type_id, false, Addr::vm(addr))),
            None => Err(ExprError::UnknownIdentifier("this".to_string())),
        };
    }

    // in-scope locals, most recently declared first
    for slot in (0..ctx.var_count(frame)).rev() {
        if !ctx.var_in_scope(slot, frame) {
            continue;
        }
        let Some(decl) = ctx.var_decl(slot, frame) else {
            continue;
        };
        if decl.name == root {
            let addr = ctx.var_addr(slot, frame).map(Addr::vm).unwrap_or(Addr::Null);
            return Ok(Root::At(decl.type_id, decl.modifiers.is_const(), addr));
        }
    }

    // fields of `this`
    if let Some((this_type, this_addr)) = ctx.this_ptr(frame) {
        if let Some(decl) = ctx.type_decl(this_type) {
            if let Some(prop) = decl.property(root) {
                return match resolve::property_address(cache, Addr::vm(this_addr), prop) {
                    Some(addr) => Ok(Root::At(prop.type_id, prop.read_only, addr)),
                    None => Ok(Root::NullResult(prop.type_id, prop.read_only)),
                };
            }
        }
    }

    // module globals
    for global in ctx.globals() {
        if global.name == root {
            return Ok(Root::At(
                global.type_id,
                global.is_const,
                Addr::vm(global.address),
            ));
        }
    }

    Err(ExprError::UnknownIdentifier(root.to_string()))
}
