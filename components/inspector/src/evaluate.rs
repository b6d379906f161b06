//! Display-value evaluation.
//!
//! Dispatch order for a key that survived the sentinel checks:
//! an externally-registered evaluator for the type's base identity, the
//! same for a template instantiation's uninstantiated base, then the
//! built-in fallbacks: primitive, enumeration, function reference, and
//! finally the default object rendering.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use vm_interface::{type_seq, Addr, TypeDecl, TypeId, TypeKind};

use crate::cache::DebugCache;
use crate::expand;
use crate::var::{ExpandKind, Expansion, VarKey, VarValue};

/// A per-type display strategy registered from outside the core.
///
/// An evaluator owns both the value rendering and (optionally) the
/// expansion of every value of its type.
pub trait TypeEvaluator: Send + Sync {
    /// Produce the display value for a key of the registered type.
    fn evaluate(&self, cache: &mut DebugCache, key: VarKey) -> VarValue;

    /// Produce a custom expansion, or `None` to fall through to the
    /// default expansion for the value's [`ExpandKind`].
    fn expand(&self, cache: &mut DebugCache, key: VarKey) -> Option<Expansion> {
        let _ = (cache, key);
        None
    }
}

/// Registry of external per-type evaluator overrides.
///
/// Keys are base identities ([`TypeId::base`]): handle and const bits are
/// masked off, so one registration covers a type and handles to it.
#[derive(Default)]
pub struct EvaluatorRegistry {
    overrides: RwLock<HashMap<u32, Arc<dyn TypeEvaluator>>>,
}

impl EvaluatorRegistry {
    /// An empty registry.
    pub fn new() -> EvaluatorRegistry {
        EvaluatorRegistry::default()
    }

    /// Register an evaluator for a type's base identity, replacing any
    /// previous registration.
    pub fn register(&self, type_id: TypeId, evaluator: Arc<dyn TypeEvaluator>) {
        self.overrides
            .write()
            .insert(type_id.base().0, evaluator);
    }

    fn lookup(&self, type_id: TypeId) -> Option<Arc<dyn TypeEvaluator>> {
        self.overrides.read().get(&type_id.base().0).cloned()
    }
}

/// Find the override for a type, retrying a template instantiation with
/// its uninstantiated base.
pub(crate) fn override_for(cache: &DebugCache, type_id: TypeId) -> Option<Arc<dyn TypeEvaluator>> {
    let registry = cache.registry();
    if let Some(ev) = registry.lookup(type_id) {
        return Some(ev);
    }
    if type_id.is_template() {
        let base = cache.ctx().type_decl(type_id)?.template_base?;
        return registry.lookup(base);
    }
    None
}

/// Compute the display value for a freshly created state. Sentinel keys
/// never reach this point.
pub(crate) fn display_value(cache: &mut DebugCache, key: VarKey) -> VarValue {
    if let Some(ev) = override_for(cache, key.type_id) {
        return ev.evaluate(cache, key);
    }

    if key.type_id.is_primitive() {
        return primitive_value(cache, key);
    }

    let Some(decl) = cache.ctx().type_decl(key.type_id) else {
        return VarValue::muted("???");
    };
    match decl.kind {
        TypeKind::Enum => enum_value(cache, key, &decl),
        TypeKind::Funcdef => funcdef_value(cache, key),
        TypeKind::Object => object_value(cache, key, &decl),
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

fn primitive_value(cache: &DebugCache, key: VarKey) -> VarValue {
    let size = cache.ctx().primitive_size(key.type_id);
    let Some(bytes) = cache.read(key.addr, size) else {
        return VarValue::muted("uninit");
    };

    let text = match key.type_id.seq() {
        type_seq::BOOL => Some(if bytes.first().copied().unwrap_or(0) != 0 {
            "true".to_string()
        } else {
            "false".to_string()
        }),
        type_seq::INT8 => fixed::<1>(&bytes).map(|b| (b[0] as i8).to_string()),
        type_seq::INT16 => fixed::<2>(&bytes).map(|b| i16::from_le_bytes(b).to_string()),
        type_seq::INT32 => fixed::<4>(&bytes).map(|b| i32::from_le_bytes(b).to_string()),
        type_seq::INT64 => fixed::<8>(&bytes).map(|b| i64::from_le_bytes(b).to_string()),
        type_seq::UINT8 => fixed::<1>(&bytes).map(|b| b[0].to_string()),
        type_seq::UINT16 => fixed::<2>(&bytes).map(|b| u16::from_le_bytes(b).to_string()),
        type_seq::UINT32 => fixed::<4>(&bytes).map(|b| u32::from_le_bytes(b).to_string()),
        type_seq::UINT64 => fixed::<8>(&bytes).map(|b| u64::from_le_bytes(b).to_string()),
        type_seq::FLOAT => fixed::<4>(&bytes).map(|b| f32::from_le_bytes(b).to_string()),
        type_seq::DOUBLE => fixed::<8>(&bytes).map(|b| f64::from_le_bytes(b).to_string()),
        _ => None,
    };

    match text {
        Some(t) => VarValue::plain(t),
        None => VarValue::muted("???"),
    }
}

fn enum_value(cache: &DebugCache, key: VarKey, decl: &TypeDecl) -> VarValue {
    let Some(bytes) = cache.read(key.addr, 4) else {
        return VarValue::muted("uninit");
    };
    let Some(arr) = fixed::<4>(&bytes) else {
        return VarValue::muted("???");
    };
    let raw = i32::from_le_bytes(arr);

    // a single exact constant match wins outright
    if let Some(constant) = decl.enum_constants.iter().find(|c| c.value == raw as i64) {
        return VarValue::plain(format!("{} ({})", constant.name, raw));
    }

    let bits = (raw as u32).count_ones();
    if bits >= 2 {
        VarValue::muted(format!("{bits} bits")).expands(ExpandKind::Bits)
    } else {
        VarValue::plain(raw.to_string())
    }
}

fn funcdef_value(cache: &DebugCache, key: VarKey) -> VarValue {
    let Addr::Vm(addr) = key.addr else {
        return VarValue::muted("null");
    };
    match cache.ctx().read_func_ref(addr) {
        Some(func) => match cache.ctx().function_name(func) {
            Some(name) => VarValue::plain(name),
            None => VarValue::muted("null"),
        },
        None => VarValue::muted("null"),
    }
}

fn object_value(cache: &DebugCache, key: VarKey, decl: &TypeDecl) -> VarValue {
    let mut can_expand = !decl.properties.is_empty();
    if key.type_id.is_script_object() {
        if let Addr::Vm(obj) = key.addr {
            can_expand |= cache.ctx().object_field_count(obj).unwrap_or(0) > 0;
        }
    }

    let mut value = VarValue::default();
    if let Some(begin) = decl.method("opForBegin") {
        if begin.return_type.seq() != type_seq::UINT32 {
            let kind = if can_expand {
                ExpandKind::Children
            } else {
                ExpandKind::None
            };
            return VarValue::muted("(unsup. iterator)").expands(kind);
        }
        if let Some(count) = expand::foreach_count(cache, decl, key.addr) {
            value = VarValue::muted(format!("{count} elements"));
            if count > 0 {
                can_expand = true;
            }
        }
    }

    if can_expand {
        value.expand = ExpandKind::Children;
    }
    value
}
