//! Lazy expansion of cached values.
//!
//! Children are computed exactly once per cache lifetime: field children
//! come from the live type's declared fields (the runtime instance's own
//! field list for script objects), element children from driving the
//! for-each protocol (`opForBegin`/`opForEnd`/`opForNext` plus one or more
//! `opForValue` accessors).

use vm_interface::{type_seq, Addr, FunctionId, MethodDecl, TypeDecl, TypeModifiers, VmContext};

use crate::cache::DebugCache;
use crate::evaluate;
use crate::resolve;
use crate::var::{ExpandKind, Expansion, VarKey, VarView};

/// Compute the expansion of a cached value. The caller memoizes the
/// result; this runs at most once per key per cache.
pub(crate) fn query(cache: &mut DebugCache, key: VarKey) -> Expansion {
    // a registered evaluator may own the whole expansion
    if let Some(ev) = evaluate::override_for(cache, key.type_id) {
        if let Some(expansion) = ev.expand(cache, key) {
            return expansion;
        }
    }

    let kind = cache
        .state(key)
        .map(|s| s.value.expand)
        .unwrap_or(ExpandKind::None);
    match kind {
        ExpandKind::None => Expansion::Children(Vec::new()),
        ExpandKind::Raw => {
            let text = cache
                .state(key)
                .map(|s| s.value.text.clone())
                .unwrap_or_default();
            Expansion::Raw(text)
        }
        ExpandKind::Bits => enum_bits(cache, key),
        ExpandKind::Children => object_children(cache, key),
    }
}

/// Bit-list expansion of a multi-bit enum value: the raw value first,
/// then one entry per set bit, named by a declared single-bit constant
/// when one matches.
fn enum_bits(cache: &mut DebugCache, key: VarKey) -> Expansion {
    let Some(decl) = cache.ctx().type_decl(key.type_id) else {
        return Expansion::Bits(Vec::new());
    };
    let raw = cache
        .read(key.addr, 4)
        .and_then(|b| b.try_into().ok().map(u32::from_le_bytes))
        .unwrap_or(0);

    let mut entries = vec![format!("value: {raw}")];
    let mut index = 0;
    for bit in 0..32 {
        let value = 1u32 << bit;
        if raw & value == 0 {
            continue;
        }
        let name = decl
            .enum_constants
            .iter()
            .find(|c| c.value == value as i64)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| value.to_string());
        entries.push(format!("[{index}] {name}"));
        index += 1;
    }
    Expansion::Bits(entries)
}

fn object_children(cache: &mut DebugCache, key: VarKey) -> Expansion {
    let Some(decl) = cache.ctx().type_decl(key.type_id) else {
        return Expansion::Children(Vec::new());
    };
    let mut children = Vec::new();
    field_children(cache, key, &decl, &mut children);
    foreach_children(cache, key, &decl, &mut children);
    Expansion::Children(children)
}

fn field_children(cache: &mut DebugCache, key: VarKey, decl: &TypeDecl, out: &mut Vec<VarView>) {
    let script_obj = key.type_id.is_script_object();
    let count = if script_obj {
        // a script object's instance carries its own field list
        match key.addr {
            Addr::Vm(obj) => cache
                .ctx()
                .object_field_count(obj)
                .unwrap_or(decl.properties.len()),
            _ => decl.properties.len(),
        }
    } else {
        decl.properties.len()
    };

    for index in 0..count {
        let Some(prop) = decl.properties.get(index) else {
            break;
        };
        let resolved = if script_obj {
            match key.addr {
                Addr::Vm(obj) => Some(
                    cache
                        .ctx()
                        .object_field_addr(obj, index)
                        .map(Addr::vm)
                        .unwrap_or(Addr::Null),
                ),
                _ => Some(Addr::Null),
            }
        } else {
            resolve::property_address(cache, key.addr, prop)
        };

        let type_name = cache.type_name(prop.type_id, TypeModifiers::NONE);
        let child_key = match resolved {
            None => {
                // null intermediate pointer: the field reads as "(null)"
                let (_, k) = cache.intern_sentinel(prop.type_id, prop.read_only, "(null)");
                k
            }
            Some(addr) => {
                let (existed, k) = cache.lookup_or_create(prop.type_id, prop.read_only, addr);
                // fields aliasing already-cached memory are skipped; the
                // first key wins, which can mask a legitimately distinct
                // nested field behind an outer alias (known limitation,
                // no tie-break defined)
                if existed && !addr.is_null() {
                    continue;
                }
                k
            }
        };
        out.push(VarView {
            name: prop.name.clone(),
            type_name,
            key: child_key,
        });
    }
}

fn value_accessors(decl: &TypeDecl) -> Vec<MethodDecl> {
    if let Some(single) = decl.method("opForValue") {
        return vec![single.clone()];
    }
    let mut accessors = Vec::new();
    for i in 0.. {
        match decl.method(&format!("opForValue{i}")) {
            Some(m) => accessors.push(m.clone()),
            None => break,
        }
    }
    accessors
}

fn call_u32(ctx: &dyn VmContext, func: FunctionId, object: u64, arg: Option<u32>) -> Option<u32> {
    let outcome = ctx.call_method(func, object, arg)?;
    outcome
        .bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn call_bool(ctx: &dyn VmContext, func: FunctionId, object: u64, arg: Option<u32>) -> Option<bool> {
    let outcome = ctx.call_method(func, object, arg)?;
    outcome.bytes.first().map(|b| *b != 0)
}

/// Count the elements of a for-each iterable by fully driving the
/// protocol once. `None` when the protocol is absent, the address is not
/// in VM memory, or a call faults.
pub(crate) fn foreach_count(cache: &DebugCache, decl: &TypeDecl, addr: Addr) -> Option<usize> {
    let begin = decl.method("opForBegin")?;
    if begin.return_type.seq() != type_seq::UINT32 {
        return None;
    }
    let end = decl.method("opForEnd")?;
    let next = decl.method("opForNext")?;
    let Addr::Vm(obj) = addr else {
        return None;
    };
    let ctx = &**cache.ctx();

    let mut iter = call_u32(ctx, begin.id, obj, None)?;
    let mut count = 0;
    loop {
        if call_bool(ctx, end.id, obj, Some(iter))? {
            break;
        }
        iter = call_u32(ctx, next.id, obj, Some(iter))?;
        count += 1;
    }
    Some(count)
}

fn foreach_children(cache: &mut DebugCache, key: VarKey, decl: &TypeDecl, out: &mut Vec<VarView>) {
    let Some(begin) = decl.method("opForBegin") else {
        return;
    };
    if begin.return_type.seq() != type_seq::UINT32 {
        return;
    }
    let (Some(end), Some(next)) = (decl.method("opForEnd"), decl.method("opForNext")) else {
        return;
    };
    let accessors = value_accessors(decl);
    if accessors.is_empty() {
        return;
    }
    let Addr::Vm(obj) = key.addr else {
        return;
    };
    let ctx = cache.ctx().clone();

    let Some(mut iter) = call_u32(&*ctx, begin.id, obj, None) else {
        return;
    };
    let mut index = 0usize;
    loop {
        match call_bool(&*ctx, end.id, obj, Some(iter)) {
            Some(false) => {}
            // finished, or the call faulted: keep whatever we have
            _ => break,
        }

        for (sub, accessor) in accessors.iter().enumerate() {
            let Some(outcome) = ctx.call_method(accessor.id, obj, Some(iter)) else {
                return;
            };
            let addr = match outcome.address {
                Some(a) => Addr::vm(a),
                None => {
                    // a transient return value has no address of its own;
                    // copy the bytes somewhere the cache owns
                    let size = ctx
                        .type_decl(outcome.return_type)
                        .map(|d| d.size)
                        .unwrap_or_else(|| ctx.primitive_size(outcome.return_type));
                    let mut bytes = outcome.bytes.clone();
                    bytes.resize(size, 0);
                    let id = cache.alloc_buffer(bytes);
                    Addr::Buffer { id, offset: 0 }
                }
            };
            let (existed, child_key) = cache.lookup_or_create(outcome.return_type, false, addr);
            if !existed {
                if let Addr::Buffer { id, .. } = addr {
                    cache.attach_buffer(child_key, id);
                }
            }
            let name = if accessors.len() > 1 {
                format!("[{index},{sub}]")
            } else {
                format!("[{index}]")
            };
            let type_name = cache.type_name(outcome.return_type, TypeModifiers::NONE);
            out.push(VarView {
                name,
                type_name,
                key: child_key,
            });
        }

        match call_u32(&*ctx, next.id, obj, Some(iter)) {
            Some(v) => iter = v,
            None => break,
        }
        index += 1;
    }
}
