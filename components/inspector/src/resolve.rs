//! Field address resolution.

use vm_interface::{Addr, PropertyDecl};

use crate::cache::DebugCache;

/// Resolve the address of a declared field of an object at `base`.
///
/// The composite offset is applied first; for a composite-indirect field
/// the resulting location holds a pointer that is followed before the
/// field offset is applied. `None` means that intermediate pointer was
/// null (or unreadable); the field reads as a null result, never as an
/// access at an invalid offset.
pub(crate) fn property_address(
    cache: &DebugCache,
    base: Addr,
    prop: &PropertyDecl,
) -> Option<Addr> {
    if base.is_null() {
        return Some(Addr::Null);
    }
    let addr = base.offset(prop.composite_offset);
    let addr = if prop.is_composite_indirect {
        match cache.read_ptr(addr) {
            Some(target) if target != 0 => Addr::Vm(target),
            _ => return None,
        }
    } else {
        addr
    };
    Some(addr.offset(prop.offset))
}
