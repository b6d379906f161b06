//! Declared-type model for the reflection surface.
//!
//! A [`TypeId`] packs a sequence number and flag bits the same way the VM
//! reports them; [`TypeDecl`] is the debugger-visible declaration for one
//! sequence number (fields, methods, enum constants).

use std::fmt;

/// Well-known sequence numbers for the primitive types.
///
/// Sequence numbers at or below [`type_seq::DOUBLE`] are primitives and
/// never have a [`TypeDecl`].
pub mod type_seq {
    /// No type / void return.
    pub const VOID: u32 = 0;
    /// Boolean, one byte.
    pub const BOOL: u32 = 1;
    /// Signed 8-bit integer.
    pub const INT8: u32 = 2;
    /// Signed 16-bit integer.
    pub const INT16: u32 = 3;
    /// Signed 32-bit integer.
    pub const INT32: u32 = 4;
    /// Signed 64-bit integer.
    pub const INT64: u32 = 5;
    /// Unsigned 8-bit integer.
    pub const UINT8: u32 = 6;
    /// Unsigned 16-bit integer.
    pub const UINT16: u32 = 7;
    /// Unsigned 32-bit integer.
    pub const UINT32: u32 = 8;
    /// Unsigned 64-bit integer.
    pub const UINT64: u32 = 9;
    /// 32-bit float.
    pub const FLOAT: u32 = 10;
    /// 64-bit float.
    pub const DOUBLE: u32 = 11;
}

/// A VM type identifier: low 26 bits are the sequence number, high bits
/// are category flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Mask selecting the sequence-number bits.
    pub const SEQ_MASK: u32 = 0x03FF_FFFF;
    /// The value is a handle (indirect, possibly-null object reference).
    pub const HANDLE: u32 = 0x4000_0000;
    /// The value is a handle to a const object.
    pub const HANDLE_TO_CONST: u32 = 0x2000_0000;
    /// The value's field layout is determined per instance.
    pub const SCRIPT_OBJECT: u32 = 0x0800_0000;
    /// The type is a template instantiation.
    pub const TEMPLATE: u32 = 0x1000_0000;

    /// The `void` type.
    pub const VOID: TypeId = TypeId(type_seq::VOID);

    /// Sequence number without any flag bits.
    pub fn seq(self) -> u32 {
        self.0 & Self::SEQ_MASK
    }

    /// Base identity: the handle and const-handle bits masked off.
    ///
    /// Two keys that differ only in handle-ness resolve to the same
    /// registered evaluator.
    pub fn base(self) -> TypeId {
        TypeId(self.0 & !(Self::HANDLE | Self::HANDLE_TO_CONST))
    }

    /// True when this type is a handle and must be dereferenced one level
    /// before its target can be inspected.
    pub fn is_handle(self) -> bool {
        self.0 & (Self::HANDLE | Self::HANDLE_TO_CONST) != 0
    }

    /// True when the value carries its own per-instance field list.
    pub fn is_script_object(self) -> bool {
        self.0 & Self::SCRIPT_OBJECT != 0
    }

    /// True when the type is a template instantiation.
    pub fn is_template(self) -> bool {
        self.0 & Self::TEMPLATE != 0
    }

    /// True when the type is one of the built-in primitives.
    pub fn is_primitive(self) -> bool {
        !self.is_handle() && !self.is_script_object() && self.seq() <= type_seq::DOUBLE
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reference/const modifiers attached to a variable declaration, as
/// reported by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeModifiers(pub u8);

impl TypeModifiers {
    /// No modifiers.
    pub const NONE: TypeModifiers = TypeModifiers(0);
    /// Input reference (`&in`).
    pub const IN_REF: TypeModifiers = TypeModifiers(1);
    /// Output reference (`&out`).
    pub const OUT_REF: TypeModifiers = TypeModifiers(2);
    /// In/out reference (`&`).
    pub const INOUT_REF: TypeModifiers = TypeModifiers(3);
    /// Const qualification.
    pub const CONST: TypeModifiers = TypeModifiers(4);

    /// True when the const bit is set.
    pub fn is_const(self) -> bool {
        self.0 & Self::CONST.0 != 0
    }

    /// The reference bits only.
    pub fn ref_kind(self) -> TypeModifiers {
        TypeModifiers(self.0 & Self::INOUT_REF.0)
    }

    /// Combine two modifier sets.
    pub fn with(self, other: TypeModifiers) -> TypeModifiers {
        TypeModifiers(self.0 | other.0)
    }
}

/// Identifier for a VM function (script or registered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// The broad category a declared type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// An object type with fields and/or methods.
    Object,
    /// An enumeration with declared constants.
    Enum,
    /// A function-reference (funcdef) type.
    Funcdef,
}

/// One declared field of an object type.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    /// Declared field name.
    pub name: String,
    /// Declared field type.
    pub type_id: TypeId,
    /// Byte offset of the field from the (possibly composite-adjusted) base.
    pub offset: u64,
    /// Extra offset applied to the object base before the field offset.
    pub composite_offset: u64,
    /// When true, the composite-adjusted address holds a pointer that must
    /// be followed before the field offset is applied.
    pub is_composite_indirect: bool,
    /// Field cannot be written.
    pub read_only: bool,
}

/// One declared method of an object type.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    /// Declared method name.
    pub name: String,
    /// Callable identifier, usable with [`crate::VmContext::call_method`].
    pub id: FunctionId,
    /// Declared return type.
    pub return_type: TypeId,
}

/// One declared constant of an enumeration type.
#[derive(Debug, Clone)]
pub struct EnumConstant {
    /// Constant name.
    pub name: String,
    /// Constant value.
    pub value: i64,
}

/// The debugger-visible declaration of a non-primitive type.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    /// Declared type name.
    pub name: String,
    /// Size of a value of this type in bytes.
    pub size: usize,
    /// Broad category.
    pub kind: TypeKind,
    /// Declared fields, in declaration order.
    pub properties: Vec<PropertyDecl>,
    /// Declared methods.
    pub methods: Vec<MethodDecl>,
    /// Declared constants, for [`TypeKind::Enum`] types.
    pub enum_constants: Vec<EnumConstant>,
    /// For a template instantiation, the uninstantiated base type.
    pub template_base: Option<TypeId>,
}

impl TypeDecl {
    /// Find a declared method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Find a declared field by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_seq_and_flags() {
        let id = TypeId(TypeId::HANDLE | 0x42);
        assert_eq!(id.seq(), 0x42);
        assert!(id.is_handle());
        assert!(!id.base().is_handle());
        assert_eq!(id.base().seq(), 0x42);
    }

    #[test]
    fn test_type_id_primitive() {
        assert!(TypeId(type_seq::BOOL).is_primitive());
        assert!(TypeId(type_seq::DOUBLE).is_primitive());
        assert!(!TypeId(type_seq::DOUBLE | TypeId::HANDLE).is_primitive());
        assert!(!TypeId(0x100).is_primitive());
    }

    #[test]
    fn test_modifiers() {
        let m = TypeModifiers::CONST.with(TypeModifiers::IN_REF);
        assert!(m.is_const());
        assert_eq!(m.ref_kind(), TypeModifiers::IN_REF);
        assert!(!TypeModifiers::NONE.is_const());
    }

    #[test]
    fn test_type_decl_lookup() {
        let decl = TypeDecl {
            name: "vec3".into(),
            size: 12,
            kind: TypeKind::Object,
            properties: vec![PropertyDecl {
                name: "x".into(),
                type_id: TypeId(type_seq::FLOAT),
                offset: 0,
                composite_offset: 0,
                is_composite_indirect: false,
                read_only: false,
            }],
            methods: vec![],
            enum_constants: vec![],
            template_base: None,
        };
        assert!(decl.property("x").is_some());
        assert!(decl.property("w").is_none());
        assert!(decl.method("opForBegin").is_none());
    }
}
