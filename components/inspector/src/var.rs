//! Cached variable records.

use vm_interface::{Addr, BufferId, TypeId};

/// Cache identity of an inspected value.
///
/// Keys compare by declared type, constness and address, never by name,
/// so two variables aliasing the same memory share one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarKey {
    /// Declared type of the value.
    pub type_id: TypeId,
    /// Const qualification of the declaration.
    pub is_const: bool,
    /// Resolved address. Handles are dereferenced one level before the
    /// key is formed, so this is the target object's address.
    pub addr: Addr,
}

/// How a displayed value can be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpandKind {
    /// Not expandable.
    #[default]
    None,
    /// Expands to child variables (fields or iterated elements).
    Children,
    /// Expands to a list of set bits (multi-bit enum values).
    Bits,
    /// Expands to the full raw text of the value.
    Raw,
}

/// A rendered value, ready for a value column.
#[derive(Debug, Clone, Default)]
pub struct VarValue {
    /// Display text; may be empty for plain expandable objects.
    pub text: String,
    /// Render greyed/disabled (sentinels, computed summaries).
    pub disabled: bool,
    /// How this value expands.
    pub expand: ExpandKind,
}

impl VarValue {
    /// A plain, enabled, non-expandable value.
    pub fn plain(text: impl Into<String>) -> VarValue {
        VarValue {
            text: text.into(),
            ..VarValue::default()
        }
    }

    /// A greyed, non-expandable value (sentinels and summaries).
    pub fn muted(text: impl Into<String>) -> VarValue {
        VarValue {
            text: text.into(),
            disabled: true,
            ..VarValue::default()
        }
    }

    /// Same value with a different expansion kind.
    pub fn expands(mut self, kind: ExpandKind) -> VarValue {
        self.expand = kind;
        self
    }
}

/// The computed expansion of a cached value.
#[derive(Debug, Clone)]
pub enum Expansion {
    /// Named child variables.
    Children(Vec<VarView>),
    /// Bit-list entries: the raw value first, then one entry per set bit.
    Bits(Vec<String>),
    /// The full raw text.
    Raw(String),
}

impl Expansion {
    /// The child views, when this is a [`Expansion::Children`].
    pub fn children(&self) -> &[VarView] {
        match self {
            Expansion::Children(c) => c,
            _ => &[],
        }
    }
}

/// Cached state of one distinct value.
///
/// One `VarState` exists per distinct [`VarKey`] per cache lifetime. The
/// display value is computed when the state is first created; the
/// expansion strictly on the first request.
#[derive(Debug, Clone)]
pub struct VarState {
    /// The rendered display value.
    pub value: VarValue,
    /// Backing buffer, when the value was byte-copied out of a transient
    /// return value.
    pub buffer: Option<BufferId>,
    /// `Some` once the expansion has been computed.
    pub expansion: Option<Expansion>,
}

impl VarState {
    pub(crate) fn new(value: VarValue) -> VarState {
        VarState {
            value,
            buffer: None,
            expansion: None,
        }
    }
}

/// A named reference to a cached state.
///
/// Many views may reference one state; the view owns the name and type
/// text while the state owns the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarView {
    /// Display name (variable name, field name, or element index).
    pub name: String,
    /// Rendered type text.
    pub type_name: String,
    /// Key of the referenced state.
    pub key: VarKey,
}

/// Which group of a frame's variable slots a local belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalCategory {
    /// Function parameter (includes the implicit receiver).
    Parameter,
    /// Named local variable.
    Variable,
    /// Unnamed compiler-generated temporary.
    Temporary,
}

/// Key for one lazily-built locals group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalKey {
    /// Call-stack frame index (0 = innermost).
    pub frame: usize,
    /// Slot category within the frame.
    pub category: LocalCategory,
}
