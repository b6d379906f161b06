//! The reflection surface a paused execution context must expose.

use std::sync::Arc;

use crate::types::{FunctionId, TypeDecl, TypeId, TypeModifiers};

/// A source position inside a script section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePos {
    /// Section (source file) identifier.
    pub section: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// The function executing in one call-stack frame.
#[derive(Debug, Clone)]
pub struct FrameFunction {
    /// Bare function name, used for function-name breakpoints.
    pub name: String,
    /// Full declaration text, used when rendering the call stack.
    pub declaration: String,
    /// Number of declared parameters; locals below this count are
    /// parameters.
    pub param_count: usize,
}

/// Details of the exception the context is currently unwinding, if any.
#[derive(Debug, Clone)]
pub struct ExceptionInfo {
    /// Where the exception was raised.
    pub pos: FramePos,
    /// Name of the function that raised it.
    pub function: String,
    /// Human-readable description.
    pub description: String,
}

/// Declaration info for one local variable slot.
#[derive(Debug, Clone)]
pub struct LocalDecl {
    /// Declared name; empty for compiler-generated temporaries.
    pub name: String,
    /// Declared type.
    pub type_id: TypeId,
    /// Reference/const modifiers.
    pub modifiers: TypeModifiers,
    /// Offset of the slot on the VM stack, used to label unnamed slots.
    pub stack_offset: i32,
}

/// Declaration info for one module-level global variable.
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub type_id: TypeId,
    /// Const qualification.
    pub is_const: bool,
    /// Raw VM address of the global's storage.
    pub address: u64,
}

/// Marshalled result of a debugger-issued method call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Declared return type of the called function.
    pub return_type: TypeId,
    /// VM address of the return value, when it is independently
    /// addressable. `None` means the bytes below are the only copy and
    /// must be buffered before they can be cached.
    pub address: Option<u64>,
    /// Raw bytes of the return slot.
    pub bytes: Vec<u8>,
}

/// Reflection over one paused execution context and its engine.
///
/// Holding the `Arc<dyn VmContext>` pins the context: the host must keep
/// the paused context (and every address it has reported) alive until the
/// last clone is dropped. Implementations synchronize internally; reads may
/// come from a different thread than the one blocked inside the VM.
pub trait VmContext: Send + Sync {
    // --- type surface ---

    /// Declaration for a non-primitive type, looked up by sequence number.
    fn type_decl(&self, id: TypeId) -> Option<Arc<TypeDecl>>;

    /// Size in bytes of a primitive type.
    fn primitive_size(&self, id: TypeId) -> usize;

    /// Name of a function, for funcdef display.
    fn function_name(&self, id: FunctionId) -> Option<String>;

    /// Sections declared by all known module functions; the default
    /// population source for the section registry.
    fn declared_sections(&self) -> Vec<String>;

    // --- memory ---

    /// Read raw bytes from VM memory. `None` when the range is not
    /// readable.
    fn read_bytes(&self, addr: u64, len: usize) -> Option<Vec<u8>>;

    /// Read a pointer-sized value from VM memory. `Some(0)` is a readable
    /// null pointer; `None` means the location itself is unreadable.
    fn read_ptr(&self, addr: u64) -> Option<u64>;

    /// Read a function reference. `None` when the reference is null.
    fn read_func_ref(&self, addr: u64) -> Option<FunctionId>;

    // --- call stack ---

    /// Number of script frames on the call stack.
    fn stack_size(&self) -> usize;

    /// Function executing in the given frame (0 = innermost).
    fn frame_function(&self, frame: usize) -> Option<FrameFunction>;

    /// Current position of the given frame.
    fn frame_position(&self, frame: usize) -> Option<FramePos>;

    /// Declaration of the non-script function currently being called, if
    /// the VM is inside one.
    fn system_function(&self) -> Option<String>;

    /// The exception being unwound, if the context is in an exception
    /// state.
    fn exception(&self) -> Option<ExceptionInfo>;

    // --- locals & globals ---

    /// Number of variable slots in a frame.
    fn var_count(&self, frame: usize) -> usize;

    /// Declaration info for one slot.
    fn var_decl(&self, slot: usize, frame: usize) -> Option<LocalDecl>;

    /// Address of one slot's storage; `None` for slots with no storage
    /// yet.
    fn var_addr(&self, slot: usize, frame: usize) -> Option<u64>;

    /// Whether the slot is in scope at the frame's current position.
    fn var_in_scope(&self, slot: usize, frame: usize) -> bool;

    /// The frame's implicit receiver, if the function is a method.
    fn this_ptr(&self, frame: usize) -> Option<(TypeId, u64)>;

    /// All module-level globals.
    fn globals(&self) -> Vec<GlobalDecl>;

    // --- script objects ---

    /// Runtime field count of a script object instance. Script objects
    /// carry their own field list, which may differ from the declared
    /// type's.
    fn object_field_count(&self, object: u64) -> Option<usize>;

    /// Address of one runtime field of a script object instance.
    fn object_field_addr(&self, object: u64, index: usize) -> Option<u64>;

    // --- invocation ---

    /// Synchronously invoke a method on an object with an optional u32
    /// argument, returning the marshalled result. Used to drive the
    /// for-each protocol. `None` when the call faulted.
    fn call_method(&self, func: FunctionId, object: u64, arg: Option<u32>) -> Option<CallOutcome>;

    // --- hook control ---

    /// Detach the per-statement hook from this context. Called when
    /// further hook invocations are no longer wanted (or guaranteed),
    /// e.g. once the context enters an exception state.
    fn clear_statement_hook(&self);
}
