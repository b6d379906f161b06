//! The in-memory VM.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vm_interface::{
    type_seq, CallOutcome, EnumConstant, ExceptionInfo, FrameFunction, FramePos, FunctionId,
    GlobalDecl, LocalDecl, MethodDecl, PropertyDecl, TypeDecl, TypeId, TypeKind, TypeModifiers,
    VmContext,
};

/// One value produced by a for-each value accessor.
#[derive(Debug, Clone)]
pub struct IterElement {
    /// Declared type of the produced value.
    pub type_id: TypeId,
    /// Address of the value, when it is independently addressable.
    pub address: Option<u64>,
    /// Raw bytes of the return slot.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Slot {
    decl: LocalDecl,
    addr: u64,
    in_scope: bool,
}

#[derive(Debug, Clone)]
struct Frame {
    function: FrameFunction,
    pos: FramePos,
    this: Option<(TypeId, u64)>,
    vars: Vec<Slot>,
}

#[derive(Clone, Copy)]
enum IterRole {
    Begin,
    End,
    Next,
    Value(usize),
}

struct VmState {
    memory: Vec<u8>,
    next_addr: u64,
    types: HashMap<u32, Arc<TypeDecl>>,
    next_seq: u32,
    functions: HashMap<FunctionId, String>,
    next_func: u32,
    iter_roles: HashMap<FunctionId, IterRole>,
    iterables: HashMap<u64, Vec<Vec<IterElement>>>,
    faulting_calls: Vec<FunctionId>,
    object_fields: HashMap<u64, Vec<u64>>,
    /// Innermost frame last.
    frames: Vec<Frame>,
    globals: Vec<GlobalDecl>,
    sections: Vec<String>,
    system_function: Option<String>,
    exception: Option<ExceptionInfo>,
    call_observer: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// A scripted VM whose entire state is laid out by the test.
pub struct HarnessVm {
    state: Mutex<VmState>,
    reflection_calls: AtomicUsize,
    hook_attached: AtomicBool,
}

impl Default for HarnessVm {
    fn default() -> HarnessVm {
        HarnessVm::new()
    }
}

impl HarnessVm {
    /// A VM with 64 KiB of zeroed memory. Address 0 stays reserved as
    /// the null pointer.
    pub fn new() -> HarnessVm {
        HarnessVm {
            state: Mutex::new(VmState {
                memory: vec![0; 0x1_0000],
                next_addr: 0x100,
                types: HashMap::new(),
                next_seq: 0x100,
                functions: HashMap::new(),
                next_func: 1,
                iter_roles: HashMap::new(),
                iterables: HashMap::new(),
                faulting_calls: Vec::new(),
                object_fields: HashMap::new(),
                frames: Vec::new(),
                globals: Vec::new(),
                sections: Vec::new(),
                system_function: None,
                exception: None,
                call_observer: None,
            }),
            reflection_calls: AtomicUsize::new(0),
            hook_attached: AtomicBool::new(false),
        }
    }

    fn count(&self) {
        self.reflection_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Total `VmContext` calls issued so far.
    pub fn reflection_calls(&self) -> usize {
        self.reflection_calls.load(Ordering::Relaxed)
    }

    /// Reset the reflection-call counter.
    pub fn reset_reflection_calls(&self) {
        self.reflection_calls.store(0, Ordering::Relaxed);
    }

    // --- memory ---

    /// Allocate zeroed storage; returns its address.
    pub fn alloc(&self, size: usize) -> u64 {
        let mut state = self.state.lock();
        let addr = state.next_addr;
        state.next_addr += (size as u64).max(8);
        addr
    }

    /// Allocate storage initialized with `data`.
    pub fn alloc_bytes(&self, data: &[u8]) -> u64 {
        let addr = self.alloc(data.len());
        self.write(addr, data);
        addr
    }

    /// Overwrite memory at `addr`.
    pub fn write(&self, addr: u64, data: &[u8]) {
        let mut state = self.state.lock();
        let start = addr as usize;
        state.memory[start..start + data.len()].copy_from_slice(data);
    }

    /// Write a little-endian u32.
    pub fn write_u32(&self, addr: u64, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    /// Write a little-endian i32.
    pub fn write_i32(&self, addr: u64, value: i32) {
        self.write(addr, &value.to_le_bytes());
    }

    /// Write a pointer-sized value.
    pub fn write_ptr(&self, addr: u64, target: u64) {
        self.write(addr, &target.to_le_bytes());
    }

    /// Store a function reference (or null) at `addr`.
    pub fn write_func_ref(&self, addr: u64, func: Option<FunctionId>) {
        // stored biased by one so that zero stays the null reference
        self.write_ptr(addr, func.map(|f| f.0 as u64 + 1).unwrap_or(0));
    }

    // --- type registration ---

    fn insert_type(&self, decl: TypeDecl, flags: u32) -> TypeId {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.types.insert(seq, Arc::new(decl));
        TypeId(seq | flags)
    }

    /// Register a plain object type.
    pub fn register_object_type(
        &self,
        name: &str,
        size: usize,
        properties: Vec<PropertyDecl>,
    ) -> TypeId {
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size,
                kind: TypeKind::Object,
                properties,
                methods: Vec::new(),
                enum_constants: Vec::new(),
                template_base: None,
            },
            0,
        )
    }

    /// Register a script-object type; instances carry their own field
    /// addresses, set with [`HarnessVm::set_object_fields`].
    pub fn register_script_object_type(
        &self,
        name: &str,
        size: usize,
        properties: Vec<PropertyDecl>,
    ) -> TypeId {
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size,
                kind: TypeKind::Object,
                properties,
                methods: Vec::new(),
                enum_constants: Vec::new(),
                template_base: None,
            },
            TypeId::SCRIPT_OBJECT,
        )
    }

    /// Register a template instantiation of an already-registered
    /// uninstantiated base type.
    pub fn register_template_instantiation(
        &self,
        name: &str,
        size: usize,
        properties: Vec<PropertyDecl>,
        base: TypeId,
    ) -> TypeId {
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size,
                kind: TypeKind::Object,
                properties,
                methods: Vec::new(),
                enum_constants: Vec::new(),
                template_base: Some(base),
            },
            TypeId::TEMPLATE,
        )
    }

    /// Register an enumeration type.
    pub fn register_enum_type(&self, name: &str, constants: &[(&str, i64)]) -> TypeId {
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size: 4,
                kind: TypeKind::Enum,
                properties: Vec::new(),
                methods: Vec::new(),
                enum_constants: constants
                    .iter()
                    .map(|(n, v)| EnumConstant {
                        name: n.to_string(),
                        value: *v,
                    })
                    .collect(),
                template_base: None,
            },
            0,
        )
    }

    /// Register a funcdef type.
    pub fn register_funcdef_type(&self, name: &str) -> TypeId {
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size: 8,
                kind: TypeKind::Funcdef,
                properties: Vec::new(),
                methods: Vec::new(),
                enum_constants: Vec::new(),
                template_base: None,
            },
            0,
        )
    }

    /// Register a named function, usable as a funcdef target.
    pub fn register_function(&self, name: &str) -> FunctionId {
        let mut state = self.state.lock();
        let id = FunctionId(state.next_func);
        state.next_func += 1;
        state.functions.insert(id, name.to_string());
        id
    }

    fn new_method(&self, name: &str, return_type: TypeId, role: IterRole) -> MethodDecl {
        let mut state = self.state.lock();
        let id = FunctionId(state.next_func);
        state.next_func += 1;
        state.functions.insert(id, name.to_string());
        state.iter_roles.insert(id, role);
        MethodDecl {
            name: name.to_string(),
            id,
            return_type,
        }
    }

    /// Register an object type implementing the for-each protocol with
    /// the given number of value accessors. `begin_returns` is normally
    /// `uint32`; anything else makes the iterator unsupported.
    pub fn register_iterable_type(
        &self,
        name: &str,
        size: usize,
        properties: Vec<PropertyDecl>,
        accessor_types: &[TypeId],
        begin_returns: TypeId,
    ) -> TypeId {
        let mut methods = vec![
            self.new_method("opForBegin", begin_returns, IterRole::Begin),
            self.new_method("opForEnd", TypeId(type_seq::BOOL), IterRole::End),
            self.new_method("opForNext", TypeId(type_seq::UINT32), IterRole::Next),
        ];
        if accessor_types.len() == 1 {
            methods.push(self.new_method("opForValue", accessor_types[0], IterRole::Value(0)));
        } else {
            for (i, ty) in accessor_types.iter().enumerate() {
                methods.push(self.new_method(&format!("opForValue{i}"), *ty, IterRole::Value(i)));
            }
        }
        self.insert_type(
            TypeDecl {
                name: name.to_string(),
                size,
                kind: TypeKind::Object,
                properties,
                methods,
                enum_constants: Vec::new(),
                template_base: None,
            },
            0,
        )
    }

    /// Define what a for-each drive over the object at `addr` yields:
    /// one inner vector per element, one entry per value accessor.
    pub fn set_iterable(&self, addr: u64, elements: Vec<Vec<IterElement>>) {
        self.state.lock().iterables.insert(addr, elements);
    }

    /// Make a specific method call fault (return no outcome).
    pub fn set_call_fault(&self, func: FunctionId) {
        self.state.lock().faulting_calls.push(func);
    }

    /// Observe every debugger-issued call, e.g. to re-enter the hook the
    /// way real script execution would.
    pub fn set_call_observer(&self, observer: Arc<dyn Fn() + Send + Sync>) {
        self.state.lock().call_observer = Some(observer);
    }

    /// Set a script-object instance's runtime field addresses.
    pub fn set_object_fields(&self, object: u64, fields: Vec<u64>) {
        self.state.lock().object_fields.insert(object, fields);
    }

    // --- program shape ---

    /// Push a frame; it becomes the innermost one.
    pub fn push_frame(&self, function: FrameFunction, section: &str, line: u32) {
        self.state.lock().frames.push(Frame {
            function,
            pos: FramePos {
                section: section.to_string(),
                line,
                column: 1,
            },
            this: None,
            vars: Vec::new(),
        });
    }

    /// Pop the innermost frame.
    pub fn pop_frame(&self) {
        self.state.lock().frames.pop();
    }

    /// Move the innermost frame to a new line.
    pub fn set_statement_position(&self, line: u32) {
        if let Some(frame) = self.state.lock().frames.last_mut() {
            frame.pos.line = line;
        }
    }

    /// Give the innermost frame an implicit receiver.
    pub fn set_frame_this(&self, type_id: TypeId, addr: u64) {
        if let Some(frame) = self.state.lock().frames.last_mut() {
            frame.this = Some((type_id, addr));
        }
    }

    /// Append a variable slot to the innermost frame. Slots must be
    /// appended in declaration order: parameters, named locals, then
    /// unnamed temporaries.
    pub fn add_frame_var(
        &self,
        name: &str,
        type_id: TypeId,
        modifiers: TypeModifiers,
        addr: u64,
        in_scope: bool,
    ) {
        if let Some(frame) = self.state.lock().frames.last_mut() {
            let stack_offset = frame.vars.len() as i32 * 8;
            frame.vars.push(Slot {
                decl: LocalDecl {
                    name: name.to_string(),
                    type_id,
                    modifiers,
                    stack_offset,
                },
                addr,
                in_scope,
            });
        }
    }

    /// Add a module global.
    pub fn add_global(&self, name: &str, type_id: TypeId, is_const: bool, addr: u64) {
        self.state.lock().globals.push(GlobalDecl {
            name: name.to_string(),
            type_id,
            is_const,
            address: addr,
        });
    }

    /// Add a declared section.
    pub fn add_declared_section(&self, section: &str) {
        self.state.lock().sections.push(section.to_string());
    }

    /// Mark the VM as inside a non-script call.
    pub fn set_system_function(&self, declaration: &str) {
        self.state.lock().system_function = Some(declaration.to_string());
    }

    /// Put the context into an exception state.
    pub fn set_exception(&self, info: ExceptionInfo) {
        self.state.lock().exception = Some(info);
    }

    // --- hook bookkeeping ---

    /// Attach the per-statement hook.
    pub fn attach_statement_hook(&self) {
        self.hook_attached.store(true, Ordering::Release);
    }

    /// Whether the hook is still attached.
    pub fn hook_attached(&self) -> bool {
        self.hook_attached.load(Ordering::Acquire)
    }

    fn frame(&self, index: usize) -> Option<Frame> {
        let state = self.state.lock();
        // frame 0 is the innermost
        let len = state.frames.len();
        if index >= len {
            return None;
        }
        state.frames.get(len - 1 - index).cloned()
    }
}

impl VmContext for HarnessVm {
    fn type_decl(&self, id: TypeId) -> Option<Arc<TypeDecl>> {
        self.count();
        self.state.lock().types.get(&id.seq()).cloned()
    }

    fn primitive_size(&self, id: TypeId) -> usize {
        self.count();
        match id.seq() {
            type_seq::BOOL | type_seq::INT8 | type_seq::UINT8 => 1,
            type_seq::INT16 | type_seq::UINT16 => 2,
            type_seq::INT32 | type_seq::UINT32 | type_seq::FLOAT => 4,
            type_seq::INT64 | type_seq::UINT64 | type_seq::DOUBLE => 8,
            _ => 0,
        }
    }

    fn function_name(&self, id: FunctionId) -> Option<String> {
        self.count();
        self.state.lock().functions.get(&id).cloned()
    }

    fn declared_sections(&self) -> Vec<String> {
        self.count();
        self.state.lock().sections.clone()
    }

    fn read_bytes(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        self.count();
        if addr == 0 {
            return None;
        }
        let state = self.state.lock();
        let start = addr as usize;
        state.memory.get(start..start.checked_add(len)?).map(|s| s.to_vec())
    }

    fn read_ptr(&self, addr: u64) -> Option<u64> {
        self.count();
        if addr == 0 {
            return None;
        }
        let state = self.state.lock();
        let start = addr as usize;
        let bytes = state.memory.get(start..start + 8)?;
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_le_bytes(arr))
    }

    fn read_func_ref(&self, addr: u64) -> Option<FunctionId> {
        self.count();
        let raw = self.read_ptr(addr)?;
        if raw == 0 {
            None
        } else {
            Some(FunctionId((raw - 1) as u32))
        }
    }

    fn stack_size(&self) -> usize {
        self.count();
        self.state.lock().frames.len()
    }

    fn frame_function(&self, frame: usize) -> Option<FrameFunction> {
        self.count();
        self.frame(frame).map(|f| f.function)
    }

    fn frame_position(&self, frame: usize) -> Option<FramePos> {
        self.count();
        self.frame(frame).map(|f| f.pos)
    }

    fn system_function(&self) -> Option<String> {
        self.count();
        self.state.lock().system_function.clone()
    }

    fn exception(&self) -> Option<ExceptionInfo> {
        self.count();
        self.state.lock().exception.clone()
    }

    fn var_count(&self, frame: usize) -> usize {
        self.count();
        self.frame(frame).map(|f| f.vars.len()).unwrap_or(0)
    }

    fn var_decl(&self, slot: usize, frame: usize) -> Option<LocalDecl> {
        self.count();
        self.frame(frame)?.vars.get(slot).map(|s| s.decl.clone())
    }

    fn var_addr(&self, slot: usize, frame: usize) -> Option<u64> {
        self.count();
        let addr = self.frame(frame)?.vars.get(slot)?.addr;
        if addr == 0 {
            None
        } else {
            Some(addr)
        }
    }

    fn var_in_scope(&self, slot: usize, frame: usize) -> bool {
        self.count();
        self.frame(frame)
            .and_then(|f| f.vars.get(slot).map(|s| s.in_scope))
            .unwrap_or(false)
    }

    fn this_ptr(&self, frame: usize) -> Option<(TypeId, u64)> {
        self.count();
        self.frame(frame)?.this
    }

    fn globals(&self) -> Vec<GlobalDecl> {
        self.count();
        self.state.lock().globals.clone()
    }

    fn object_field_count(&self, object: u64) -> Option<usize> {
        self.count();
        self.state
            .lock()
            .object_fields
            .get(&object)
            .map(|f| f.len())
    }

    fn object_field_addr(&self, object: u64, index: usize) -> Option<u64> {
        self.count();
        self.state
            .lock()
            .object_fields
            .get(&object)?
            .get(index)
            .copied()
    }

    fn call_method(&self, func: FunctionId, object: u64, arg: Option<u32>) -> Option<CallOutcome> {
        self.count();
        let (role, elements, observer, faulted) = {
            let state = self.state.lock();
            (
                state.iter_roles.get(&func).copied(),
                state.iterables.get(&object).cloned().unwrap_or_default(),
                state.call_observer.clone(),
                state.faulting_calls.contains(&func),
            )
        };

        // a method call executes script; the hook sees those statements
        if let Some(observer) = observer {
            observer();
        }
        if faulted {
            return None;
        }

        match role? {
            IterRole::Begin => Some(CallOutcome {
                return_type: TypeId(type_seq::UINT32),
                address: None,
                bytes: 0u32.to_le_bytes().to_vec(),
            }),
            IterRole::End => {
                let i = arg? as usize;
                Some(CallOutcome {
                    return_type: TypeId(type_seq::BOOL),
                    address: None,
                    bytes: vec![u8::from(i >= elements.len())],
                })
            }
            IterRole::Next => Some(CallOutcome {
                return_type: TypeId(type_seq::UINT32),
                address: None,
                bytes: (arg? + 1).to_le_bytes().to_vec(),
            }),
            IterRole::Value(accessor) => {
                let element = elements.get(arg? as usize)?.get(accessor)?.clone();
                Some(CallOutcome {
                    return_type: element.type_id,
                    address: element.address,
                    bytes: element.bytes,
                })
            }
        }
    }

    fn clear_statement_hook(&self) {
        self.hook_attached.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        let vm = HarnessVm::new();
        let addr = vm.alloc(4);
        vm.write_u32(addr, 0xDEAD_BEEF);
        assert_eq!(
            vm.read_bytes(addr, 4),
            Some(0xDEAD_BEEFu32.to_le_bytes().to_vec())
        );
        assert_eq!(vm.read_bytes(0, 4), None);
    }

    #[test]
    fn test_frames_are_innermost_first() {
        let vm = HarnessVm::new();
        vm.push_frame(
            FrameFunction {
                name: "outer".into(),
                declaration: "void outer()".into(),
                param_count: 0,
            },
            "main.as",
            1,
        );
        vm.push_frame(
            FrameFunction {
                name: "inner".into(),
                declaration: "void inner()".into(),
                param_count: 0,
            },
            "main.as",
            5,
        );
        assert_eq!(vm.stack_size(), 2);
        assert_eq!(vm.frame_function(0).map(|f| f.name), Some("inner".into()));
        assert_eq!(vm.frame_function(1).map(|f| f.name), Some("outer".into()));
    }

    #[test]
    fn test_reflection_calls_are_counted() {
        let vm = HarnessVm::new();
        let before = vm.reflection_calls();
        let _ = vm.stack_size();
        let _ = vm.globals();
        assert_eq!(vm.reflection_calls(), before + 2);
    }

    #[test]
    fn test_func_ref_bias() {
        let vm = HarnessVm::new();
        let f = vm.register_function("callback");
        let addr = vm.alloc(8);
        vm.write_func_ref(addr, Some(f));
        assert_eq!(vm.read_func_ref(addr), Some(f));
        vm.write_func_ref(addr, None);
        assert_eq!(vm.read_func_ref(addr), None);
    }
}
