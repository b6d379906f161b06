//! The per-session state cache.
//!
//! One `DebugCache` is built per suspend and pins the paused VM context
//! alive while any of its addresses are held. It is discarded wholesale on
//! the next suspend; only watch expressions migrate, and those are
//! re-resolved against the new cache rather than reusing stale state
//! references. Incremental invalidation is deliberately not attempted:
//! VM-side state can change arbitrarily between breaks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use vm_interface::{type_seq, Addr, BufferId, TypeId, TypeModifiers, VmContext};

use crate::evaluate::{self, EvaluatorRegistry};
use crate::expand;
use crate::expr;
use crate::var::{Expansion, LocalCategory, LocalKey, VarKey, VarState, VarValue, VarView};

/// One rendered call-stack entry.
#[derive(Debug, Clone)]
pub struct StackEntry {
    /// Display text, `"<declaration> Line <n>"`.
    pub rendered: String,
    /// Section the frame is executing in.
    pub section: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// One watch-list entry, carried across breaks by expression text.
#[derive(Debug, Clone)]
pub struct WatchEntry {
    /// The watched expression.
    pub expression: String,
    /// The resolved view, when the expression resolved in this cache.
    pub view: Option<VarView>,
    /// Resolution failure text, when it did not.
    pub error: Option<String>,
}

/// Cached state of one paused session.
pub struct DebugCache {
    ctx: Arc<dyn VmContext>,
    registry: Arc<EvaluatorRegistry>,

    var_states: HashMap<VarKey, VarState>,
    buffers: Vec<Box<[u8]>>,
    type_names: HashMap<(TypeId, TypeModifiers), String>,

    globals: Option<Vec<VarView>>,
    locals: HashMap<LocalKey, Vec<VarView>>,
    watch: Vec<WatchEntry>,

    sections: BTreeMap<String, String>,
    system_function: Option<String>,
    call_stack: Vec<StackEntry>,
}

impl DebugCache {
    /// Build the cache for a freshly paused context.
    ///
    /// The call stack and section registry are populated immediately;
    /// locals, globals and variable expansions are computed on first
    /// request.
    pub fn new(ctx: Arc<dyn VmContext>, registry: Arc<EvaluatorRegistry>) -> DebugCache {
        let mut cache = DebugCache {
            ctx,
            registry,
            var_states: HashMap::new(),
            buffers: Vec::new(),
            type_names: HashMap::new(),
            globals: None,
            locals: HashMap::new(),
            watch: Vec::new(),
            sections: BTreeMap::new(),
            system_function: None,
            call_stack: Vec::new(),
        };
        cache.cache_sections();
        cache.cache_call_stack();
        log::debug!(
            "cache rebuilt: {} stack frames, {} sections",
            cache.call_stack.len(),
            cache.sections.len()
        );
        cache
    }

    /// The pinned context this cache was built against.
    pub fn ctx(&self) -> &Arc<dyn VmContext> {
        &self.ctx
    }

    pub(crate) fn registry(&self) -> Arc<EvaluatorRegistry> {
        Arc::clone(&self.registry)
    }

    // --- variable states ---

    /// Look up or create the state for (type, constness, address).
    ///
    /// Handle types are dereferenced one level before the key is formed;
    /// a null handle or a null base address yields a terminal sentinel
    /// state that bypasses the evaluator registry. On first creation the
    /// display value is computed immediately. Returns whether the key
    /// already existed, and the (possibly dereferenced) key.
    pub fn lookup_or_create(
        &mut self,
        type_id: TypeId,
        is_const: bool,
        addr: Addr,
    ) -> (bool, VarKey) {
        let (addr, sentinel) = if addr.is_null() {
            (Addr::Null, Some(VarValue::muted("uninit")))
        } else if type_id.is_handle() {
            match self.read_ptr(addr) {
                Some(target) if target != 0 => (Addr::Vm(target), None),
                _ => (Addr::Null, Some(VarValue::muted("null"))),
            }
        } else {
            (addr, None)
        };

        let key = VarKey {
            type_id,
            is_const,
            addr,
        };
        if self.var_states.contains_key(&key) {
            return (true, key);
        }

        let value = match sentinel {
            Some(v) => v,
            None => evaluate::display_value(self, key),
        };
        self.var_states.insert(key, VarState::new(value));
        (false, key)
    }

    /// Create a terminal sentinel state (e.g. `"(null)"` from a null
    /// intermediate pointer) without consulting the registry.
    pub(crate) fn intern_sentinel(
        &mut self,
        type_id: TypeId,
        is_const: bool,
        text: &str,
    ) -> (bool, VarKey) {
        let key = VarKey {
            type_id,
            is_const,
            addr: Addr::Null,
        };
        if self.var_states.contains_key(&key) {
            return (true, key);
        }
        self.var_states.insert(key, VarState::new(VarValue::muted(text)));
        (false, key)
    }

    /// The cached state for a key, if one exists.
    pub fn state(&self, key: VarKey) -> Option<&VarState> {
        self.var_states.get(&key)
    }

    /// Expansion of a cached value, computed on the first call and
    /// memoized after that.
    pub fn expand(&mut self, key: VarKey) -> Option<&Expansion> {
        if !self.var_states.contains_key(&key) {
            return None;
        }
        let needs_compute = self
            .var_states
            .get(&key)
            .map(|s| s.expansion.is_none())
            .unwrap_or(false);
        if needs_compute {
            let computed = expand::query(self, key);
            if let Some(state) = self.var_states.get_mut(&key) {
                state.expansion = Some(computed);
            }
        }
        self.var_states.get(&key)?.expansion.as_ref()
    }

    pub(crate) fn attach_buffer(&mut self, key: VarKey, id: BufferId) {
        if let Some(state) = self.var_states.get_mut(&key) {
            state.buffer = Some(id);
        }
    }

    // --- memory ---

    /// Take ownership of a byte copy of a transient value.
    pub(crate) fn alloc_buffer(&mut self, bytes: Vec<u8>) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(bytes.into_boxed_slice());
        id
    }

    /// Read bytes from either VM memory or an owned buffer.
    pub(crate) fn read(&self, addr: Addr, len: usize) -> Option<Vec<u8>> {
        match addr {
            Addr::Null => None,
            Addr::Vm(a) => self.ctx.read_bytes(a, len),
            Addr::Buffer { id, offset } => {
                let buf = self.buffers.get(id.0 as usize)?;
                let start = offset as usize;
                buf.get(start..start.checked_add(len)?).map(|s| s.to_vec())
            }
        }
    }

    /// Read a pointer-sized value from either address space.
    pub(crate) fn read_ptr(&self, addr: Addr) -> Option<u64> {
        match addr {
            Addr::Null => None,
            Addr::Vm(a) => self.ctx.read_ptr(a),
            Addr::Buffer { .. } => {
                let bytes = self.read(addr, 8)?;
                let arr: [u8; 8] = bytes.try_into().ok()?;
                Some(u64::from_le_bytes(arr))
            }
        }
    }

    // --- scope caches ---

    /// The rendered call stack, innermost frame first.
    pub fn call_stack(&self) -> &[StackEntry] {
        &self.call_stack
    }

    /// The synthetic top entry, when the VM is inside a non-script call.
    pub fn system_function(&self) -> Option<&str> {
        self.system_function.as_deref()
    }

    /// Module globals, computed once per cache lifetime.
    pub fn globals(&mut self) -> &[VarView] {
        if self.globals.is_none() {
            let views = self.build_globals();
            self.globals = Some(views);
        }
        self.globals.as_deref().unwrap_or_default()
    }

    /// One frame's locals group, computed lazily per (frame, category).
    pub fn locals(&mut self, key: LocalKey) -> &[VarView] {
        if !self.locals.contains_key(&key) {
            let views = self.build_locals(key);
            self.locals.insert(key, views);
        }
        self.locals.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    // --- watch ---

    /// Current watch entries.
    pub fn watch(&self) -> &[WatchEntry] {
        &self.watch
    }

    /// Add a watch expression, resolving it against frame 0 immediately.
    pub fn add_watch(&mut self, expression: &str) {
        let entry = match expr::evaluate_expression(self, 0, expression) {
            Ok(done) => WatchEntry {
                expression: expression.to_string(),
                view: Some(VarView {
                    name: expression.to_string(),
                    type_name: done.type_name,
                    key: done.key,
                }),
                error: None,
            },
            Err(e) => WatchEntry {
                expression: expression.to_string(),
                view: None,
                error: Some(e.to_string()),
            },
        };
        self.watch.push(entry);
    }

    /// Remove a watch entry by expression text. Returns whether anything
    /// was removed.
    pub fn remove_watch(&mut self, expression: &str) -> bool {
        let before = self.watch.len();
        self.watch.retain(|w| w.expression != expression);
        self.watch.len() != before
    }

    /// The watch expressions, for migration into a successor cache.
    pub fn watch_expressions(&self) -> Vec<String> {
        self.watch.iter().map(|w| w.expression.clone()).collect()
    }

    // --- sections ---

    /// Known script sections, keyed by raw identifier.
    pub fn sections(&self) -> &BTreeMap<String, String> {
        &self.sections
    }

    /// Register a section the VM could not statically enumerate.
    pub fn ensure_section(&mut self, section: &str) {
        if !self.sections.contains_key(section) {
            self.sections
                .insert(section.to_string(), section.to_string());
        }
    }

    // --- type names ---

    /// Rendered type text for (type, modifiers), memoized.
    pub fn type_name(&mut self, id: TypeId, modifiers: TypeModifiers) -> String {
        let key = (id, modifiers);
        if let Some(name) = self.type_names.get(&key) {
            return name.clone();
        }

        let raw = match self.ctx.type_decl(id) {
            Some(decl) => decl.name.clone(),
            None => primitive_name(id).to_string(),
        };
        let rk = modifiers.ref_kind();
        let suffix = if rk == TypeModifiers::INOUT_REF {
            "&"
        } else if rk == TypeModifiers::IN_REF {
            "&in"
        } else if rk == TypeModifiers::OUT_REF {
            "&out"
        } else {
            ""
        };
        let name = format!(
            "{}{}{}",
            if modifiers.is_const() { "const " } else { "" },
            raw,
            suffix
        );
        self.type_names.insert(key, name.clone());
        name
    }

    // --- construction helpers ---

    fn cache_sections(&mut self) {
        for section in self.ctx.declared_sections() {
            self.ensure_section(&section);
        }
    }

    fn cache_call_stack(&mut self) {
        if let Some(sys) = self.ctx.system_function() {
            self.system_function = Some(format!("{sys} (system function)"));
        }

        let exception = self.ctx.exception();
        for frame in 0..self.ctx.stack_size() {
            let decl = self
                .ctx
                .frame_function(frame)
                .map(|f| f.declaration)
                .unwrap_or_else(|| "???".to_string());
            // while unwinding, frame 0 reports where the exception was
            // raised rather than the frame's own position
            let pos = match (&exception, frame) {
                (Some(exc), 0) => exc.pos.clone(),
                _ => match self.ctx.frame_position(frame) {
                    Some(p) => p,
                    None => continue,
                },
            };
            let rendered = format!("{} Line {}", decl, pos.line);
            self.ensure_section(&pos.section);
            self.call_stack.push(StackEntry {
                rendered,
                section: pos.section,
                line: pos.line,
                column: pos.column,
            });
        }
    }

    fn build_globals(&mut self) -> Vec<VarView> {
        let mut views = Vec::new();
        for global in self.ctx.globals() {
            let modifiers = if global.is_const {
                TypeModifiers::CONST
            } else {
                TypeModifiers::NONE
            };
            let type_name = self.type_name(global.type_id, modifiers);
            // globals can legitimately alias; duplicates reuse the state
            // but still get their own view
            let (_, key) =
                self.lookup_or_create(global.type_id, global.is_const, Addr::vm(global.address));
            views.push(VarView {
                name: global.name,
                type_name,
                key,
            });
        }
        views
    }

    fn build_locals(&mut self, key: LocalKey) -> Vec<VarView> {
        let frame = key.frame;
        let num_locals = self.ctx.var_count(frame);
        let num_params = self
            .ctx
            .frame_function(frame)
            .map(|f| f.param_count)
            .unwrap_or(0)
            .min(num_locals);

        // slots are ordered parameters, then named locals, then
        // compiler-generated temporaries; the named region ends at the
        // first unnamed slot after the parameters
        let mut named_end = num_locals;
        for slot in num_params..num_locals {
            let unnamed = self
                .ctx
                .var_decl(slot, frame)
                .map(|d| d.name.is_empty())
                .unwrap_or(true);
            if unnamed {
                named_end = slot;
                break;
            }
        }

        let (start, end) = match key.category {
            LocalCategory::Parameter => (0, num_params),
            LocalCategory::Variable => (num_params, named_end),
            LocalCategory::Temporary => (named_end, num_locals),
        };

        let mut views = Vec::new();

        if key.category == LocalCategory::Parameter {
            if let Some((this_type, this_addr)) = self.ctx.this_ptr(frame) {
                let type_name = self.type_name(this_type, TypeModifiers::NONE);
                let (_, k) = self.lookup_or_create(this_type, false, Addr::vm(this_addr));
                views.push(VarView {
                    name: "this".to_string(),
                    type_name,
                    key: k,
                });
            }
        }

        for slot in start..end {
            let Some(decl) = self.ctx.var_decl(slot, frame) else {
                continue;
            };
            let name = if decl.name.is_empty() {
                format!("& {}", decl.stack_offset)
            } else {
                decl.name.clone()
            };
            let addr = self
                .ctx
                .var_addr(slot, frame)
                .map(Addr::vm)
                .unwrap_or(Addr::Null);
            let type_name = self.type_name(decl.type_id, decl.modifiers);
            let (_, k) = self.lookup_or_create(decl.type_id, decl.modifiers.is_const(), addr);
            views.push(VarView {
                name,
                type_name,
                key: k,
            });
        }
        views
    }
}

fn primitive_name(id: TypeId) -> &'static str {
    match id.seq() {
        type_seq::BOOL => "bool",
        type_seq::INT8 => "int8",
        type_seq::INT16 => "int16",
        type_seq::INT32 => "int32",
        type_seq::INT64 => "int64",
        type_seq::UINT8 => "uint8",
        type_seq::UINT16 => "uint16",
        type_seq::UINT32 => "uint32",
        type_seq::UINT64 => "uint64",
        type_seq::FLOAT => "float",
        type_seq::DOUBLE => "double",
        _ => "???",
    }
}
