//! The stepping state machine and suspend/resume handoff.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use inspector::{DebugCache, EvaluatorRegistry};
use parking_lot::{Condvar, Mutex, MutexGuard};
use vm_interface::VmContext;

use crate::breakpoints::Breakpoint;

/// The pending stepping action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// No action pending; run until a breakpoint matches.
    #[default]
    None,
    /// Suspend at the very next statement, regardless of depth.
    StepInto,
    /// Suspend at the next statement at or above the recorded depth.
    StepOver,
    /// Suspend at the next statement strictly above the recorded depth.
    StepOut,
}

struct Inner {
    breakpoints: HashSet<Breakpoint>,
    action: Action,
    /// Call-stack depth recorded when the pending step began.
    stack_depth: usize,
    /// Cache for the currently broken state; pins the paused context.
    cache: Option<DebugCache>,
    suspended: bool,
}

/// The debugger: breakpoint set, stepping state, and the handoff that
/// blocks the VM thread while paused.
///
/// One debugger drives one paused session at a time. All shared state
/// lives behind a single mutex; suspension is a condvar the VM thread
/// waits on inside [`Debugger::on_statement`].
pub struct Debugger {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    /// Set while the debugger itself is executing script (for-each
    /// driving, field accessors); the hook must ignore those statements
    /// or the debugger would break inside itself.
    introspecting: AtomicBool,
    registry: Arc<EvaluatorRegistry>,
}

impl Debugger {
    /// A debugger with an empty evaluator registry.
    pub fn new() -> Debugger {
        Debugger::with_registry(Arc::new(EvaluatorRegistry::new()))
    }

    /// A debugger sharing an existing evaluator registry.
    pub fn with_registry(registry: Arc<EvaluatorRegistry>) -> Debugger {
        Debugger {
            inner: Mutex::new(Inner {
                breakpoints: HashSet::new(),
                action: Action::None,
                stack_depth: 0,
                cache: None,
                suspended: false,
            }),
            state_changed: Condvar::new(),
            introspecting: AtomicBool::new(false),
            registry,
        }
    }

    /// The evaluator registry caches built by this debugger will use.
    pub fn registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.registry
    }

    // --- the per-statement hook (VM thread) ---

    /// The per-statement notification hook. The VM invokes this
    /// synchronously before each source statement; when a suspend is due,
    /// the call blocks until a control command releases it.
    pub fn on_statement(&self, ctx: &Arc<dyn VmContext>) {
        // statements executed by our own introspection calls are
        // excluded, or the debugger would break inside itself
        if self.introspecting.load(Ordering::Acquire) {
            return;
        }

        // hook delivery is not guaranteed once the context is unwinding;
        // detach, but still evaluate this last notification
        if ctx.exception().is_some() {
            ctx.clear_statement_hook();
        }

        let mut inner = self.inner.lock();
        let depth = ctx.stack_size();
        let brk = match inner.action {
            Action::StepInto => true,
            Action::StepOver => depth <= inner.stack_depth,
            Action::StepOut => depth < inner.stack_depth,
            Action::None => {
                let mut hit = false;
                if !inner.breakpoints.is_empty() {
                    if let Some(pos) = ctx.frame_position(0) {
                        hit = inner.breakpoints.contains(&Breakpoint::Location {
                            section: pos.section,
                            line: pos.line,
                        });
                    }
                    if let Some(func) = ctx.frame_function(0) {
                        // a function breakpoint fires at most once
                        let fbp = Breakpoint::Function { name: func.name };
                        if inner.breakpoints.remove(&fbp) {
                            hit = true;
                        }
                    }
                }
                hit
            }
        };

        if brk {
            self.suspend(inner, ctx);
        }
    }

    /// Force a break on the given context. Must be called on the VM
    /// thread: this blocks until a control command releases it.
    pub fn debug_break(&self, ctx: &Arc<dyn VmContext>) {
        let inner = self.inner.lock();
        self.suspend(inner, ctx);
    }

    fn suspend(&self, mut inner: MutexGuard<'_, Inner>, ctx: &Arc<dyn VmContext>) {
        inner.action = Action::None;

        // the old cache dies here; only its watch expressions carry over,
        // re-resolved against the fresh cache
        let watch = inner
            .cache
            .take()
            .map(|c| c.watch_expressions())
            .unwrap_or_default();
        let cache = {
            let _guard = IntrospectionGuard::hold(&self.introspecting);
            let mut cache = DebugCache::new(Arc::clone(ctx), Arc::clone(&self.registry));
            for expression in &watch {
                cache.add_watch(expression);
            }
            cache
        };
        inner.cache = Some(cache);
        inner.suspended = true;

        if let Some(pos) = ctx.frame_position(0) {
            log::info!("suspended at {}:{}", pos.section, pos.line);
        }
        self.state_changed.notify_all();

        while inner.suspended {
            self.state_changed.wait(&mut inner);
        }
        log::debug!("released");
    }

    // --- control commands (control thread) ---

    /// Suspend at the very next statement.
    pub fn step_into(&self) {
        self.command(Action::StepInto);
    }

    /// Suspend at the next statement at or above the current depth.
    pub fn step_over(&self) {
        self.command(Action::StepOver);
    }

    /// Suspend at the next statement after the current function returns.
    pub fn step_out(&self) {
        self.command(Action::StepOut);
    }

    /// Run until a breakpoint matches.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.action = Action::None;
        inner.suspended = false;
        self.state_changed.notify_all();
    }

    fn command(&self, action: Action) {
        let mut inner = self.inner.lock();
        inner.stack_depth = inner
            .cache
            .as_ref()
            .map(|c| c.ctx().stack_size())
            .unwrap_or(0);
        inner.action = action;
        inner.suspended = false;
        log::debug!("{action:?} from depth {}", inner.stack_depth);
        self.state_changed.notify_all();
    }

    // --- breakpoints ---

    /// Toggle a location breakpoint. Returns `true` when the call added
    /// it, `false` when it removed an identical one.
    pub fn toggle_breakpoint(&self, section: &str, line: u32) -> bool {
        let bp = Breakpoint::location(section, line);
        let mut inner = self.inner.lock();
        if inner.breakpoints.remove(&bp) {
            log::debug!("breakpoint removed: {section}:{line}");
            false
        } else {
            inner.breakpoints.insert(bp);
            log::debug!("breakpoint added: {section}:{line}");
            true
        }
    }

    /// Add a one-shot function-name breakpoint.
    pub fn add_function_breakpoint(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.breakpoints.insert(Breakpoint::function(name));
        log::debug!("function breakpoint added: {name}");
    }

    /// Snapshot of the active breakpoints.
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.lock().breakpoints.iter().cloned().collect()
    }

    /// Whether the debugger still has work to do. It is only safe to
    /// drop the debugger (and unhook the VM) when this is `false`.
    pub fn has_work(&self) -> bool {
        let inner = self.inner.lock();
        !inner.breakpoints.is_empty() || inner.action != Action::None
    }

    // --- cache access (control thread) ---

    /// Whether a VM thread is currently blocked inside the hook.
    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    /// Block until the VM thread suspends, or the timeout passes.
    /// Returns whether it is suspended.
    pub fn wait_until_suspended(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        while !inner.suspended {
            if self
                .state_changed
                .wait_for(&mut inner, timeout)
                .timed_out()
            {
                break;
            }
        }
        inner.suspended
    }

    /// Run a closure against the active cache, if any. Reads are
    /// synchronous and side-effect-free except for triggering lazy
    /// expansion; any script the closure causes to run is
    /// reentrancy-excluded from the hook.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut DebugCache) -> R) -> Option<R> {
        let _guard = IntrospectionGuard::hold(&self.introspecting);
        let mut inner = self.inner.lock();
        inner.cache.as_mut().map(f)
    }
}

impl Default for Debugger {
    fn default() -> Debugger {
        Debugger::new()
    }
}

struct IntrospectionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> IntrospectionGuard<'a> {
    fn hold(flag: &'a AtomicBool) -> IntrospectionGuard<'a> {
        flag.store(true, Ordering::Release);
        IntrospectionGuard { flag }
    }
}

impl Drop for IntrospectionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
