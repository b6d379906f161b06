//! Drives a scripted execution trace against a [`HarnessVm`].
//!
//! Each op mutates the VM's call stack exactly the way the real engine
//! would, then `Statement` ops invoke the per-statement hook so that a
//! debugger under test observes a plausible execution.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use vm_interface::{FrameFunction, VmContext};

use crate::vm::HarnessVm;

/// One step of a scripted execution trace.
pub enum ScriptOp {
    /// Execute a statement at the given line of the innermost frame.
    Statement(u32),
    /// Enter a new script function.
    Enter {
        /// Function entered.
        function: FrameFunction,
        /// Section the function lives in.
        section: String,
        /// Line of its first statement.
        line: u32,
    },
    /// Return from the innermost frame.
    Leave,
    /// Raise a script exception at the current position.
    Raise {
        /// Exception description text.
        description: String,
    },
}

/// Run a trace on a dedicated thread, invoking `hook` for every
/// `Statement` op while the statement hook stays attached. The thread
/// mirrors the VM's execution thread: it blocks inside `hook` whenever
/// the debugger suspends.
pub fn run_script<F>(vm: Arc<HarnessVm>, ops: Vec<ScriptOp>, hook: F) -> JoinHandle<()>
where
    F: Fn(&Arc<dyn VmContext>) + Send + 'static,
{
    vm.attach_statement_hook();
    thread::spawn(move || {
        let ctx: Arc<dyn VmContext> = vm.clone();
        for op in ops {
            match op {
                ScriptOp::Statement(line) => {
                    vm.set_statement_position(line);
                    if vm.hook_attached() {
                        hook(&ctx);
                    }
                }
                ScriptOp::Enter {
                    function,
                    section,
                    line,
                } => {
                    vm.push_frame(function, &section, line);
                }
                ScriptOp::Leave => {
                    vm.pop_frame();
                }
                ScriptOp::Raise { description } => {
                    let pos = ctx.frame_position(0);
                    let function = ctx
                        .frame_function(0)
                        .map(|f| f.name)
                        .unwrap_or_default();
                    if let Some(pos) = pos {
                        vm.set_exception(vm_interface::ExceptionInfo {
                            pos,
                            function,
                            description,
                        });
                    }
                    if vm.hook_attached() {
                        hook(&ctx);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn func(name: &str) -> FrameFunction {
        FrameFunction {
            name: name.to_string(),
            declaration: format!("void {name}()"),
            param_count: 0,
        }
    }

    #[test]
    fn test_hook_fires_per_statement() {
        let vm = Arc::new(HarnessVm::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = run_script(
            vm,
            vec![
                ScriptOp::Enter {
                    function: func("main"),
                    section: "main.as".into(),
                    line: 1,
                },
                ScriptOp::Statement(1),
                ScriptOp::Statement(2),
                ScriptOp::Leave,
            ],
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        handle.join().ok();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detached_hook_is_skipped() {
        let vm = Arc::new(HarnessVm::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = run_script(
            vm,
            vec![
                ScriptOp::Enter {
                    function: func("main"),
                    section: "main.as".into(),
                    line: 1,
                },
                ScriptOp::Statement(1),
                ScriptOp::Statement(2),
            ],
            move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.clear_statement_hook();
            },
        );
        handle.join().ok();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
