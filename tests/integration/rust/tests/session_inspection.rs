//! Inspection of a suspended session through the full stack: call-stack
//! rendering, scope groups, expansion and expressions, all against a VM
//! paused mid-script.

use std::sync::Arc;
use std::time::Duration;

use debugger::Debugger;
use inspector::{ExpandKind, LocalCategory, LocalKey};
use vm_harness::{run_script, HarnessVm, IterElement, ScriptOp};
use vm_interface::{
    type_seq, FrameFunction, PropertyDecl, TypeId, TypeModifiers, VmContext,
};

const WAIT: Duration = Duration::from_secs(5);

fn func(name: &str, param_count: usize) -> FrameFunction {
    FrameFunction {
        name: name.to_string(),
        declaration: format!("void {name}()"),
        param_count,
    }
}

fn prop(name: &str, type_id: TypeId, offset: u64) -> PropertyDecl {
    PropertyDecl {
        name: name.to_string(),
        type_id,
        offset,
        composite_offset: 0,
        is_composite_indirect: false,
        read_only: false,
    }
}

/// A game-shaped scene: a global tick counter, an actor with health and
/// flags, and an inventory the debugger has to iterate.
fn build_scene(vm: &Arc<HarnessVm>) {
    vm.add_declared_section("main.as");
    vm.add_declared_section("actor.as");

    let ticks = vm.alloc(4);
    vm.write_i32(ticks, 128);
    vm.add_global("g_ticks", TypeId(type_seq::INT32), false, ticks);

    let flags_ty = vm.register_enum_type("DamageFlags", &[("FIRE", 1), ("ICE", 2), ("ACID", 4)]);

    let items_ty = vm.register_iterable_type(
        "array<int>",
        8,
        vec![],
        &[TypeId(type_seq::INT32)],
        TypeId(type_seq::UINT32),
    );
    let items = vm.alloc(8);
    let element = |v: i32| {
        vec![IterElement {
            type_id: TypeId(type_seq::INT32),
            address: None,
            bytes: v.to_le_bytes().to_vec(),
        }]
    };
    vm.set_iterable(items, vec![element(3), element(7)]);

    let actor_ty = vm.register_object_type(
        "Actor",
        8,
        vec![
            prop("hp", TypeId(type_seq::INT32), 0),
            prop("damage", flags_ty, 4),
        ],
    );
    let actor = vm.alloc(8);
    vm.write_i32(actor, 80);
    vm.write_i32(actor + 4, 3);

    vm.push_frame(func("main", 0), "main.as", 3);
    vm.push_frame(func("Actor::hurt", 1), "actor.as", 20);
    let amount = vm.alloc(4);
    vm.write_i32(amount, 12);
    vm.add_frame_var("amount", TypeId(type_seq::INT32), TypeModifiers::NONE, amount, true);
    vm.add_frame_var("items", items_ty, TypeModifiers::NONE, items, true);
    let tmp = vm.alloc(4);
    vm.write_i32(tmp, 1);
    vm.add_frame_var("", TypeId(type_seq::INT32), TypeModifiers::NONE, tmp, true);
    vm.set_frame_this(actor_ty, actor);
}

fn suspend_at(vm: &Arc<HarnessVm>, line: u32) -> (Arc<Debugger>, std::thread::JoinHandle<()>) {
    let dbg = Arc::new(Debugger::new());
    dbg.toggle_breakpoint("actor.as", line);
    let hook = {
        let dbg = Arc::clone(&dbg);
        move |ctx: &Arc<dyn VmContext>| dbg.on_statement(ctx)
    };
    let handle = run_script(Arc::clone(vm), vec![ScriptOp::Statement(line)], hook);
    assert!(dbg.wait_until_suspended(WAIT));
    (dbg, handle)
}

#[test]
fn test_scope_groups_of_a_paused_method() {
    let _ = env_logger::builder().is_test(true).try_init();
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);
    let (dbg, handle) = suspend_at(&vm, 20);

    dbg.with_cache(|c| {
        let stack: Vec<String> = c.call_stack().iter().map(|e| e.rendered.clone()).collect();
        assert_eq!(
            stack,
            vec!["void Actor::hurt() Line 20", "void main() Line 3"]
        );
        // declared and frame sections both end up registered
        assert!(c.sections().contains_key("main.as"));
        assert!(c.sections().contains_key("actor.as"));

        let params = c
            .locals(LocalKey {
                frame: 0,
                category: LocalCategory::Parameter,
            })
            .to_vec();
        let names: Vec<&str> = params.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["this", "amount"]);
        assert_eq!(params[0].type_name, "Actor");

        let vars = c
            .locals(LocalKey {
                frame: 0,
                category: LocalCategory::Variable,
            })
            .to_vec();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "items");

        let temps = c
            .locals(LocalKey {
                frame: 0,
                category: LocalCategory::Temporary,
            })
            .to_vec();
        assert_eq!(temps.len(), 1);
        assert!(temps[0].name.starts_with("& "));

        let globals = c.globals().to_vec();
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].name, "g_ticks");
        assert_eq!(c.state(globals[0].key).unwrap().value.text, "128");
    })
    .unwrap();

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_drilling_into_the_receiver() {
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);
    let (dbg, handle) = suspend_at(&vm, 20);

    dbg.with_cache(|c| {
        let params = c
            .locals(LocalKey {
                frame: 0,
                category: LocalCategory::Parameter,
            })
            .to_vec();
        let this_key = params[0].key;

        let children: Vec<_> = c
            .expand(this_key)
            .map(|e| e.children().to_vec())
            .unwrap_or_default();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "hp");
        assert_eq!(c.state(children[0].key).unwrap().value.text, "80");

        // damage holds FIRE|ICE, which only renders as a bit summary
        let damage = c.state(children[1].key).unwrap();
        assert_eq!(damage.value.text, "2 bits");
        assert_eq!(damage.value.expand, ExpandKind::Bits);
    })
    .unwrap();

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_iterating_a_container_from_the_frontend() {
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);
    let (dbg, handle) = suspend_at(&vm, 20);

    dbg.with_cache(|c| {
        let vars = c
            .locals(LocalKey {
                frame: 0,
                category: LocalCategory::Variable,
            })
            .to_vec();
        let items = vars[0].key;
        assert_eq!(c.state(items).unwrap().value.text, "2 elements");

        let children: Vec<_> = c
            .expand(items)
            .map(|e| e.children().to_vec())
            .unwrap_or_default();
        let values: Vec<String> = children
            .iter()
            .map(|v| c.state(v.key).unwrap().value.text.clone())
            .collect();
        assert_eq!(values, vec!["3", "7"]);
    })
    .unwrap();

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_expressions_against_the_paused_frame() {
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);
    let (dbg, handle) = suspend_at(&vm, 20);

    dbg.with_cache(|c| {
        let hp = inspector::evaluate_expression(c, 0, "this.hp").unwrap();
        assert_eq!(hp.value, "80");
        let amount = inspector::evaluate_expression(c, 0, "amount").unwrap();
        assert_eq!(amount.value, "12");
        let ticks = inspector::evaluate_expression(c, 0, "g_ticks").unwrap();
        assert_eq!(ticks.value, "128");
        // outer frame sees its own scope only
        assert!(inspector::evaluate_expression(c, 1, "amount").is_err());
    })
    .unwrap();

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_exception_state_renders_the_raise_site() {
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);

    let dbg = Arc::new(Debugger::new());
    dbg.step_into();
    let hook = {
        let dbg = Arc::clone(&dbg);
        move |ctx: &Arc<dyn VmContext>| dbg.on_statement(ctx)
    };
    let handle = run_script(
        Arc::clone(&vm),
        vec![
            ScriptOp::Statement(21),
            ScriptOp::Raise {
                description: "hp underflow".to_string(),
            },
        ],
        hook,
    );

    assert!(dbg.wait_until_suspended(WAIT));
    assert_eq!(
        dbg.with_cache(|c| c.call_stack()[0].line),
        Some(21)
    );
    dbg.step_into();

    assert!(dbg.wait_until_suspended(WAIT));
    dbg.with_cache(|c| {
        let exc = c.ctx().exception().unwrap();
        assert_eq!(exc.description, "hp underflow");
        // frame 0 reports the raise site, not its own position
        assert_eq!(c.call_stack()[0].line, exc.pos.line);
    })
    .unwrap();
    assert!(!vm.hook_attached());

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_system_function_entry_tops_the_stack() {
    let vm = Arc::new(HarnessVm::new());
    build_scene(&vm);
    vm.set_system_function("void assert(bool)");
    let (dbg, handle) = suspend_at(&vm, 20);

    dbg.with_cache(|c| {
        assert_eq!(
            c.system_function(),
            Some("void assert(bool) (system function)")
        );
    })
    .unwrap();

    dbg.resume();
    handle.join().unwrap();
}
