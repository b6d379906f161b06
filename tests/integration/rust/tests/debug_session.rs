//! End-to-end debug sessions: breakpoints, cache lifecycle and watch
//! migration across repeated suspensions.

use std::sync::Arc;
use std::time::Duration;

use debugger::Debugger;
use inspector::{LocalCategory, LocalKey};
use vm_harness::{run_script, HarnessVm, ScriptOp};
use vm_interface::{type_seq, FrameFunction, TypeId, TypeModifiers, VmContext};

const WAIT: Duration = Duration::from_secs(5);

fn main_fn() -> FrameFunction {
    FrameFunction {
        name: "main".to_string(),
        declaration: "void main()".to_string(),
        param_count: 1,
    }
}

fn launch(
    vm: &Arc<HarnessVm>,
    dbg: &Arc<Debugger>,
    ops: Vec<ScriptOp>,
) -> std::thread::JoinHandle<()> {
    let hook = {
        let dbg = Arc::clone(dbg);
        move |ctx: &Arc<dyn VmContext>| dbg.on_statement(ctx)
    };
    run_script(Arc::clone(vm), ops, hook)
}

#[test]
fn test_repeated_parameter_fetch_is_free_after_the_first() {
    let _ = env_logger::builder().is_test(true).try_init();
    let vm = Arc::new(HarnessVm::new());
    vm.push_frame(main_fn(), "main.as", 1);
    let dt = vm.alloc(4);
    vm.write(dt, &0.016f32.to_le_bytes());
    vm.add_frame_var("dt", TypeId(type_seq::FLOAT), TypeModifiers::NONE, dt, true);

    let dbg = Arc::new(Debugger::new());
    dbg.toggle_breakpoint("main.as", 2);

    let handle = launch(
        &vm,
        &dbg,
        vec![ScriptOp::Statement(1), ScriptOp::Statement(2)],
    );
    assert!(dbg.wait_until_suspended(WAIT));

    let params_key = LocalKey {
        frame: 0,
        category: LocalCategory::Parameter,
    };
    let first = dbg
        .with_cache(|c| {
            let views = c.locals(params_key).to_vec();
            views
                .iter()
                .map(|v| c.state(v.key).unwrap().value.text.clone())
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(first, vec!["0.016"]);

    // the second fetch must come entirely out of the cache
    vm.reset_reflection_calls();
    let second = dbg
        .with_cache(|c| {
            let views = c.locals(params_key).to_vec();
            views
                .iter()
                .map(|v| c.state(v.key).unwrap().value.text.clone())
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(vm.reflection_calls(), 0);

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_cache_is_discarded_between_suspensions() {
    let vm = Arc::new(HarnessVm::new());
    vm.push_frame(main_fn(), "main.as", 1);
    let x = vm.alloc(4);
    vm.write_i32(x, 5);
    vm.add_frame_var("x", TypeId(type_seq::INT32), TypeModifiers::NONE, x, true);

    let dbg = Arc::new(Debugger::new());
    dbg.toggle_breakpoint("main.as", 2);
    dbg.toggle_breakpoint("main.as", 4);

    let handle = launch(
        &vm,
        &dbg,
        vec![
            ScriptOp::Statement(1),
            ScriptOp::Statement(2),
            ScriptOp::Statement(3),
            ScriptOp::Statement(4),
        ],
    );

    let read_x = |dbg: &Debugger| {
        dbg.with_cache(|c| {
            let views = c
                .locals(LocalKey {
                    frame: 0,
                    category: LocalCategory::Parameter,
                })
                .to_vec();
            c.state(views[0].key).unwrap().value.text.clone()
        })
        .unwrap()
    };

    assert!(dbg.wait_until_suspended(WAIT));
    assert_eq!(read_x(&dbg), "5");

    // mutate while the VM thread is parked; the next break must see it
    vm.write_i32(x, 9);
    // a second read from the same cache still reports the stale value
    assert_eq!(read_x(&dbg), "5");

    dbg.resume();
    assert!(dbg.wait_until_suspended(WAIT));
    assert_eq!(read_x(&dbg), "9");

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_watch_migrates_and_rebinds() {
    let vm = Arc::new(HarnessVm::new());
    vm.push_frame(main_fn(), "main.as", 1);
    let hp = vm.alloc(4);
    vm.write_i32(hp, 100);
    let ty = vm.register_object_type(
        "Actor",
        4,
        vec![vm_interface::PropertyDecl {
            name: "hp".to_string(),
            type_id: TypeId(type_seq::INT32),
            offset: 0,
            composite_offset: 0,
            is_composite_indirect: false,
            read_only: false,
        }],
    );
    vm.set_frame_this(ty, hp);

    let dbg = Arc::new(Debugger::new());
    dbg.toggle_breakpoint("main.as", 1);
    dbg.toggle_breakpoint("main.as", 2);

    let handle = launch(
        &vm,
        &dbg,
        vec![ScriptOp::Statement(1), ScriptOp::Statement(2)],
    );

    assert!(dbg.wait_until_suspended(WAIT));
    dbg.with_cache(|c| c.add_watch("this.hp")).unwrap();
    vm.write_i32(hp, 60);
    dbg.resume();

    assert!(dbg.wait_until_suspended(WAIT));
    let (expression, value) = dbg
        .with_cache(|c| {
            let entry = c.watch()[0].clone();
            let view = entry.view.unwrap();
            (
                entry.expression,
                c.state(view.key).unwrap().value.text.clone(),
            )
        })
        .unwrap();
    assert_eq!(expression, "this.hp");
    assert_eq!(value, "60");

    dbg.resume();
    handle.join().unwrap();
}

#[test]
fn test_control_thread_drives_the_session_over_a_channel() {
    let vm = Arc::new(HarnessVm::new());
    vm.push_frame(main_fn(), "main.as", 1);
    let dbg = Arc::new(Debugger::new());
    dbg.toggle_breakpoint("main.as", 2);
    dbg.toggle_breakpoint("main.as", 4);

    let handle = launch(
        &vm,
        &dbg,
        vec![
            ScriptOp::Statement(1),
            ScriptOp::Statement(2),
            ScriptOp::Statement(3),
            ScriptOp::Statement(4),
        ],
    );

    // a frontend thread reports each stop back to the test
    let (tx, rx) = crossbeam::channel::bounded(4);
    let control = {
        let dbg = Arc::clone(&dbg);
        std::thread::spawn(move || {
            for _ in 0..2 {
                if !dbg.wait_until_suspended(WAIT) {
                    break;
                }
                let line = dbg.with_cache(|c| c.call_stack()[0].line);
                if tx.send(line).is_err() {
                    break;
                }
                dbg.resume();
            }
        })
    };

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(2));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(4));
    control.join().unwrap();
    handle.join().unwrap();
    assert!(!dbg.is_suspended());
}
