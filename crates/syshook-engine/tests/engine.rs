//! End-to-end tests of the script engine against an in-memory task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use syshook_callbacks::CallbackInfo;
use syshook_core::mock::MockTask;
use syshook_core::{CallbackPhase, Errno, InterceptError, SyscallArguments, Task, Word};
use syshook_engine::{Engine, ScriptOutput};

fn engine() -> Engine {
    Engine::builder()
        .output(ScriptOutput::buffer())
        .build()
        .expect("engine should build")
}

fn task(id: u64) -> Arc<dyn Task> {
    Arc::new(MockTask::new(id))
}

fn before(sysno: u64, source: &str) -> CallbackInfo {
    CallbackInfo::new(sysno, CallbackPhase::Before, format!("sys_before_{}", sysno), source)
}

fn after(sysno: u64, source: &str) -> CallbackInfo {
    CallbackInfo::new(sysno, CallbackPhase::After, format!("sys_after_{}", sysno), source)
}

#[test]
fn test_scripted_callback_rewrites_arguments() {
    let engine = engine();
    engine
        .register_scripted(before(
            1,
            "function sys_before_1(fd, buf, n) return { [0] = fd + 1, ['2'] = args.arg2 * 2 } end",
        ))
        .unwrap();

    let args = SyscallArguments::from_slice(&[3, 100, 5]);
    let outcome = engine.invoke_before(&task(1), 1, &args).unwrap().unwrap();
    assert_eq!(outcome.args, SyscallArguments::from_slice(&[4, 100, 10]));
    assert_eq!(outcome.ret, None);

    assert!(engine.invoke_before(&task(1), 2, &args).unwrap().is_none());
}

#[test]
fn test_before_override_skips_native_call() {
    let engine = engine();
    engine
        .register_scripted(before(2, "function sys_before_2() return { ret = -1, errno = 13 } end"))
        .unwrap();
    engine
        .register_scripted(after(2, "function sys_after_2() return { ret = 0, errno = 0 } end"))
        .unwrap();

    let called = AtomicBool::new(false);
    let result = engine.intercept(&task(1), 2, SyscallArguments::default(), |_| {
        called.store(true, Ordering::SeqCst);
        Ok(0)
    });
    assert_eq!(result, Err(Errno::EACCES));
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn test_after_callback_sees_native_result() {
    let engine = engine();
    engine
        .register_scripted(after(
            3,
            "function sys_after_3() return { ret = args.ret + 1, errno = args.errno } end",
        ))
        .unwrap();
    engine
        .register_scripted(after(
            4,
            "function sys_after_4() if args.errno == 2 then return { ret = 0, errno = 0 } end end",
        ))
        .unwrap();

    let result = engine.intercept(&task(1), 3, SyscallArguments::default(), |_| Ok(41));
    assert_eq!(result, Ok(42));

    let result = engine.intercept(&task(1), 4, SyscallArguments::default(), |_| Err(Errno::ENOENT));
    assert_eq!(result, Ok(0));
}

#[test]
fn test_native_call_gets_rewritten_arguments() {
    let engine = engine();
    engine
        .register_scripted(before(5, "function sys_before_5(a) return { [1] = a * 10 } end"))
        .unwrap();

    let result = engine.intercept(&task(1), 5, SyscallArguments::from_slice(&[7]), |args| {
        Ok(args[1])
    });
    assert_eq!(result, Ok(70));
}

#[test]
fn test_failing_callback_fails_syscall() {
    let engine = engine();
    engine
        .register_scripted(before(6, "function sys_before_6() error('boom') end"))
        .unwrap();
    engine
        .register_scripted(before(7, "function sys_before_7() return { [0] = 99, [7] = 1 } end"))
        .unwrap();

    for sysno in [6, 7] {
        let called = AtomicBool::new(false);
        let result = engine.intercept(&task(1), sysno, SyscallArguments::default(), |_| {
            called.store(true, Ordering::SeqCst);
            Ok(0)
        });
        assert_eq!(result, Err(Errno::EINVAL));
        assert!(!called.load(Ordering::SeqCst));
    }

    let err = engine
        .invoke_before(&task(1), 7, &SyscallArguments::default())
        .unwrap_err();
    assert!(matches!(err, InterceptError::ArgIndexOutOfRange(7)));

    let err = engine
        .invoke_before(&task(1), 6, &SyscallArguments::default())
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[test]
fn test_dynamic_registration_from_change_state() {
    let engine = engine();
    let source = r#"
function on_open(path, flags)
    return { [1] = 0 }
end
hooks.AddCbBefore(2, on_open)
"#;
    assert_eq!(engine.change_state(source).unwrap(), "null");

    let listed = engine.list_callbacks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].entry_point, "on_open");
    assert_eq!(listed[0].args, vec!["path", "flags"]);
    assert_eq!(listed[0].phase, CallbackPhase::Before);

    let args = SyscallArguments::from_slice(&[5, 7]);
    let outcome = engine.invoke_before(&task(1), 2, &args).unwrap().unwrap();
    assert_eq!(outcome.args, SyscallArguments::from_slice(&[5, 0]));
}

#[test]
fn test_anonymous_dynamic_callback_listed_as_unknown() {
    let engine = engine();
    engine
        .change_state("hooks.AddCbAfter(60, function() return nil end)")
        .unwrap();
    let listed = engine.list_callbacks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].entry_point, "unknown");
    assert_eq!(listed[0].phase, CallbackPhase::After);
}

#[test]
fn test_bad_registration_registers_nothing() {
    let engine = engine();
    assert!(engine.change_state("hooks.AddCbBefore(2)").is_err());
    assert!(engine.change_state("hooks.AddCbBefore(2, nil)").is_err());
    assert!(engine.change_state("hooks.AddCbBefore(nil, function() end)").is_err());
    assert!(engine.change_state("this is not lua").is_err());
    assert!(engine.callbacks().is_empty());
}

#[test]
fn test_change_state_returns_json() {
    let engine = engine();
    assert_eq!(engine.change_state("x = 1").unwrap(), "null");
    assert_eq!(engine.change_state("return x + 1").unwrap(), "2");
    assert_eq!(engine.change_state("return { ok = true }").unwrap(), r#"{"ok":true}"#);
}

#[test]
fn test_injected_globals_are_reset() {
    let engine = engine();
    engine
        .register_scripted(before(8, "function sys_before_8() return nil end"))
        .unwrap();
    engine
        .invoke_before(&task(1), 8, &SyscallArguments::default())
        .unwrap();
    assert_eq!(engine.change_state("return args").unwrap(), "null");
    assert_eq!(engine.change_state("return persistence['local']").unwrap(), "null");

    engine.change_state("error('fail')").unwrap_err();
    engine.change_state("x = 1").unwrap();
}

#[test]
fn test_unsafe_globals_removed() {
    let engine = engine();
    let result = engine
        .change_state("return dofile == nil and loadfile == nil and io == nil and os == nil")
        .unwrap();
    assert_eq!(result, "true");
}

#[test]
fn test_task_hooks_only_with_task() {
    let engine = engine();
    assert_eq!(engine.change_state("return hooks.readBytes == nil").unwrap(), "true");
    assert_eq!(engine.change_state("return hooks.print ~= nil").unwrap(), "true");
}

#[test]
fn test_print_hook_writes_output() {
    let output = ScriptOutput::buffer();
    let engine = Engine::builder().output(output.clone()).build().unwrap();
    engine.change_state("hooks.print('hello', 2)").unwrap();
    assert_eq!(output.contents(), "hello 2");
}

#[test]
fn test_hooks_read_task_memory() {
    let engine = engine();
    let mock = Arc::new(MockTask::new(3).with_argv(&["/bin/true"]));
    mock.write_memory(syshook_core::mock::MOCK_MEMORY_BASE, b"/tmp/x\0");
    let task: Arc<dyn Task> = mock;
    engine
        .register_scripted(before(
            9,
            r#"
function sys_before_9(path)
    local name = hooks.readString(path, 64)
    local argv = hooks.getArgv()
    if name == "/tmp/x" and argv[1] == "/bin/true" then
        return { ret = 0, errno = 0 }
    end
end
"#,
        ))
        .unwrap();
    let args = SyscallArguments::from_slice(&[syshook_core::mock::MOCK_MEMORY_BASE]);
    let result = engine.intercept(&task, 9, args, |_| Err(Errno::ENOENT));
    assert_eq!(result, Ok(0));
}

#[test]
fn test_single_use_hooks() {
    let engine = Engine::builder()
        .single_use_hooks(true)
        .output(ScriptOutput::buffer())
        .build()
        .unwrap();
    engine
        .register_scripted(before(
            10,
            "function sys_before_10() hooks.getArgv() hooks.getArgv() end",
        ))
        .unwrap();
    engine
        .register_scripted(before(
            11,
            "function sys_before_11() hooks.getArgv() hooks.getEnvs() end",
        ))
        .unwrap();

    let err = engine
        .invoke_before(&task(1), 10, &SyscallArguments::default())
        .unwrap_err();
    assert!(err.to_string().contains("only once"));
    assert!(engine
        .invoke_before(&task(1), 11, &SyscallArguments::default())
        .is_ok());
    assert!(engine
        .invoke_before(&task(1), 11, &SyscallArguments::default())
        .is_ok());
}

#[test]
fn test_local_persistence_lifecycle() {
    let engine = engine();
    engine
        .register_scripted(before(
            12,
            r#"
function sys_before_12()
    local store = persistence["local"]
    store.n = (store.n or 0) + 1
    persistence.glb.total = (persistence.glb.total or 0) + 1
    return { [0] = store.n }
end
"#,
        ))
        .unwrap();

    let first = task(1);
    let second = task(2);
    let args = SyscallArguments::default();
    let count = |task: &Arc<dyn Task>| -> Word {
        engine.invoke_before(task, 12, &args).unwrap().unwrap().args[0]
    };

    assert_eq!(count(&first), 1);
    assert_eq!(count(&first), 2);
    assert_eq!(count(&second), 1);
    assert_eq!(engine.local_store_count(), 2);
    assert_eq!(engine.change_state("return persistence.glb.total").unwrap(), "3");

    engine.release_task(1);
    assert_eq!(engine.local_store_count(), 1);
    assert_eq!(count(&first), 1);
    assert_eq!(count(&second), 2);
}

#[test]
fn test_hooks_expire_with_their_invocation() {
    let engine = engine();
    engine
        .register_scripted(before(
            5,
            "function sys_before_5() persistence.glb.h = hooks; hooks.getPidInfo() end",
        ))
        .unwrap();

    let task = task(42);
    assert!(engine
        .invoke_before(&task, 5, &SyscallArguments::default())
        .unwrap()
        .is_some());
    assert_eq!(Arc::strong_count(&task), 1);

    engine.release_task(42);
    let err = engine
        .change_state("return persistence.glb.h.getPidInfo()")
        .unwrap_err();
    assert!(err.to_string().contains("finished invocation"), "{}", err);
    assert!(engine.change_state("persistence.glb.h.print('late')").is_err());
    assert!(engine.change_state("hooks.print('fresh')").is_ok());
}

#[test]
fn test_oversized_read_fails_the_callback() {
    let engine = engine();
    engine
        .register_scripted(before(6, "function sys_before_6() hooks.readBytes(0, 1 << 62) end"))
        .unwrap();
    let err = engine
        .invoke_before(&task(1), 6, &SyscallArguments::default())
        .unwrap_err();
    assert!(
        matches!(&err, InterceptError::Script(message) if message.contains("at most 16 MiB")),
        "{}",
        err
    );

    let result = engine.intercept(&task(1), 6, SyscallArguments::default(), |_| Ok(0));
    assert_eq!(result, Err(Errno::EINVAL));
}

#[test]
fn test_dispatch_uses_task_syscall_table() {
    let engine = engine();
    let mock = Arc::new(MockTask::new(1));
    let task: Arc<dyn Task> = Arc::clone(&mock) as Arc<dyn Task>;

    let addr = engine
        .dispatch(&task, 9, SyscallArguments::from_slice(&[0, 100]))
        .unwrap();
    assert_eq!(mock.regions(), vec![(addr, 100)]);
    assert_eq!(
        engine.dispatch(&task, 999, SyscallArguments::default()),
        Err(Errno::ENOSYS)
    );
}

#[test]
fn test_concurrent_invocations_are_serialized() {
    const THREADS: u64 = 8;
    const CALLS: u64 = 25;

    let engine = Arc::new(engine());
    engine
        .register_scripted(before(
            13,
            r#"
function sys_before_13()
    local before = persistence.glb.counter or 0
    persistence.glb.counter = before + 1
end
"#,
        ))
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let task = task(id + 1);
                for _ in 0..CALLS {
                    engine
                        .invoke_before(&task, 13, &SyscallArguments::default())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = engine.change_state("return persistence.glb.counter").unwrap();
    assert_eq!(total, (THREADS * CALLS).to_string());
    assert_eq!(engine.local_store_count(), THREADS as usize);
}
