//! The script execution engine
//!
//! One Lua VM serves every callback of the sandbox. [`Engine`] owns it behind a
//! single mutex: whichever thread holds the lock runs its script to completion
//! while every other intercepted syscall waits. Persisted script state lives in
//! the VM registry (one global table, one table per task) and is only touched
//! under the same lock.

use log::{debug, error, info};
use mlua::{Function, Lua, LuaOptions, MultiValue, RegistryKey, StdLib, Table, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use syshook_callbacks::{CallbackInfo, CallbackRegistry};
use syshook_core::{
    CallbackPhase, Errno, InvocationOutcome, ReturnOverride, Result, Sysno,
    SyscallArguments, SyscallResult, Task, TaskId,
};

use crate::callback::{Callback, ScriptedCallback};
use crate::context::ScriptContexts;
use crate::hooks::{HookLease, HookPolicy, HookRegistry, ScriptOutput, ScriptScope};
use crate::marshal::{arguments_table, harvest, script_error, to_json};

const GLOBAL_ARGS: &str = "args";
const GLOBAL_HOOKS: &str = "hooks";
const GLOBAL_PERSISTENCE: &str = "persistence";

/// Base-library functions removed from the VM
const UNSAFE_GLOBALS: [&str; 2] = ["dofile", "loadfile"];

struct Vm {
    lua: Lua,
    global: RegistryKey,
    locals: HashMap<TaskId, RegistryKey>,
}

impl Vm {
    fn new() -> mlua::Result<Self> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default())?;
        let globals = lua.globals();
        for name in UNSAFE_GLOBALS {
            globals.set(name, Value::Nil)?;
        }
        let global = lua.create_registry_value(lua.create_table()?)?;
        Ok(Vm {
            lua,
            global,
            locals: HashMap::new(),
        })
    }
}

/// What an invocation executes
enum Program<'a> {
    Scripted(&'a CallbackInfo),
    Dynamic(&'a RegistryKey, &'a str),
    Source(&'a str),
}

impl Program<'_> {
    fn source(&self) -> &str {
        match self {
            Program::Scripted(info) => &info.source,
            Program::Dynamic(_, source) => source,
            Program::Source(source) => source,
        }
    }
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    hook_policy: HookPolicy,
    output: ScriptOutput,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook_policy(mut self, policy: HookPolicy) -> Self {
        self.hook_policy = policy;
        self
    }

    /// Allow each task-dependent hook one call per invocation
    pub fn single_use_hooks(self, enabled: bool) -> Self {
        self.hook_policy(if enabled {
            HookPolicy::SingleUse
        } else {
            HookPolicy::Reusable
        })
    }

    /// Where the `print` hook writes
    pub fn output(mut self, output: ScriptOutput) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let callbacks = Arc::new(CallbackRegistry::new());
        let hooks = HookRegistry::with_builtins(self.hook_policy, Arc::clone(&callbacks), self.output)?;
        let vm = Vm::new().map_err(script_error)?;
        info!(
            "Script engine ready with {} hooks ({:?})",
            hooks.len(),
            self.hook_policy
        );
        Ok(Engine {
            vm: Mutex::new(vm),
            callbacks,
            hooks: Arc::new(hooks),
        })
    }
}

pub struct Engine {
    vm: Mutex<Vm>,
    callbacks: Arc<CallbackRegistry<Callback>>,
    hooks: Arc<HookRegistry>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry<Callback>> {
        &self.callbacks
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    fn lock(&self) -> MutexGuard<'_, Vm> {
        self.vm.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Validate and install a scripted callback
    pub fn register_scripted(&self, info: CallbackInfo) -> Result<()> {
        let (sysno, phase) = (info.sysno, info.phase);
        let callback = ScriptedCallback::new(info)?;
        self.callbacks.register(sysno, phase, Callback::from(callback));
        Ok(())
    }

    /// Run `callback` with the given arguments and harvest what it returns
    pub fn invoke(
        &self,
        callback: &Callback,
        task: Option<&Arc<dyn Task>>,
        args: &SyscallArguments,
        contexts: &ScriptContexts,
    ) -> Result<InvocationOutcome> {
        let program = match callback {
            Callback::Scripted(cb) => Program::Scripted(cb.info()),
            Callback::Dynamic(cb) => Program::Dynamic(
                cb.key(),
                cb.info().map_or("", |info| info.source.as_str()),
            ),
        };
        self.run(program, task, Some(args), contexts, |_, value| {
            harvest(args, &value)
        })
    }

    /// Run the Before callback for `sysno`, if one is registered
    pub fn invoke_before(
        &self,
        task: &Arc<dyn Task>,
        sysno: Sysno,
        args: &SyscallArguments,
    ) -> Result<Option<InvocationOutcome>> {
        let Some(callback) = self.callbacks.lookup(sysno, CallbackPhase::Before) else {
            return Ok(None);
        };
        debug!("Running before callback for syscall {} on task {}", sysno, task.id());
        self.invoke(&callback, Some(task), args, &ScriptContexts::new())
            .map(Some)
    }

    /// Run the After callback for `sysno`; it sees the native outcome as
    /// `args.ret` and `args.errno`
    pub fn invoke_after(
        &self,
        task: &Arc<dyn Task>,
        sysno: Sysno,
        args: &SyscallArguments,
        native: &SyscallResult,
    ) -> Result<Option<InvocationOutcome>> {
        let Some(callback) = self.callbacks.lookup(sysno, CallbackPhase::After) else {
            return Ok(None);
        };
        let (ret, errno) = match native {
            Ok(ret) => (*ret as i64, 0),
            Err(errno) => (0, *errno as i64),
        };
        let contexts = ScriptContexts::new()
            .with(GLOBAL_ARGS, "ret", ret)
            .with(GLOBAL_ARGS, "errno", errno);
        debug!("Running after callback for syscall {} on task {}", sysno, task.id());
        self.invoke(&callback, Some(task), args, &contexts).map(Some)
    }

    /// Run a syscall through its callbacks around `native`
    ///
    /// A Before override skips `native` and the After phase. A failing callback
    /// fails the syscall with `EINVAL`.
    pub fn intercept<F>(
        &self,
        task: &Arc<dyn Task>,
        sysno: Sysno,
        args: SyscallArguments,
        native: F,
    ) -> SyscallResult
    where
        F: FnOnce(&SyscallArguments) -> SyscallResult,
    {
        let mut args = args;
        match self.invoke_before(task, sysno, &args) {
            Ok(Some(InvocationOutcome { ret: Some(ret), .. })) => return ret.into_result(),
            Ok(Some(outcome)) => args = outcome.args,
            Ok(None) => {}
            Err(err) => {
                error!("Before callback for syscall {} failed: {}", sysno, err);
                return Err(Errno::EINVAL);
            }
        }

        let result = native(&args);

        match self.invoke_after(task, sysno, &args, &result) {
            Ok(Some(outcome)) => outcome.ret.map_or(result, ReturnOverride::into_result),
            Ok(None) => result,
            Err(err) => {
                error!("After callback for syscall {} failed: {}", sysno, err);
                Err(Errno::EINVAL)
            }
        }
    }

    /// [`Engine::intercept`] with the task's own syscall table as the native side
    pub fn dispatch(&self, task: &Arc<dyn Task>, sysno: Sysno, args: SyscallArguments) -> SyscallResult {
        self.intercept(task, sysno, args, |args| match task.lookup_syscall(sysno) {
            Some(native) => native(task.as_ref(), args),
            None => Err(Errno::ENOSYS),
        })
    }

    /// Run `source` once with task-independent hooks and the global store
    ///
    /// Returns the script's return value as JSON text (`null` for nil).
    pub fn change_state(&self, source: &str) -> Result<String> {
        debug!("Running change-state script ({} bytes)", source.len());
        self.run(
            Program::Source(source),
            None,
            None,
            &ScriptContexts::new(),
            |lua, value| Ok(serde_json::to_string(&to_json(lua, value)?)?),
        )
    }

    /// Drop the per-task store of an exiting thread
    pub fn release_task(&self, id: TaskId) {
        let mut vm = self.lock();
        if let Some(key) = vm.locals.remove(&id) {
            if let Err(err) = vm.lua.remove_registry_value(key) {
                error!("Failed to release store of task {}: {}", id, err);
            }
            debug!("Released store of task {}", id);
        }
    }

    /// Descriptions of every registered callback
    pub fn list_callbacks(&self) -> Vec<CallbackInfo> {
        self.callbacks
            .list_all()
            .into_iter()
            .map(|(sysno, phase, callback)| callback.describe(sysno, phase))
            .collect()
    }

    /// Number of tasks that currently own a store
    pub fn local_store_count(&self) -> usize {
        self.lock().locals.len()
    }

    fn run<T>(
        &self,
        program: Program<'_>,
        task: Option<&Arc<dyn Task>>,
        args: Option<&SyscallArguments>,
        contexts: &ScriptContexts,
        finish: impl FnOnce(&Lua, Value) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        let vm = &mut *guard;
        vm.lua.expire_registry_values();

        let globals = vm.lua.globals();
        let scope = ScriptScope::new(program.source());
        let mut injected = vec![GLOBAL_HOOKS.to_string(), GLOBAL_PERSISTENCE.to_string()];
        let mut leases = Vec::new();

        let result = self
            .inject(vm, &globals, task, args, contexts, &scope, &mut injected, &mut leases)
            .and_then(|_| execute(&vm.lua, &globals, &program, args))
            .map_err(script_error);

        for name in &injected {
            if let Err(err) = globals.set(name.as_str(), Value::Nil) {
                error!("Failed to reset global {}: {}", name, err);
            }
        }
        leases.iter().for_each(HookLease::revoke);

        finish(&vm.lua, result?)
    }

    #[allow(clippy::too_many_arguments)]
    fn inject(
        &self,
        vm: &mut Vm,
        globals: &Table,
        task: Option<&Arc<dyn Task>>,
        args: Option<&SyscallArguments>,
        contexts: &ScriptContexts,
        scope: &ScriptScope,
        injected: &mut Vec<String>,
        leases: &mut Vec<HookLease>,
    ) -> mlua::Result<()> {
        let Vm { lua, global, locals } = vm;

        let hooks = lua.create_table()?;
        for (name, call) in self.hooks.materialize(task, scope) {
            let lease = HookLease::new(&name, call);
            leases.push(lease.clone());
            let function = lua.create_function(move |lua, args: MultiValue| {
                lease.call(lua, args.into_iter().collect())
            })?;
            hooks.set(name, function)?;
        }
        globals.set(GLOBAL_HOOKS, hooks)?;

        if let Some(args) = args {
            injected.push(GLOBAL_ARGS.to_string());
            globals.set(GLOBAL_ARGS, arguments_table(lua, args)?)?;
        }

        let persistence = lua.create_table()?;
        persistence.set("glb", lua.registry_value::<Table>(global)?)?;
        if let Some(task) = task {
            let key = match locals.entry(task.id()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    debug!("Creating store for task {}", task.id());
                    entry.insert(lua.create_registry_value(lua.create_table()?)?)
                }
            };
            persistence.set("local", lua.registry_value::<Table>(key)?)?;
        }
        globals.set(GLOBAL_PERSISTENCE, persistence)?;

        for name in contexts.apply(lua, globals)? {
            if !injected.contains(&name) {
                injected.push(name);
            }
        }
        Ok(())
    }
}

fn execute(
    lua: &Lua,
    globals: &Table,
    program: &Program<'_>,
    args: Option<&SyscallArguments>,
) -> mlua::Result<Value> {
    let words = args.copied().unwrap_or_default();
    let positional = (
        words[0] as i64,
        words[1] as i64,
        words[2] as i64,
        words[3] as i64,
        words[4] as i64,
        words[5] as i64,
    );
    match program {
        Program::Scripted(info) => {
            lua.load(info.source.as_str())
                .set_name(format!("={}", info.entry_point))
                .exec()?;
            match globals.get::<Value>(info.entry_point.as_str())? {
                Value::Function(entry) => entry.call::<Value>(positional),
                other => Err(mlua::Error::RuntimeError(format!(
                    "entry point {} is not a function (got {})",
                    info.entry_point,
                    other.type_name()
                ))),
            }
        }
        Program::Dynamic(key, _) => {
            let function: Function = lua.registry_value(key)?;
            function.call::<Value>(positional)
        }
        Program::Source(source) => lua.load(*source).set_name("=change-state").eval::<Value>(),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("hooks", &self.hooks.len())
            .field("before", &self.callbacks.len(CallbackPhase::Before))
            .field("after", &self.callbacks.len(CallbackPhase::After))
            .finish()
    }
}
