//! Native capabilities exposed to scripts under the `hooks` table
//!
//! Hooks are either task-independent (usable from any script, including
//! change-state payloads) or bound to the thread whose syscall triggered the
//! callback. [`HookRegistry::materialize`] instantiates fresh closures for one
//! invocation.

mod dynamic;
mod memory;
mod output;
mod process;
mod signals;
mod threads;

pub use output::ScriptOutput;

use crate::callback::Callback;
use mlua::{ExternalError, Lua, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use syshook_callbacks::CallbackRegistry;
use syshook_core::{InterceptError, Result, Task};

/// A hook as callable from Lua
pub type HookFn = Box<dyn Fn(&Lua, Vec<Value>) -> mlua::Result<Value> + Send + Sync>;

pub type IndependentFactory = Arc<dyn Fn(&ScriptScope) -> HookFn + Send + Sync>;
pub type DependentFactory = Arc<dyn Fn(&ScriptScope, Arc<dyn Task>) -> HookFn + Send + Sync>;

/// Box a closure as a [`HookFn`]
pub fn hook_fn<F>(f: F) -> HookFn
where
    F: Fn(&Lua, Vec<Value>) -> mlua::Result<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Documentation of a hook as listed by `hooks-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookInfo {
    pub name: String,
    pub description: String,
    pub args: String,
    #[serde(rename = "return-value")]
    pub return_value: String,
}

impl HookInfo {
    pub fn new(name: &str, description: &str, args: &str, return_value: &str) -> Self {
        HookInfo {
            name: name.to_string(),
            description: description.to_string(),
            args: args.to_string(),
            return_value: return_value.to_string(),
        }
    }
}

/// How a hook gets its context
#[derive(Clone)]
pub enum HookBinding {
    Independent(IndependentFactory),
    Dependent(DependentFactory),
}

impl HookBinding {
    pub fn kind(&self) -> &'static str {
        match self {
            HookBinding::Independent(_) => "task-independent",
            HookBinding::Dependent(_) => "task-dependent",
        }
    }
}

/// Whether a task-dependent hook may be called more than once per invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookPolicy {
    #[default]
    Reusable,
    SingleUse,
}

/// What the running script is, for hooks that describe it
#[derive(Debug, Clone)]
pub struct ScriptScope {
    pub source: Arc<str>,
}

impl ScriptScope {
    pub fn new(source: &str) -> Self {
        ScriptScope {
            source: Arc::from(source),
        }
    }
}

struct Hook {
    info: HookInfo,
    binding: HookBinding,
}

/// All hooks by name; names are unique across both kinds
pub struct HookRegistry {
    hooks: RwLock<BTreeMap<String, Hook>>,
    policy: HookPolicy,
}

impl HookRegistry {
    pub fn new(policy: HookPolicy) -> Self {
        HookRegistry {
            hooks: RwLock::new(BTreeMap::new()),
            policy,
        }
    }

    /// A registry holding every built-in hook
    pub fn with_builtins(
        policy: HookPolicy,
        callbacks: Arc<CallbackRegistry<Callback>>,
        output: ScriptOutput,
    ) -> Result<Self> {
        let registry = HookRegistry::new(policy);
        dynamic::register(&registry, callbacks)?;
        output::register(&registry, output)?;
        signals::register(&registry)?;
        memory::register(&registry)?;
        process::register(&registry)?;
        threads::register(&registry)?;
        Ok(registry)
    }

    pub fn policy(&self) -> HookPolicy {
        self.policy
    }

    fn insert(&self, info: HookInfo, binding: HookBinding) -> Result<()> {
        let mut hooks = self.hooks.write().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = hooks.get(&info.name) {
            return Err(InterceptError::DuplicateHook {
                name: info.name,
                kind: existing.binding.kind(),
            });
        }
        hooks.insert(info.name.clone(), Hook { info, binding });
        Ok(())
    }

    pub fn register_independent<F>(&self, info: HookInfo, factory: F) -> Result<()>
    where
        F: Fn(&ScriptScope) -> HookFn + Send + Sync + 'static,
    {
        self.insert(info, HookBinding::Independent(Arc::new(factory)))
    }

    pub fn register_dependent<F>(&self, info: HookInfo, factory: F) -> Result<()>
    where
        F: Fn(&ScriptScope, Arc<dyn Task>) -> HookFn + Send + Sync + 'static,
    {
        self.insert(info, HookBinding::Dependent(Arc::new(factory)))
    }

    pub fn get(&self, name: &str) -> Option<HookInfo> {
        let hooks = self.hooks.read().unwrap_or_else(|p| p.into_inner());
        hooks.get(name).map(|hook| hook.info.clone())
    }

    /// Documentation of every hook, sorted by name ignoring case
    pub fn list_all(&self) -> Vec<HookInfo> {
        let hooks = self.hooks.read().unwrap_or_else(|p| p.into_inner());
        let mut infos: Vec<HookInfo> = hooks.values().map(|hook| hook.info.clone()).collect();
        infos.sort_by_key(|info| info.name.to_lowercase());
        infos
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh callables for one invocation
    ///
    /// Task-dependent hooks are included only when a task is given.
    pub fn materialize(
        &self,
        task: Option<&Arc<dyn Task>>,
        scope: &ScriptScope,
    ) -> Vec<(String, HookFn)> {
        let hooks = self.hooks.read().unwrap_or_else(|p| p.into_inner());
        hooks
            .iter()
            .filter_map(|(name, hook)| {
                let call = match (&hook.binding, task) {
                    (HookBinding::Independent(factory), _) => factory(scope),
                    (HookBinding::Dependent(factory), Some(task)) => {
                        let call = factory(scope, Arc::clone(task));
                        match self.policy {
                            HookPolicy::Reusable => call,
                            HookPolicy::SingleUse => single_use(name.clone(), call),
                        }
                    }
                    (HookBinding::Dependent(_), None) => return None,
                };
                Some((name.clone(), call))
            })
            .collect()
    }
}

/// A materialized hook as installed into one invocation
///
/// Lua may keep the function after the invocation returns (for example in
/// persisted state). Once [`HookLease::revoke`] runs, calls fail and the
/// closure, together with any task it captured, is dropped.
#[derive(Clone)]
pub struct HookLease {
    name: Arc<str>,
    call: Arc<RwLock<Option<HookFn>>>,
}

impl HookLease {
    pub fn new(name: &str, call: HookFn) -> Self {
        HookLease {
            name: Arc::from(name),
            call: Arc::new(RwLock::new(Some(call))),
        }
    }

    pub fn call(&self, lua: &Lua, args: Vec<Value>) -> mlua::Result<Value> {
        let call = self.call.read().unwrap_or_else(|p| p.into_inner());
        match call.as_ref() {
            Some(call) => call(lua, args),
            None => Err(InterceptError::HookExpired(self.name.to_string()).into_lua_err()),
        }
    }

    pub fn revoke(&self) {
        self.call.write().unwrap_or_else(|p| p.into_inner()).take();
    }

    pub fn is_live(&self) -> bool {
        self.call.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

fn single_use(name: String, call: HookFn) -> HookFn {
    let used = AtomicBool::new(false);
    hook_fn(move |lua, args| {
        if used.swap(true, Ordering::SeqCst) {
            return Err(InterceptError::HookAlreadyUsed(name.clone()).into_lua_err());
        }
        call(lua, args)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syshook_core::mock::MockTask;

    fn noop() -> HookFn {
        hook_fn(|_, _| Ok(Value::Nil))
    }

    fn builtins() -> HookRegistry {
        HookRegistry::with_builtins(
            HookPolicy::Reusable,
            Arc::new(CallbackRegistry::new()),
            ScriptOutput::buffer(),
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_name_rejected_across_kinds() {
        let registry = HookRegistry::new(HookPolicy::Reusable);
        registry
            .register_independent(HookInfo::new("dup", "", "", ""), |_| noop())
            .unwrap();
        let err = registry
            .register_dependent(HookInfo::new("dup", "", "", ""), |_, _| noop())
            .unwrap_err();
        assert!(err.to_string().contains("task-independent"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_all_sorted_ignoring_case() {
        let registry = builtins();
        let names: Vec<String> = registry.list_all().into_iter().map(|h| h.name).collect();
        let mut expected = names.clone();
        expected.sort_by_key(|name| name.to_lowercase());
        assert_eq!(names, expected);
        assert_eq!(names.len(), registry.len());
        assert_eq!(names.first().map(String::as_str), Some("AddCbAfter"));
    }

    #[test]
    fn test_builtin_count() {
        assert_eq!(builtins().len(), 23);
    }

    #[test]
    fn test_materialize_without_task_skips_dependent() {
        let registry = builtins();
        let scope = ScriptScope::new("");
        let names: Vec<String> = registry
            .materialize(None, &scope)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(names.contains(&"AddCbBefore".to_string()));
        assert!(names.contains(&"print".to_string()));
        assert!(!names.contains(&"readBytes".to_string()));

        let task: Arc<dyn Task> = Arc::new(MockTask::new(1));
        assert_eq!(registry.materialize(Some(&task), &scope).len(), 23);
    }

    #[test]
    fn test_single_use_policy() {
        let registry = HookRegistry::new(HookPolicy::SingleUse);
        registry
            .register_dependent(HookInfo::new("once", "", "", ""), |_, _| noop())
            .unwrap();
        let task: Arc<dyn Task> = Arc::new(MockTask::new(1));
        let hooks = registry.materialize(Some(&task), &ScriptScope::new(""));
        let lua = Lua::new();
        let (_, once) = &hooks[0];
        assert!(once(&lua, Vec::new()).is_ok());
        let err = once(&lua, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("only once"));

        let fresh = registry.materialize(Some(&task), &ScriptScope::new(""));
        assert!((fresh[0].1)(&lua, Vec::new()).is_ok());
    }

    #[test]
    fn test_revoked_lease_releases_task() {
        let registry = builtins();
        let task: Arc<dyn Task> = Arc::new(MockTask::new(3));
        let leases: Vec<HookLease> = registry
            .materialize(Some(&task), &ScriptScope::new(""))
            .into_iter()
            .map(|(name, call)| HookLease::new(&name, call))
            .collect();
        assert!(Arc::strong_count(&task) > 1);

        let lua = Lua::new();
        let pid = leases.iter().find(|l| &*l.name == "getPidInfo").unwrap().clone();
        assert!(pid.call(&lua, Vec::new()).is_ok());

        leases.iter().for_each(HookLease::revoke);
        assert_eq!(Arc::strong_count(&task), 1);
        assert!(!pid.is_live());
        let err = pid.call(&lua, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("finished invocation"));
    }
}
