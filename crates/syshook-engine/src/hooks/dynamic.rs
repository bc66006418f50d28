//! `AddCbBefore` / `AddCbAfter`: callbacks registered from inside a script

use super::{hook_fn, HookInfo, HookRegistry, ScriptScope};
use crate::callback::{Callback, DynamicCallback};
use crate::marshal::{check_arity, type_error, value_to_i64};
use log::debug;
use mlua::{ExternalError, Function, Lua, Value};
use std::sync::Arc;
use syshook_callbacks::{CallbackInfo, CallbackRegistry};
use syshook_core::{CallbackPhase, Result, Sysno};

pub(super) fn register(
    registry: &HookRegistry,
    callbacks: Arc<CallbackRegistry<Callback>>,
) -> Result<()> {
    for phase in CallbackPhase::all() {
        let (name, when) = match phase {
            CallbackPhase::Before => ("AddCbBefore", "before"),
            CallbackPhase::After => ("AddCbAfter", "after"),
        };
        let info = HookInfo::new(
            name,
            &format!(
                "Is used for dynamic callback registration (callback will be executed {} syscall)",
                when
            ),
            &format!(
                "\nsysno\tnumber\t(syscall number, callback will be executed {} syscall with this number);\n\
                 callback\tfunction\t(lua function to call {} syscall execution);\n",
                when, when
            ),
            "null",
        );
        let callbacks = Arc::clone(&callbacks);
        registry.register_independent(info, move |scope| {
            let callbacks = Arc::clone(&callbacks);
            let scope = scope.clone();
            hook_fn(move |lua, args| {
                add_callback(lua, name, phase, &args, &scope, &callbacks)?;
                Ok(Value::Nil)
            })
        })?;
    }
    Ok(())
}

fn add_callback(
    lua: &Lua,
    hook: &str,
    phase: CallbackPhase,
    args: &[Value],
    scope: &ScriptScope,
    callbacks: &CallbackRegistry<Callback>,
) -> mlua::Result<()> {
    check_arity(hook, args, 2)?;
    let sysno = value_to_i64(&args[0])
        .and_then(|n| Sysno::try_from(n).ok())
        .ok_or_else(|| type_error(hook, 0, "a syscall number", &args[0]))?;
    let function = match &args[1] {
        Value::Function(function) => function.clone(),
        other => return Err(type_error(hook, 1, "a function", other)),
    };

    let info = global_name_of(lua, &function)?
        .map(|name| CallbackInfo::new(sysno, phase, name, &*scope.source));
    debug!(
        "{} registering {} for syscall {}",
        hook,
        info.as_ref().map_or("anonymous function", |i| i.entry_point.as_str()),
        sysno
    );

    let callback = DynamicCallback::new(lua, function, info).map_err(|e| e.into_lua_err())?;
    callbacks.register(sysno, phase, Callback::from(callback));
    Ok(())
}

/// Name of the global variable holding `function`, if any
fn global_name_of(lua: &Lua, function: &Function) -> mlua::Result<Option<String>> {
    let mut found = None;
    lua.globals().for_each(|key: Value, value: Value| {
        if found.is_none() {
            if let (Value::String(name), Value::Function(candidate)) = (&key, &value) {
                if candidate == function {
                    found = Some(name.to_string_lossy().to_string());
                }
            }
        }
        Ok(())
    })?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookFn, HookPolicy};

    fn setup() -> (Lua, Arc<CallbackRegistry<Callback>>, Vec<(String, HookFn)>) {
        let callbacks = Arc::new(CallbackRegistry::new());
        let registry = HookRegistry::new(HookPolicy::Reusable);
        register(&registry, Arc::clone(&callbacks)).unwrap();
        let source = "function on_write(fd, buf, n) return nil end";
        let hooks = registry.materialize(None, &ScriptScope::new(source));
        let lua = Lua::new();
        lua.load(source).exec().unwrap();
        (lua, callbacks, hooks)
    }

    fn hook<'a>(hooks: &'a [(String, HookFn)], name: &str) -> &'a HookFn {
        &hooks.iter().find(|(n, _)| n == name).unwrap().1
    }

    #[test]
    fn test_named_function_gets_descriptor() {
        let (lua, callbacks, hooks) = setup();
        let function: Value = lua.globals().get("on_write").unwrap();
        hook(&hooks, "AddCbBefore")(&lua, vec![Value::Integer(1), function]).unwrap();

        let cb = callbacks.lookup(1, CallbackPhase::Before).unwrap();
        let info = cb.describe(1, CallbackPhase::Before);
        assert_eq!(info.entry_point, "on_write");
        assert_eq!(info.args, vec!["fd", "buf", "n"]);
        assert!(callbacks.lookup(1, CallbackPhase::After).is_none());
    }

    #[test]
    fn test_anonymous_function_is_unknown() {
        let (lua, callbacks, hooks) = setup();
        let function: Value = lua.load("return function() end").eval().unwrap();
        hook(&hooks, "AddCbAfter")(&lua, vec![Value::Integer(60), function]).unwrap();

        let cb = callbacks.lookup(60, CallbackPhase::After).unwrap();
        assert_eq!(cb.describe(60, CallbackPhase::After).entry_point, "unknown");
    }

    #[test]
    fn test_bad_arguments_register_nothing() {
        let (lua, callbacks, hooks) = setup();
        let add = hook(&hooks, "AddCbBefore");
        let function: Value = lua.globals().get("on_write").unwrap();

        assert!(add(&lua, vec![Value::Integer(1)]).is_err());
        assert!(add(&lua, vec![Value::Integer(1), Value::Nil]).is_err());
        assert!(add(&lua, vec![Value::Nil, function.clone()]).is_err());
        assert!(add(&lua, vec![Value::Integer(-1), function]).is_err());
        assert!(callbacks.is_empty());
    }
}
