//! Thread-group control hooks

use super::{hook_fn, HookInfo, HookRegistry};
use crate::marshal::{check_arity, check_arity_range, dto_to_value, i32_arg};
use log::debug;
use mlua::{ExternalError, Value};
use syshook_core::{InterceptError, Result};

pub(super) fn register(registry: &HookRegistry) -> Result<()> {
    registry.register_dependent(
        HookInfo::new(
            "stopThreads",
            "Stops all threads of the Task's thread group except the calling one",
            "\nno args;\n",
            "null",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("stopThreads", &args, 0)?;
                debug!("Task {} stopping sibling threads", task.id());
                task.stop_siblings();
                Ok(Value::Nil)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "resumeThreads",
            "Resumes threads stopped by stopThreads",
            "\nno args;\n",
            "null",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("resumeThreads", &args, 0)?;
                debug!("Task {} resuming sibling threads", task.id());
                task.resume_siblings();
                Ok(Value::Nil)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getThreadInfo",
            "Provides thread id, thread group id and all thread ids of the group",
            "\ntid\tnumber\t(optional, thread to describe instead of the calling one);\n",
            "table {tid number, tgid number, tids []number}",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity_range("getThreadInfo", &args, 0..=1)?;
                let tid = match args.first() {
                    None | Some(Value::Nil) => None,
                    Some(_) => Some(i32_arg("getThreadInfo", &args, 0)?),
                };
                let info = task
                    .thread_info(tid)
                    .map_err(|e| InterceptError::from(e).into_lua_err())?;
                dto_to_value(lua, &info)
            })
        },
    )
}
