//! Process description hooks and the script logger

use super::{hook_fn, HookInfo, HookRegistry};
use crate::marshal::{check_arity, dto_to_value, i32_arg, strings_to_value, to_json};
use log::info;
use mlua::{ExternalError, Value};
use syshook_core::task::split_nul_strings;
use syshook_core::{InterceptError, Result};

/// Log target of messages written by scripts
pub const SCRIPT_LOG_TARGET: &str = "syshook::script";

const FD_RECORD: &str = "{fd number, path string, mode string, nlinks number, flags string, \
                         readable boolean, writable boolean}";

pub(super) fn register(registry: &HookRegistry) -> Result<()> {
    registry.register_dependent(
        HookInfo::new(
            "getEnvs",
            "Provides environment variables of the Task",
            "\nno args;\n",
            "envs\t[]string\t(array of strings, each string has the format ENV_NAME=env_val)",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getEnvs", &args, 0)?;
                let raw = task.envv().map_err(|e| InterceptError::from(e).into_lua_err())?;
                strings_to_value(lua, split_nul_strings(&raw))
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getArgv",
            "Provides argv of the Task",
            "\nno args;\n",
            "argv\t[]string\t(array of strings)",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getArgv", &args, 0)?;
                let raw = task.argv().map_err(|e| InterceptError::from(e).into_lua_err())?;
                strings_to_value(lua, split_nul_strings(&raw))
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getPidInfo",
            "Provides PID, GID, UID and session info of Task",
            "\nno args;\n",
            "table {PID number, GID number, UID number, \
             Session {sessionID number, PGID number, foregroundID number, otherPGIDs []number} | nil}",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getPidInfo", &args, 0)?;
                dto_to_value(lua, &task.pid_info())
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getFdInfo",
            "Provides information about one specific fd of Task",
            "\nfd\tnumber\t(fd to get info about);\n",
            &format!("table {}", FD_RECORD),
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getFdInfo", &args, 1)?;
                let fd = i32_arg("getFdInfo", &args, 0)?;
                let info = task
                    .fd(fd)
                    .map_err(|e| InterceptError::from(e).into_lua_err())?;
                dto_to_value(lua, &info)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getFdsInfo",
            "Provides information about all fds of Task",
            "\nno args;\n",
            &format!("[]table {}", FD_RECORD),
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getFdsInfo", &args, 0)?;
                dto_to_value(lua, &task.fds())
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "log",
            "Logs the given message",
            "\nmsg\tany\t(message to be logged);\n",
            "null",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("log", &args, 1)?;
                let message = to_json(lua, args[0].clone()).map_err(|e| e.into_lua_err())?;
                let line = serde_json::json!({ "task": task.id(), "msg": message });
                info!(target: SCRIPT_LOG_TARGET, "{}", line);
                Ok(Value::Nil)
            })
        },
    )
}
