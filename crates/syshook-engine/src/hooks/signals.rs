//! Signal hooks: name conversions plus the task's signal state

use super::{hook_fn, HookInfo, HookRegistry};
use crate::marshal::{check_arity, dto_to_value, i32_arg, int_arg, string_arg, strings_to_value};
use log::info;
use mlua::{ExternalError, Value};
use syshook_core::signal::{mask_to_names, signal_number};
use syshook_core::{InterceptError, Result};

pub(super) fn register(registry: &HookRegistry) -> Result<()> {
    registry.register_independent(
        HookInfo::new(
            "signalMaskToNames",
            "Converts a signal mask to the names of the signals it contains",
            "\nmask\tnumber\t(signal mask, bit n-1 stands for signal n);\n",
            "names\t[]string\t(signal names like SIGINT)",
        ),
        |_| {
            hook_fn(|lua, args| {
                check_arity("signalMaskToNames", &args, 1)?;
                let mask = int_arg("signalMaskToNames", &args, 0)? as u64;
                strings_to_value(lua, mask_to_names(mask))
            })
        },
    )?;

    registry.register_independent(
        HookInfo::new(
            "nameToSignal",
            "Converts a signal name to its number",
            "\nname\tstring\t(signal name, with or without the SIG prefix);\n",
            "signo\tnumber\t(signal number)",
        ),
        |_| {
            hook_fn(|_, args| {
                check_arity("nameToSignal", &args, 1)?;
                let name = string_arg("nameToSignal", &args, 0)?;
                match signal_number(&name) {
                    Some(signo) => Ok(Value::Integer(signo as i64)),
                    None => Err(InterceptError::Script(format!("nameToSignal: unknown signal {}", name))
                        .into_lua_err()),
                }
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getSignalInfo",
            "Provides signal masks and sigactions of the Task",
            "\nno args;\n",
            "table {SignalMask number, SignalWaitMask number, SavedSignalMask number, \
             SigActions []{Handler number, Flags number, Restorer number, Mask number}}",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getSignalInfo", &args, 0)?;
                dto_to_value(lua, &task.signal_state())
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "sendSignal",
            "Sends a signal to a thread of the Task's pid namespace",
            "\ntid\tnumber\t(receiving thread);\nsigno\tnumber\t(signal to send);\n",
            "null",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("sendSignal", &args, 2)?;
                let tid = i32_arg("sendSignal", &args, 0)?;
                let signo = i32_arg("sendSignal", &args, 1)?;
                task.send_signal(tid, signo)
                    .map_err(|errno| InterceptError::from(errno).into_lua_err())?;
                info!("Task {} sent signal {} to thread {}", task.id(), signo, tid);
                Ok(Value::Nil)
            })
        },
    )
}
