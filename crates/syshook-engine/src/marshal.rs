//! Conversions between syscall words and Lua values
//!
//! Argument helpers return `mlua::Result` so hooks can use them with `?`; the
//! failures carry an [`InterceptError`] that [`script_error`] recovers at the
//! engine boundary.

use mlua::{DeserializeOptions, ExternalError, Lua, LuaSerdeExt, Table, Value};
use serde::Serialize;
use std::ops::RangeInclusive;
use syshook_core::{
    InterceptError, InvocationOutcome, ReturnOverride, Result, SyscallArguments, Word,
    SYSCALL_ARG_COUNT,
};

/// The `args` table: `arg0` .. `arg5` as Lua integers
pub fn arguments_table(lua: &Lua, args: &SyscallArguments) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for (i, word) in args.iter().enumerate() {
        table.set(format!("arg{}", i), word as i64)?;
    }
    Ok(table)
}

pub fn check_arity(hook: &str, args: &[Value], expected: usize) -> mlua::Result<()> {
    if args.len() != expected {
        return Err(InterceptError::args_count(hook, expected, args.len()).into_lua_err());
    }
    Ok(())
}

pub fn check_arity_range(
    hook: &str,
    args: &[Value],
    expected: RangeInclusive<usize>,
) -> mlua::Result<()> {
    if !expected.contains(&args.len()) {
        let wanted = format!("{} to {}", expected.start(), expected.end());
        return Err(InterceptError::args_count(hook, wanted, args.len()).into_lua_err());
    }
    Ok(())
}

pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

pub fn value_to_word(value: &Value) -> Option<Word> {
    value_to_i64(value).map(|i| i as Word)
}

/// Bytes of a Lua string or of a sequence of integers in `0..=255`
pub fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Table(table) => {
            let len = table.raw_len();
            let mut bytes = Vec::with_capacity(len);
            for i in 1..=len {
                let item: Value = table.raw_get(i).ok()?;
                bytes.push(u8::try_from(value_to_i64(&item)?).ok()?);
            }
            Some(bytes)
        }
        _ => None,
    }
}

pub fn type_error(hook: &str, index: usize, expected: &'static str, got: &Value) -> mlua::Error {
    InterceptError::arg_type(hook, index, expected, got.type_name()).into_lua_err()
}

pub fn int_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<i64> {
    value_to_i64(&args[index]).ok_or_else(|| type_error(hook, index, "an integer", &args[index]))
}

pub fn word_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<Word> {
    value_to_word(&args[index]).ok_or_else(|| type_error(hook, index, "an address", &args[index]))
}

pub fn len_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<usize> {
    int_arg(hook, args, index).and_then(|n| {
        usize::try_from(n).map_err(|_| type_error(hook, index, "a non-negative length", &args[index]))
    })
}

/// Largest single transfer between a script and task memory
pub const MAX_TRANSFER_LEN: usize = 16 << 20;

/// A length the hook will allocate a buffer for, at most [`MAX_TRANSFER_LEN`]
pub fn transfer_len_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<usize> {
    let len = len_arg(hook, args, index)?;
    if len > MAX_TRANSFER_LEN {
        return Err(type_error(hook, index, "a length of at most 16 MiB", &args[index]));
    }
    Ok(len)
}

pub fn i32_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<i32> {
    int_arg(hook, args, index).and_then(|n| {
        i32::try_from(n).map_err(|_| type_error(hook, index, "a 32-bit integer", &args[index]))
    })
}

pub fn string_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<String> {
    match &args[index] {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(type_error(hook, index, "a string", other)),
    }
}

pub fn bytes_arg(hook: &str, args: &[Value], index: usize) -> mlua::Result<Vec<u8>> {
    value_to_bytes(&args[index]).ok_or_else(|| type_error(hook, index, "a byte buffer", &args[index]))
}

pub fn bytes_to_value(lua: &Lua, bytes: &[u8]) -> mlua::Result<Value> {
    lua.create_string(bytes).map(Value::String)
}

pub fn strings_to_value(lua: &Lua, items: Vec<String>) -> mlua::Result<Value> {
    lua.create_sequence_from(items).map(Value::Table)
}

pub fn dto_to_value<T: Serialize>(lua: &Lua, dto: &T) -> mlua::Result<Value> {
    lua.to_value(dto)
}

/// JSON form of a Lua value; functions and other opaque values become `null`
pub fn to_json(lua: &Lua, value: Value) -> Result<serde_json::Value> {
    let options = DeserializeOptions::new().deny_unsupported_types(false);
    lua.from_value_with(value, options).map_err(script_error)
}

/// Text for printing: strings as they are, anything else as JSON
pub fn display_value(lua: &Lua, value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string_lossy().to_string(),
        other => to_json(lua, other.clone())
            .map(|json| json.to_string())
            .unwrap_or_else(|_| other.type_name().to_string()),
    }
}

/// Apply a callback's return value to the arguments it was called with
///
/// Integer keys (or decimal string keys) rewrite argument slots; `ret` together
/// with `errno` yields a [`ReturnOverride`]. Anything other than a table
/// changes nothing. On error the arguments are left untouched.
pub fn harvest(args: &SyscallArguments, result: &Value) -> Result<InvocationOutcome> {
    let Value::Table(table) = result else {
        return Ok(InvocationOutcome::unchanged(*args));
    };

    let mut entries = Vec::new();
    table
        .for_each(|key: Value, value: Value| {
            entries.push((key, value));
            Ok(())
        })
        .map_err(script_error)?;

    let mut new_args = *args;
    let mut ret = None;
    let mut errno = None;
    for (key, value) in entries {
        let slot = match &key {
            Value::String(s) => match s.to_str().map(|s| s.to_string()) {
                Ok(name) if name == "ret" => {
                    ret = Some(override_word("ret", &value)?);
                    continue;
                }
                Ok(name) if name == "errno" => {
                    errno = Some(override_word("errno", &value)?);
                    continue;
                }
                Ok(name) => match name.trim().parse::<i64>() {
                    Ok(index) => index,
                    Err(_) => continue,
                },
                Err(_) => continue,
            },
            other => match value_to_i64(other) {
                Some(index) => index,
                None => continue,
            },
        };
        let index = usize::try_from(slot)
            .ok()
            .filter(|i| *i < SYSCALL_ARG_COUNT)
            .ok_or(InterceptError::ArgIndexOutOfRange(slot))?;
        new_args[index] = override_word(&format!("argument {}", index), &value)?;
    }

    let ret = match (ret, errno) {
        (Some(ret), Some(errno)) => Some(ReturnOverride::new(ret, errno)),
        _ => None,
    };
    Ok(InvocationOutcome { args: new_args, ret })
}

fn override_word(what: &str, value: &Value) -> Result<Word> {
    value_to_word(value).ok_or_else(|| {
        InterceptError::Script(format!(
            "{} must be an integer, got {}",
            what,
            value.type_name()
        ))
    })
}

/// Convert a VM error into [`InterceptError::Script`], keeping the innermost cause
pub fn script_error(err: mlua::Error) -> InterceptError {
    InterceptError::Script(describe(&err))
}

fn describe(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe(cause),
        mlua::Error::WithContext { context, cause } => format!("{}: {}", context, describe(cause)),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(lua: &Lua, src: &str) -> Value {
        lua.load(src).eval().unwrap()
    }

    #[test]
    fn test_harvest_numeric_keys() {
        let lua = Lua::new();
        let args = SyscallArguments::new([1, 2, 3, 4, 5, 6]);
        let result = eval(&lua, r#"return { ["0"] = 10, [1] = 11, ["5"] = 15 }"#);
        let outcome = harvest(&args, &result).unwrap();
        assert_eq!(outcome.args, SyscallArguments::new([10, 11, 3, 4, 5, 15]));
        assert_eq!(outcome.ret, None);
    }

    #[test]
    fn test_harvest_nil_and_scalars_change_nothing() {
        let lua = Lua::new();
        let args = SyscallArguments::new([1, 2, 3, 4, 5, 6]);
        for src in ["return nil", "return 42", "return 'text'"] {
            let outcome = harvest(&args, &eval(&lua, src)).unwrap();
            assert_eq!(outcome, InvocationOutcome::unchanged(args));
        }
    }

    #[test]
    fn test_harvest_return_override() {
        let lua = Lua::new();
        let args = SyscallArguments::default();
        let outcome = harvest(&args, &eval(&lua, "return { ret = -1, errno = 98 }")).unwrap();
        assert_eq!(outcome.ret, Some(ReturnOverride::new(-1i64 as Word, 98)));

        let partial = harvest(&args, &eval(&lua, "return { ret = 3 }")).unwrap();
        assert_eq!(partial.ret, None);
    }

    #[test]
    fn test_harvest_out_of_range_index() {
        let lua = Lua::new();
        let args = SyscallArguments::default();
        let err = harvest(&args, &eval(&lua, "return { [6] = 1 }")).unwrap_err();
        assert!(matches!(err, InterceptError::ArgIndexOutOfRange(6)));
        let err = harvest(&args, &eval(&lua, r#"return { ["-1"] = 1 }"#)).unwrap_err();
        assert!(matches!(err, InterceptError::ArgIndexOutOfRange(-1)));
    }

    #[test]
    fn test_harvest_non_numeric_value_is_error() {
        let lua = Lua::new();
        let args = SyscallArguments::default();
        let err = harvest(&args, &eval(&lua, "return { [0] = 'x' }")).unwrap_err();
        assert!(err.to_string().contains("argument 0 must be an integer"));
    }

    #[test]
    fn test_value_to_bytes() {
        let lua = Lua::new();
        assert_eq!(value_to_bytes(&eval(&lua, "return 'ab'")), Some(b"ab".to_vec()));
        assert_eq!(
            value_to_bytes(&eval(&lua, "return {104, 105}")),
            Some(b"hi".to_vec())
        );
        assert_eq!(value_to_bytes(&eval(&lua, "return {300}")), None);
        assert_eq!(value_to_bytes(&Value::Nil), None);
    }

    #[test]
    fn test_check_arity_message() {
        let err = check_arity("munmap", &[Value::Nil], 2).unwrap_err();
        assert_eq!(
            script_error(err).to_string(),
            "Script error: munmap: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn test_display_value() {
        let lua = Lua::new();
        assert_eq!(display_value(&lua, &eval(&lua, "return 'plain'")), "plain");
        assert_eq!(display_value(&lua, &eval(&lua, "return 7")), "7");
        assert_eq!(display_value(&lua, &eval(&lua, "return {a = true}")), r#"{"a":true}"#);
    }
}
