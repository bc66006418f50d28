//! The `print` hook and where it writes

use super::{hook_fn, HookInfo, HookRegistry};
use crate::marshal::display_value;
use mlua::{ExternalError, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};
use syshook_core::Result;

/// Destination of text printed by scripts
#[derive(Clone, Default)]
pub enum ScriptOutput {
    #[default]
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl ScriptOutput {
    pub fn stdout() -> Self {
        ScriptOutput::Stdout
    }

    /// An in-memory sink, mostly for tests
    pub fn buffer() -> Self {
        ScriptOutput::Buffer(Arc::new(Mutex::new(Vec::new())))
    }

    /// Everything written so far; always empty for stdout
    pub fn contents(&self) -> String {
        match self {
            ScriptOutput::Stdout => String::new(),
            ScriptOutput::Buffer(buf) => {
                let buf = buf.lock().unwrap_or_else(|p| p.into_inner());
                String::from_utf8_lossy(&buf).into_owned()
            }
        }
    }

    fn write(&self, text: &str) -> std::io::Result<()> {
        match self {
            ScriptOutput::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            ScriptOutput::Buffer(buf) => {
                buf.lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ScriptOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptOutput::Stdout => f.write_str("Stdout"),
            ScriptOutput::Buffer(_) => f.write_str("Buffer"),
        }
    }
}

pub(super) fn register(registry: &HookRegistry, output: ScriptOutput) -> Result<()> {
    registry.register_independent(
        HookInfo::new(
            "print",
            "Prints all passed args",
            "\nmsgs\t...any\t(values to be printed);\n",
            "null",
        ),
        move |_| {
            let output = output.clone();
            hook_fn(move |lua, args| {
                let text = args
                    .iter()
                    .map(|value| display_value(lua, value))
                    .collect::<Vec<_>>()
                    .join(" ");
                output.write(&text).map_err(|e| e.into_lua_err())?;
                Ok(Value::Nil)
            })
        },
    )
}
