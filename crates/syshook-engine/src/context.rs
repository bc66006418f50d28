//! Extra values a caller injects into a script's globals

use mlua::{Lua, LuaSerdeExt, Table, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(value: serde_json::Value) -> Self {
        ContextValue::Json(value)
    }
}

/// Named tables of values set as globals for one invocation
///
/// A context sharing its name with an injected table (such as `args`) adds
/// fields to that table.
#[derive(Debug, Clone, Default)]
pub struct ScriptContexts {
    entries: Vec<(String, String, ContextValue)>,
}

impl ScriptContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, context: &str, key: &str, value: impl Into<ContextValue>) -> Self {
        self.entries
            .push((context.to_string(), key.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set every entry on `globals`, returning the global names touched
    pub(crate) fn apply(&self, lua: &Lua, globals: &Table) -> mlua::Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for (context, key, value) in &self.entries {
            let table = match globals.get::<Value>(context.as_str())? {
                Value::Table(table) => table,
                _ => {
                    let table = lua.create_table()?;
                    globals.set(context.as_str(), table.clone())?;
                    table
                }
            };
            let value = match value {
                ContextValue::Integer(i) => Value::Integer(*i),
                ContextValue::Text(s) => Value::String(lua.create_string(s)?),
                ContextValue::Json(json) => lua.to_value(json)?,
            };
            table.set(key.as_str(), value)?;
            if !names.contains(context) {
                names.push(context.clone());
            }
        }
        Ok(names)
    }
}
