//! The two kinds of executable callback

use mlua::{Function, Lua, RegistryKey};
use syshook_callbacks::CallbackInfo;
use syshook_core::{CallbackPhase, Result, Sysno};

use crate::marshal::script_error;

/// Script source plus the name of the function to call
#[derive(Debug, Clone)]
pub struct ScriptedCallback {
    info: CallbackInfo,
}

impl ScriptedCallback {
    /// Validate `info` and complete its body and parameter names from the source
    pub fn new(mut info: CallbackInfo) -> Result<Self> {
        info.validate()?;
        info.fill_from_declaration();
        Ok(ScriptedCallback { info })
    }

    pub fn info(&self) -> &CallbackInfo {
        &self.info
    }
}

/// A Lua function captured by `AddCbBefore` / `AddCbAfter`
///
/// The function lives in the VM registry; only the key is held here so the
/// callback can be listed or dropped without entering the VM.
#[derive(Debug)]
pub struct DynamicCallback {
    key: RegistryKey,
    info: Option<CallbackInfo>,
}

impl DynamicCallback {
    pub fn new(lua: &Lua, function: Function, info: Option<CallbackInfo>) -> Result<Self> {
        let key = lua.create_registry_value(function).map_err(script_error)?;
        Ok(DynamicCallback { key, info })
    }

    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    pub fn info(&self) -> Option<&CallbackInfo> {
        self.info.as_ref()
    }
}

#[derive(Debug)]
pub enum Callback {
    Scripted(ScriptedCallback),
    Dynamic(DynamicCallback),
}

impl Callback {
    pub fn kind(&self) -> &'static str {
        match self {
            Callback::Scripted(_) => "scripted",
            Callback::Dynamic(_) => "dynamic",
        }
    }

    /// Structured description, or an "unknown" placeholder when there is none
    pub fn describe(&self, sysno: Sysno, phase: CallbackPhase) -> CallbackInfo {
        let info = match self {
            Callback::Scripted(cb) => Some(cb.info()),
            Callback::Dynamic(cb) => cb.info(),
        };
        info.cloned()
            .unwrap_or_else(|| CallbackInfo::unknown(sysno, phase))
    }
}

impl From<ScriptedCallback> for Callback {
    fn from(cb: ScriptedCallback) -> Self {
        Callback::Scripted(cb)
    }
}

impl From<DynamicCallback> for Callback {
    fn from(cb: DynamicCallback) -> Self {
        Callback::Dynamic(cb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_requires_entry_point() {
        let info = CallbackInfo {
            sysno: 1,
            entry_point: String::new(),
            source: "function f() end".to_string(),
            body: String::new(),
            args: Vec::new(),
            phase: CallbackPhase::Before,
        };
        assert!(ScriptedCallback::new(info).is_err());
    }

    #[test]
    fn test_scripted_fills_params() {
        let info = CallbackInfo {
            sysno: 1,
            entry_point: "f".to_string(),
            source: "function f(fd, buf) return nil end".to_string(),
            body: String::new(),
            args: Vec::new(),
            phase: CallbackPhase::Before,
        };
        let cb = ScriptedCallback::new(info).unwrap();
        assert_eq!(cb.info().args, vec!["fd", "buf"]);
    }

    #[test]
    fn test_anonymous_dynamic_described_as_unknown() {
        let lua = Lua::new();
        let function: Function = lua.load("return function() end").eval().unwrap();
        let cb = Callback::from(DynamicCallback::new(&lua, function, None).unwrap());
        let info = cb.describe(7, CallbackPhase::After);
        assert_eq!(info.entry_point, "unknown");
        assert_eq!(info.sysno, 7);
        assert_eq!(cb.kind(), "dynamic");
    }
}
