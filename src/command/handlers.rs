//! The built-in commands

use super::protocol::{
    CallbacksPayload, ChangeStatePayload, HooksPayload, Request, Response, UnregisterOptions,
    UnregisterPayload, CHANGE_STATE, CURRENT_CALLBACKS, HOOKS_INFO, UNREGISTER_CALLBACKS,
};
use super::Command;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use syshook_core::Result;
use syshook_engine::Engine;

/// `hooks-info`: documentation of every hook
pub struct HooksInfo {
    engine: Arc<Engine>,
}

impl HooksInfo {
    pub fn new(engine: Arc<Engine>) -> Self {
        HooksInfo { engine }
    }
}

impl Command for HooksInfo {
    fn name(&self) -> &'static str {
        HOOKS_INFO
    }

    fn execute(&self, _request: &Request) -> Result<Response> {
        let hooks = self.engine.hooks().list_all();
        let message = format!("{} hooks available", hooks.len());
        let payload = serde_json::to_value(HooksPayload { hooks })?;
        Ok(Response::ok(message, Some(payload)))
    }
}

/// `change-state`: run a script once, usually to add callbacks
pub struct ChangeState {
    engine: Arc<Engine>,
}

impl ChangeState {
    pub fn new(engine: Arc<Engine>) -> Self {
        ChangeState { engine }
    }
}

impl Command for ChangeState {
    fn name(&self) -> &'static str {
        CHANGE_STATE
    }

    fn execute(&self, request: &Request) -> Result<Response> {
        let payload: ChangeStatePayload = request.payload_as()?;
        let result = self.engine.change_state(&payload.source)?;
        info!("State changed by script ({} bytes)", payload.source.len());
        Ok(Response::ok("State changed", Some(Value::String(result))))
    }
}

/// `current-callbacks`: every registered callback
pub struct CurrentCallbacks {
    engine: Arc<Engine>,
}

impl CurrentCallbacks {
    pub fn new(engine: Arc<Engine>) -> Self {
        CurrentCallbacks { engine }
    }
}

impl Command for CurrentCallbacks {
    fn name(&self) -> &'static str {
        CURRENT_CALLBACKS
    }

    fn execute(&self, _request: &Request) -> Result<Response> {
        let callbacks = self.engine.list_callbacks();
        let message = format!("{} callbacks registered", callbacks.len());
        let payload = serde_json::to_value(CallbacksPayload { callbacks })?;
        Ok(Response::ok(message, Some(payload)))
    }
}

/// `unregister-callbacks`: drop all callbacks or the listed ones
pub struct UnregisterCallbacks {
    engine: Arc<Engine>,
}

impl UnregisterCallbacks {
    pub fn new(engine: Arc<Engine>) -> Self {
        UnregisterCallbacks { engine }
    }
}

impl Command for UnregisterCallbacks {
    fn name(&self) -> &'static str {
        UNREGISTER_CALLBACKS
    }

    fn execute(&self, request: &Request) -> Result<Response> {
        let payload: UnregisterPayload = request.payload_as()?;
        let callbacks = self.engine.callbacks();
        let removed = match payload.options {
            UnregisterOptions::All => callbacks.unregister_all(),
            UnregisterOptions::List => {
                // Stops at the first missing key; earlier removals stand
                for key in &payload.list {
                    callbacks.unregister(key.sysno, key.phase)?;
                }
                payload.list.len()
            }
        };
        info!("Unregistered {} callbacks", removed);
        Ok(Response::ok(format!("Removed {} callbacks", removed), None))
    }
}
