//! Runtime command service
//!
//! A controller talks to a running interception layer through named commands.
//! [`CommandRegistry`] maps names to handlers under its own lock; handlers
//! take the engine lock themselves when they need the VM.

mod handlers;
pub mod listener;
pub mod protocol;

pub use handlers::{ChangeState, CurrentCallbacks, HooksInfo, UnregisterCallbacks};
pub use listener::{Endpoint, Listener};
pub use protocol::{Request, Response};

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use syshook_core::{InterceptError, Result};
use syshook_engine::Engine;

/// A handler for one request type
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, request: &Request) -> Result<Response>;
}

pub struct CommandRegistry {
    commands: Mutex<BTreeMap<String, Arc<dyn Command>>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            commands: Mutex::new(BTreeMap::new()),
        }
    }

    /// A registry serving the four built-in commands against `engine`
    pub fn with_builtins(engine: Arc<Engine>) -> Result<Self> {
        let registry = CommandRegistry::new();
        registry.register(HooksInfo::new(Arc::clone(&engine)))?;
        registry.register(ChangeState::new(Arc::clone(&engine)))?;
        registry.register(CurrentCallbacks::new(Arc::clone(&engine)))?;
        registry.register(UnregisterCallbacks::new(engine))?;
        Ok(registry)
    }

    pub fn register<C: Command + 'static>(&self, command: C) -> Result<()> {
        let mut commands = self.commands.lock().unwrap_or_else(|p| p.into_inner());
        let name = command.name();
        if commands.contains_key(name) {
            return Err(InterceptError::Protocol(format!(
                "command {} is already registered",
                name
            )));
        }
        commands.insert(name.to_string(), Arc::new(command));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let commands = self.commands.lock().unwrap_or_else(|p| p.into_inner());
        commands.keys().cloned().collect()
    }

    /// Run `request`; failures become error responses
    pub fn dispatch(&self, request: &Request) -> Response {
        let command = {
            let commands = self.commands.lock().unwrap_or_else(|p| p.into_inner());
            commands.get(&request.command).cloned()
        };
        let Some(command) = command else {
            warn!("Rejected unknown command {}", request.command);
            return InterceptError::UnknownCommand(request.command.clone()).into();
        };

        debug!("Executing command {}", request.command);
        match command.execute(request) {
            Ok(response) => response,
            Err(err) => {
                warn!("Command {} failed: {}", request.command, err);
                err.into()
            }
        }
    }

    /// Decode a raw JSON request and dispatch it
    pub fn dispatch_json(&self, raw: serde_json::Value) -> Response {
        match serde_json::from_value::<Request>(raw) {
            Ok(request) => self.dispatch(&request),
            Err(err) => InterceptError::Protocol(format!("malformed request: {}", err)).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CommandRegistry {
        let engine = Engine::builder().build().unwrap();
        CommandRegistry::with_builtins(Arc::new(engine)).unwrap()
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            registry().names(),
            vec![
                "change-state",
                "current-callbacks",
                "hooks-info",
                "unregister-callbacks"
            ]
        );
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let engine = Arc::new(Engine::builder().build().unwrap());
        let registry = CommandRegistry::with_builtins(Arc::clone(&engine)).unwrap();
        assert!(registry.register(HooksInfo::new(engine)).is_err());
    }

    #[test]
    fn test_unknown_command() {
        let resp = registry().dispatch_json(json!({"type": "reboot"}));
        assert!(!resp.is_ok());
        assert_eq!(resp.message, "Unknown command: reboot");
    }

    #[test]
    fn test_malformed_request() {
        let resp = registry().dispatch_json(json!({"payload": 1}));
        assert!(!resp.is_ok());
        assert!(resp.message.contains("malformed request"));
    }
}
