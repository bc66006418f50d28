//! Startup configuration
//!
//! ```json
//! {
//!   "runtime-socket": "unix:/run/syshook.sock",
//!   "single-use-hooks": false,
//!   "callbacks": [
//!     {"sysno": 49, "type": "before", "source": "function sys_before_49() return {ret = -1, errno = 98} end"}
//!   ]
//! }
//! ```

use crate::command::Endpoint;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use syshook_callbacks::CallbackInfo;
use syshook_core::{InterceptError, Result};
use syshook_engine::Engine;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StartupConfig {
    #[serde(default)]
    pub runtime_socket: Option<String>,
    #[serde(default)]
    pub single_use_hooks: bool,
    #[serde(default)]
    pub callbacks: Vec<CallbackInfo>,
}

impl StartupConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| InterceptError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| InterceptError::InvalidConfig(e.to_string()))
    }

    pub fn endpoint(&self) -> Result<Option<Endpoint>> {
        self.runtime_socket
            .as_deref()
            .map(str::parse::<Endpoint>)
            .transpose()
    }

    /// An engine with every configured callback installed
    ///
    /// Entries without an entry point use the conventional `sys_<phase>_<sysno>`.
    pub fn build_engine(&self) -> Result<Engine> {
        let engine = Engine::builder()
            .single_use_hooks(self.single_use_hooks)
            .build()?;
        for callback in &self.callbacks {
            let mut info = callback.clone();
            info.fill_from_declaration();
            engine.register_scripted(info)?;
        }
        info!("Installed {} configured callbacks", self.callbacks.len());
        Ok(engine)
    }
}
