//! Wire format of the runtime command service
//!
//! One JSON request and one JSON response per connection:
//!
//! ```text
//! -> {"type": "change-state", "payload": {"source": "..."}}
//! <- {"type": "ok", "message": "...", "payload": ...}
//! <- {"type": "error", "message": "..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use syshook_callbacks::CallbackInfo;
use syshook_core::{CallbackPhase, InterceptError, Result, Sysno};
use syshook_engine::HookInfo;

pub const HOOKS_INFO: &str = "hooks-info";
pub const CHANGE_STATE: &str = "change-state";
pub const CURRENT_CALLBACKS: &str = "current-callbacks";
pub const UNREGISTER_CALLBACKS: &str = "unregister-callbacks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Request {
    pub fn new(command: &str) -> Self {
        Request {
            command: command.to_string(),
            payload: Value::Null,
        }
    }

    pub fn with_payload<T: Serialize>(command: &str, payload: &T) -> Result<Self> {
        Ok(Request {
            command: command.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn hooks_info() -> Self {
        Request::new(HOOKS_INFO)
    }

    pub fn current_callbacks() -> Self {
        Request::new(CURRENT_CALLBACKS)
    }

    pub fn change_state(source: &str) -> Result<Self> {
        Request::with_payload(
            CHANGE_STATE,
            &ChangeStatePayload {
                source: source.to_string(),
            },
        )
    }

    pub fn unregister(payload: &UnregisterPayload) -> Result<Self> {
        Request::with_payload(UNREGISTER_CALLBACKS, payload)
    }

    /// Decode the payload into the shape a command expects
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            InterceptError::Protocol(format!("invalid {} payload: {}", self.command, e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Response {
    pub fn ok(message: impl Into<String>, payload: Option<Value>) -> Self {
        Response {
            status: Status::Ok,
            message: message.into(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response {
            status: Status::Error,
            message: message.into(),
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode the payload of a successful response
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if !self.is_ok() {
            return Err(InterceptError::Protocol(self.message.clone()));
        }
        let payload = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(payload)
            .map_err(|e| InterceptError::Protocol(format!("unexpected payload: {}", e)))
    }
}

impl From<InterceptError> for Response {
    fn from(err: InterceptError) -> Self {
        Response::error(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatePayload {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HooksPayload {
    pub hooks: Vec<HookInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbacksPayload {
    pub callbacks: Vec<CallbackInfo>,
}

/// A (syscall number, phase) pair naming one callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackKey {
    pub sysno: Sysno,
    #[serde(rename = "type")]
    pub phase: CallbackPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnregisterOptions {
    All,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterPayload {
    pub options: UnregisterOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<CallbackKey>,
}

impl UnregisterPayload {
    pub fn all() -> Self {
        UnregisterPayload {
            options: UnregisterOptions::All,
            list: Vec::new(),
        }
    }

    pub fn list(keys: Vec<CallbackKey>) -> Self {
        UnregisterPayload {
            options: UnregisterOptions::List,
            list: keys,
        }
    }
}
