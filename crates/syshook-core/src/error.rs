//! Error types for interception operations

use crate::abi::{CallbackPhase, Sysno};
use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for interception operations
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Errors that can occur while registering, running or controlling callbacks
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Unknown callback type [{0}]")]
    InvalidPhase(String),

    #[error("Hook {name} is already registered as {kind}")]
    DuplicateHook { name: String, kind: &'static str },

    #[error("No {phase} callback registered for syscall {sysno}")]
    CallbackNotFound { sysno: Sysno, phase: CallbackPhase },

    #[error("{hook}: expected {expected} arguments, got {got}")]
    ArgsCountMismatch {
        hook: String,
        expected: String,
        got: usize,
    },

    #[error("{hook}: argument {index} must be {expected}, got {got}")]
    ArgType {
        hook: String,
        index: usize,
        expected: &'static str,
        got: String,
    },

    #[error("Argument index {0} is out of range")]
    ArgIndexOutOfRange(i64),

    #[error("Hook {0} can be used only once per invocation")]
    HookAlreadyUsed(String),

    #[error("Hook {0} belongs to a finished invocation")]
    HookExpired(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Syscall error: {0}")]
    Syscall(#[from] Errno),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl InterceptError {
    pub fn args_count(hook: &str, expected: impl ToString, got: usize) -> Self {
        InterceptError::ArgsCountMismatch {
            hook: hook.to_string(),
            expected: expected.to_string(),
            got,
        }
    }

    pub fn arg_type(hook: &str, index: usize, expected: &'static str, got: impl Into<String>) -> Self {
        InterceptError::ArgType {
            hook: hook.to_string(),
            index,
            expected,
            got: got.into(),
        }
    }
}
