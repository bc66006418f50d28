//! syshook-engine: Lua callbacks around sandboxed syscalls
//!
//! This crate provides:
//! - The [`Engine`], one Lua VM serialized behind a lock
//! - Scripted and dynamic callback kinds
//! - The hook registry and every built-in hook
//! - Marshaling between syscall words and Lua values
//! - Dispatcher glue ([`Engine::intercept`]) for the sandbox syscall path

pub mod callback;
pub mod context;
pub mod engine;
pub mod hooks;
pub mod marshal;

pub use callback::{Callback, DynamicCallback, ScriptedCallback};
pub use context::{ContextValue, ScriptContexts};
pub use engine::{Engine, EngineBuilder};
pub use hooks::{
    HookBinding, HookInfo, HookLease, HookPolicy, HookRegistry, ScriptOutput, ScriptScope,
};
