//! syshook: live, scriptable syscall interception for a userspace sandbox kernel
//!
//! Lua callbacks run before and after selected syscalls of sandboxed threads,
//! with native hooks for memory, fds, signals and threads. A socket command
//! service lets a controller add, list and remove callbacks while the sandbox
//! runs.
//!
//! # Crates
//!
//! - **syshook-core**: errors, syscall ABI types and the `Task` contract
//! - **syshook-callbacks**: the (syscall, phase) callback table
//! - **syshook-engine**: the Lua engine and built-in hooks
//! - **syshook** (this crate): command service, client and startup config
//!
//! # Example
//!
//! ```ignore
//! use syshook::{CommandRegistry, Endpoint, Listener, StartupConfig};
//! use std::sync::Arc;
//!
//! let config = StartupConfig::load("syshook.json".as_ref())?;
//! let engine = Arc::new(config.build_engine()?);
//! let commands = Arc::new(CommandRegistry::with_builtins(Arc::clone(&engine))?);
//! Listener::bind(&"unix:/run/syshook.sock".parse::<Endpoint>()?)?.spawn(commands);
//!
//! // on the sandbox syscall path
//! let result = engine.dispatch(&task, sysno, args);
//! ```

pub mod client;
pub mod command;
pub mod config;

pub use command::{Command, CommandRegistry, Endpoint, Listener, Request, Response};
pub use config::StartupConfig;
pub use syshook_core::{InterceptError, Result};
pub use syshook_engine::Engine;
