//! syshook-core: shared types, errors and the task contract for syshook
//!
//! This crate provides the foundational types used by all syshook crates:
//! - Error types and Result alias
//! - Syscall ABI values (arguments, phases, return overrides)
//! - The [`Task`] collaborator implemented by the sandbox kernel
//! - Signal name and mask helpers
//! - An in-memory task for tests (feature `mock`)

pub mod abi;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod signal;
pub mod task;

pub use abi::{
    CallbackPhase, InvocationOutcome, ReturnOverride, Sysno, SyscallArguments, SyscallResult,
    Word, SYSCALL_ARG_COUNT,
};
pub use error::{InterceptError, Result};
pub use nix::errno::Errno;
pub use task::{FdInfo, NativeSyscall, PidInfo, SessionInfo, SigAction, SignalState, Task, TaskId, ThreadInfo};
