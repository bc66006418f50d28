//! Syscall ABI values exchanged between the dispatcher and callbacks

use crate::error::InterceptError;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Machine word as seen by the sandboxed application
pub type Word = u64;

/// Syscall number
pub type Sysno = u64;

/// Number of argument registers of a syscall
pub const SYSCALL_ARG_COUNT: usize = 6;

/// x86_64 syscall numbers used by hooks
pub const SYS_MMAP: Sysno = 9;
pub const SYS_MUNMAP: Sysno = 11;

/// Outcome of a native syscall: the return word or the errno it failed with
pub type SyscallResult = std::result::Result<Word, Errno>;

/// The six positional syscall arguments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArguments(pub [Word; SYSCALL_ARG_COUNT]);

impl SyscallArguments {
    pub fn new(words: [Word; SYSCALL_ARG_COUNT]) -> Self {
        SyscallArguments(words)
    }

    /// Build from a shorter list, zero filling the remaining slots
    pub fn from_slice(words: &[Word]) -> Self {
        let mut args = SyscallArguments::default();
        for (slot, word) in args.0.iter_mut().zip(words) {
            *slot = *word;
        }
        args
    }

    pub fn iter(&self) -> impl Iterator<Item = Word> + '_ {
        self.0.iter().copied()
    }

    /// Slot at `index` or `None` when out of range
    pub fn get(&self, index: usize) -> Option<Word> {
        self.0.get(index).copied()
    }
}

impl Index<usize> for SyscallArguments {
    type Output = Word;

    fn index(&self, index: usize) -> &Word {
        &self.0[index]
    }
}

impl IndexMut<usize> for SyscallArguments {
    fn index_mut(&mut self, index: usize) -> &mut Word {
        &mut self.0[index]
    }
}

impl From<[Word; SYSCALL_ARG_COUNT]> for SyscallArguments {
    fn from(words: [Word; SYSCALL_ARG_COUNT]) -> Self {
        SyscallArguments(words)
    }
}

/// When a callback runs relative to the native syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackPhase {
    Before,
    After,
}

impl CallbackPhase {
    pub fn all() -> [CallbackPhase; 2] {
        [CallbackPhase::Before, CallbackPhase::After]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackPhase::Before => "before",
            CallbackPhase::After => "after",
        }
    }
}

impl fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CallbackPhase {
    type Err = InterceptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(CallbackPhase::Before),
            "after" => Ok(CallbackPhase::After),
            other => Err(InterceptError::InvalidPhase(other.to_string())),
        }
    }
}

/// Script-supplied replacement for a syscall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnOverride {
    pub ret: Word,
    pub errno: Word,
}

impl ReturnOverride {
    pub fn new(ret: Word, errno: Word) -> Self {
        ReturnOverride { ret, errno }
    }

    /// A non-zero errno fails the syscall, zero makes it return `ret`
    ///
    /// An errno outside the `i32` range fails with `EINVAL`.
    pub fn into_result(self) -> SyscallResult {
        if self.errno != 0 {
            Err(i32::try_from(self.errno).map_or(Errno::EINVAL, Errno::from_raw))
        } else {
            Ok(self.ret)
        }
    }
}

/// What a callback invocation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationOutcome {
    pub args: SyscallArguments,
    pub ret: Option<ReturnOverride>,
}

impl InvocationOutcome {
    pub fn unchanged(args: SyscallArguments) -> Self {
        InvocationOutcome { args, ret: None }
    }
}
