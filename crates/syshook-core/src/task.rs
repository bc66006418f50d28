//! The sandboxed-thread collaborator consumed by hooks and the dispatcher
//!
//! The interception layer never touches kernel internals directly. Everything a
//! hook can observe or change about the triggering thread goes through [`Task`],
//! which the embedding sandbox kernel implements.

use crate::abi::{Sysno, SyscallArguments, SyscallResult, Word};
use nix::errno::Errno;
use serde::Serialize;
use std::sync::Arc;

/// Stable identifier of a sandboxed thread
pub type TaskId = u64;

/// A native syscall implementation as exposed by the sandbox syscall table
pub type NativeSyscall = Arc<dyn Fn(&dyn Task, &SyscallArguments) -> SyscallResult + Send + Sync>;

/// Thread identity and credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PidInfo {
    #[serde(rename = "PID")]
    pub pid: i32,
    #[serde(rename = "GID")]
    pub gid: u32,
    #[serde(rename = "UID")]
    pub uid: u32,
    #[serde(rename = "Session")]
    pub session: Option<SessionInfo>,
}

/// Session and process-group membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionID")]
    pub session_id: i32,
    #[serde(rename = "PGID")]
    pub pgid: i32,
    #[serde(rename = "foregroundID")]
    pub foreground_id: i32,
    #[serde(rename = "otherPGIDs")]
    pub other_pgids: Vec<i32>,
}

/// One installed signal disposition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SigAction {
    #[serde(rename = "Handler")]
    pub handler: u64,
    #[serde(rename = "Flags")]
    pub flags: u64,
    #[serde(rename = "Restorer")]
    pub restorer: u64,
    #[serde(rename = "Mask")]
    pub mask: u64,
}

/// Signal masks and dispositions of a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalState {
    #[serde(rename = "SignalMask")]
    pub mask: u64,
    #[serde(rename = "SignalWaitMask")]
    pub wait_mask: u64,
    #[serde(rename = "SavedSignalMask")]
    pub saved_mask: u64,
    #[serde(rename = "SigActions")]
    pub actions: Vec<SigAction>,
}

/// Description of an open file descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FdInfo {
    pub path: String,
    pub fd: i32,
    /// Permission bits rendered like `rwxr-x---`
    pub mode: String,
    pub nlinks: u32,
    /// Open flags rendered like `O_RDWR|O_CLOEXEC`
    pub flags: String,
    pub readable: bool,
    pub writable: bool,
}

/// Thread-group membership of a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadInfo {
    pub tid: i32,
    pub tgid: i32,
    pub tids: Vec<i32>,
}

/// A sandboxed thread as seen by the interception layer
pub trait Task: Send + Sync {
    /// Stable id used to key per-thread script state
    fn id(&self) -> TaskId;

    /// Copy sandboxed memory at `addr` into `dst`, returning the bytes copied
    fn copy_in_bytes(&self, addr: Word, dst: &mut [u8]) -> Result<usize, Errno>;

    /// Copy `src` into sandboxed memory at `addr`, returning the bytes copied
    fn copy_out_bytes(&self, addr: Word, src: &[u8]) -> Result<usize, Errno>;

    /// Read a NUL-terminated string of at most `max_len` bytes
    fn copy_in_string(&self, addr: Word, max_len: usize) -> Result<String, Errno>;

    /// Native implementation of `sysno`, if the syscall table has one
    fn lookup_syscall(&self, sysno: Sysno) -> Option<NativeSyscall>;

    fn pid_info(&self) -> PidInfo;

    fn signal_state(&self) -> SignalState;

    fn fds(&self) -> Vec<FdInfo>;

    fn fd(&self, fd: i32) -> Result<FdInfo, Errno> {
        self.fds()
            .into_iter()
            .find(|info| info.fd == fd)
            .ok_or(Errno::EBADF)
    }

    /// Raw argv region, NUL separated
    fn argv(&self) -> Result<Vec<u8>, Errno>;

    /// Raw environment region, NUL separated
    fn envv(&self) -> Result<Vec<u8>, Errno>;

    /// Memory mappings rendered like `/proc/<pid>/maps`
    fn mappings(&self) -> String;

    /// Thread-group info of this thread or of `tid` in the same pid namespace
    fn thread_info(&self, tid: Option<i32>) -> Result<ThreadInfo, Errno>;

    fn send_signal(&self, tid: i32, signo: i32) -> Result<(), Errno>;

    /// Stop every other thread of the thread group
    fn stop_siblings(&self);

    /// Resume threads stopped by [`Task::stop_siblings`]
    fn resume_siblings(&self);
}

/// Render the low nine permission bits like `ls -l` does
pub fn permission_string(mode: u32) -> String {
    const SYMBOLS: [char; 3] = ['r', 'w', 'x'];
    (0..9)
        .map(|i| {
            let bit = 1 << (8 - i);
            if mode & bit != 0 {
                SYMBOLS[i % 3]
            } else {
                '-'
            }
        })
        .collect()
}

/// Split a NUL separated memory region into strings, dropping empty entries
pub fn split_nul_strings(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o755), "rwxr-xr-x");
        assert_eq!(permission_string(0o640), "rw-r-----");
        assert_eq!(permission_string(0), "---------");
    }

    #[test]
    fn test_split_nul_strings() {
        let raw = b"HOME=/root\0PATH=/bin\0\0";
        assert_eq!(split_nul_strings(raw), vec!["HOME=/root", "PATH=/bin"]);
    }

    #[test]
    fn test_dto_field_names() {
        let pid = PidInfo {
            pid: 10,
            gid: 0,
            uid: 1000,
            session: None,
        };
        let json = serde_json::to_value(&pid).unwrap();
        assert_eq!(json["PID"], 10);
        assert_eq!(json["UID"], 1000);
    }
}
