//! In-memory [`Task`] used by tests across the workspace

use crate::abi::{Sysno, SyscallArguments, SyscallResult, Word, SYS_MMAP, SYS_MUNMAP};
use crate::signal::SIGRTMAX;
use crate::task::{FdInfo, NativeSyscall, PidInfo, SignalState, Task, TaskId, ThreadInfo};
use nix::errno::Errno;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Start of the fake sandboxed address space
pub const MOCK_MEMORY_BASE: Word = 0x1000;
const MOCK_MEMORY_SIZE: usize = 64 * 1024;
const MOCK_MMAP_BASE: Word = 0x7f00_0000_0000;
const PAGE_SIZE: Word = 4096;

#[derive(Debug, Default)]
struct MappingTable {
    next: Word,
    regions: Vec<(Word, Word)>,
}

/// A sandboxed thread backed by plain memory
pub struct MockTask {
    id: TaskId,
    memory: Mutex<Vec<u8>>,
    argv: Vec<String>,
    envv: Vec<String>,
    fds: Vec<FdInfo>,
    pid_info: PidInfo,
    signal_state: SignalState,
    tgid: i32,
    tids: Vec<i32>,
    mappings: Arc<Mutex<MappingTable>>,
    sent_signals: Mutex<Vec<(i32, i32)>>,
    stops: AtomicUsize,
    resumes: AtomicUsize,
}

impl MockTask {
    pub fn new(id: TaskId) -> Self {
        let tid = id as i32;
        MockTask {
            id,
            memory: Mutex::new(vec![0; MOCK_MEMORY_SIZE]),
            argv: Vec::new(),
            envv: Vec::new(),
            fds: Vec::new(),
            pid_info: PidInfo {
                pid: tid,
                ..PidInfo::default()
            },
            signal_state: SignalState::default(),
            tgid: tid,
            tids: vec![tid],
            mappings: Arc::new(Mutex::new(MappingTable {
                next: MOCK_MMAP_BASE,
                regions: Vec::new(),
            })),
            sent_signals: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        }
    }

    pub fn with_argv(mut self, argv: &[&str]) -> Self {
        self.argv = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_envv(mut self, envv: &[&str]) -> Self {
        self.envv = envv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_fd(mut self, fd: FdInfo) -> Self {
        self.fds.push(fd);
        self
    }

    pub fn with_pid_info(mut self, pid_info: PidInfo) -> Self {
        self.pid_info = pid_info;
        self
    }

    pub fn with_signal_state(mut self, state: SignalState) -> Self {
        self.signal_state = state;
        self
    }

    /// Add sibling threads to the thread group
    pub fn with_siblings(mut self, tids: &[i32]) -> Self {
        self.tids.extend_from_slice(tids);
        self
    }

    /// Place `bytes` at `addr` in the fake address space
    pub fn write_memory(&self, addr: Word, bytes: &[u8]) {
        let offset = (addr - MOCK_MEMORY_BASE) as usize;
        let mut memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_memory(&self, addr: Word, len: usize) -> Vec<u8> {
        let offset = (addr - MOCK_MEMORY_BASE) as usize;
        let memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        memory[offset..offset + len].to_vec()
    }

    pub fn sent_signals(&self) -> Vec<(i32, i32)> {
        self.sent_signals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Live anonymous mappings as (address, length)
    pub fn regions(&self) -> Vec<(Word, Word)> {
        self.mappings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .regions
            .clone()
    }

    fn range(&self, addr: Word, len: usize) -> Result<std::ops::Range<usize>, Errno> {
        let end = MOCK_MEMORY_BASE + MOCK_MEMORY_SIZE as Word;
        if addr < MOCK_MEMORY_BASE || addr >= end {
            return Err(Errno::EFAULT);
        }
        let start = (addr - MOCK_MEMORY_BASE) as usize;
        Ok(start..(start + len).min(MOCK_MEMORY_SIZE))
    }

    fn mmap(table: &Mutex<MappingTable>, args: &SyscallArguments) -> SyscallResult {
        let len = args[1];
        if len == 0 {
            return Err(Errno::EINVAL);
        }
        let pages = len.div_ceil(PAGE_SIZE);
        let mut table = table.lock().unwrap_or_else(|p| p.into_inner());
        let addr = table.next;
        table.next += pages * PAGE_SIZE;
        table.regions.push((addr, len));
        Ok(addr)
    }

    fn munmap(table: &Mutex<MappingTable>, args: &SyscallArguments) -> SyscallResult {
        let (addr, len) = (args[0], args[1]);
        if addr % PAGE_SIZE != 0 || len == 0 {
            return Err(Errno::EINVAL);
        }
        let mut table = table.lock().unwrap_or_else(|p| p.into_inner());
        table.regions.retain(|(start, _)| *start != addr);
        Ok(0)
    }
}

impl Task for MockTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn copy_in_bytes(&self, addr: Word, dst: &mut [u8]) -> Result<usize, Errno> {
        let range = self.range(addr, dst.len())?;
        let memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        let n = range.len();
        dst[..n].copy_from_slice(&memory[range]);
        Ok(n)
    }

    fn copy_out_bytes(&self, addr: Word, src: &[u8]) -> Result<usize, Errno> {
        let range = self.range(addr, src.len())?;
        let mut memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        let n = range.len();
        memory[range].copy_from_slice(&src[..n]);
        Ok(n)
    }

    fn copy_in_string(&self, addr: Word, max_len: usize) -> Result<String, Errno> {
        let mut buf = vec![0u8; max_len];
        let n = self.copy_in_bytes(addr, &mut buf)?;
        match buf[..n].iter().position(|b| *b == 0) {
            Some(end) => Ok(String::from_utf8_lossy(&buf[..end]).into_owned()),
            None => Err(Errno::ENAMETOOLONG),
        }
    }

    fn lookup_syscall(&self, sysno: Sysno) -> Option<NativeSyscall> {
        let table = Arc::clone(&self.mappings);
        match sysno {
            SYS_MMAP => Some(Arc::new(move |_: &dyn Task, args: &SyscallArguments| {
                MockTask::mmap(&table, args)
            })),
            SYS_MUNMAP => Some(Arc::new(move |_: &dyn Task, args: &SyscallArguments| {
                MockTask::munmap(&table, args)
            })),
            _ => None,
        }
    }

    fn pid_info(&self) -> PidInfo {
        self.pid_info.clone()
    }

    fn signal_state(&self) -> SignalState {
        self.signal_state.clone()
    }

    fn fds(&self) -> Vec<FdInfo> {
        self.fds.clone()
    }

    fn argv(&self) -> Result<Vec<u8>, Errno> {
        Ok(join_nul(&self.argv))
    }

    fn envv(&self) -> Result<Vec<u8>, Errno> {
        Ok(join_nul(&self.envv))
    }

    fn mappings(&self) -> String {
        self.regions()
            .iter()
            .map(|(addr, len)| format!("{:012x}-{:012x} rw-p 00000000 00:00 0\n", addr, addr + len))
            .collect()
    }

    fn thread_info(&self, tid: Option<i32>) -> Result<ThreadInfo, Errno> {
        let tid = tid.unwrap_or(self.id as i32);
        if !self.tids.contains(&tid) {
            return Err(Errno::ESRCH);
        }
        Ok(ThreadInfo {
            tid,
            tgid: self.tgid,
            tids: self.tids.clone(),
        })
    }

    fn send_signal(&self, tid: i32, signo: i32) -> Result<(), Errno> {
        if !(1..=SIGRTMAX).contains(&signo) {
            return Err(Errno::EINVAL);
        }
        if !self.tids.contains(&tid) {
            return Err(Errno::ESRCH);
        }
        self.sent_signals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((tid, signo));
        Ok(())
    }

    fn stop_siblings(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_siblings(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

fn join_nul(items: &[String]) -> Vec<u8> {
    let mut raw = Vec::new();
    for item in items {
        raw.extend_from_slice(item.as_bytes());
        raw.push(0);
    }
    raw
}
