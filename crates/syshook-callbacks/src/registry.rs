//! Phase-split callback table keyed by syscall number

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use syshook_core::{CallbackPhase, InterceptError, Result, Sysno};

type PhaseTable<C> = Mutex<BTreeMap<Sysno, Arc<C>>>;

/// Live callbacks, at most one per (syscall number, phase)
///
/// Before and After entries sit behind independent locks so traffic on one
/// phase never waits on the other. Operations touching both phases always lock
/// Before first.
pub struct CallbackRegistry<C> {
    before: PhaseTable<C>,
    after: PhaseTable<C>,
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        CallbackRegistry {
            before: Mutex::new(BTreeMap::new()),
            after: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<C> CallbackRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, phase: CallbackPhase) -> MutexGuard<'_, BTreeMap<Sysno, Arc<C>>> {
        let table = match phase {
            CallbackPhase::Before => &self.before,
            CallbackPhase::After => &self.after,
        };
        table.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Install `callback`, replacing and returning any previous one for the key
    pub fn register(
        &self,
        sysno: Sysno,
        phase: CallbackPhase,
        callback: impl Into<Arc<C>>,
    ) -> Option<Arc<C>> {
        let previous = self.table(phase).insert(sysno, callback.into());
        if previous.is_some() {
            warn!("Replaced {} callback for syscall {}", phase, sysno);
        } else {
            info!("Registered {} callback for syscall {}", phase, sysno);
        }
        previous
    }

    pub fn unregister(&self, sysno: Sysno, phase: CallbackPhase) -> Result<Arc<C>> {
        let removed = self
            .table(phase)
            .remove(&sysno)
            .ok_or(InterceptError::CallbackNotFound { sysno, phase })?;
        info!("Unregistered {} callback for syscall {}", phase, sysno);
        Ok(removed)
    }

    /// Clear both phases atomically, returning how many callbacks were removed
    pub fn unregister_all(&self) -> usize {
        let mut before = self.table(CallbackPhase::Before);
        let mut after = self.table(CallbackPhase::After);
        let removed = before.len() + after.len();
        before.clear();
        after.clear();
        info!("Unregistered all {} callbacks", removed);
        removed
    }

    pub fn lookup(&self, sysno: Sysno, phase: CallbackPhase) -> Option<Arc<C>> {
        let found = self.table(phase).get(&sysno).cloned();
        if found.is_some() {
            debug!("Found {} callback for syscall {}", phase, sysno);
        }
        found
    }

    /// Consistent snapshot of every entry, Before entries first, by syscall number
    pub fn list_all(&self) -> Vec<(Sysno, CallbackPhase, Arc<C>)> {
        let before = self.table(CallbackPhase::Before);
        let after = self.table(CallbackPhase::After);
        before
            .iter()
            .map(|(sysno, cb)| (*sysno, CallbackPhase::Before, Arc::clone(cb)))
            .chain(
                after
                    .iter()
                    .map(|(sysno, cb)| (*sysno, CallbackPhase::After, Arc::clone(cb))),
            )
            .collect()
    }

    pub fn len(&self, phase: CallbackPhase) -> usize {
        self.table(phase).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(CallbackPhase::Before) == 0 && self.len(CallbackPhase::After) == 0
    }
}
