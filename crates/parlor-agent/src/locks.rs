//! Per-thread critical sections.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type ThreadLock = tokio::sync::Mutex<()>;

/// Exclusive access to one thread. Released on drop.
pub struct ThreadGuard {
    // Field order matters: the thread lock is released before the barrier
    _lock: OwnedMutexGuard<()>,
    _barrier: OwnedRwLockReadGuard<()>,
}

/// Exclusive access to every thread. Released on drop.
pub struct AllThreadsGuard {
    _barrier: OwnedRwLockWriteGuard<()>,
}

/// In-process registry of per-thread locks.
///
/// Entries are weak so a thread nobody is using holds no memory; the map is
/// swept on each acquisition. Every thread guard also holds a shared barrier,
/// which [`ThreadLocks::acquire_all`] takes exclusively. Cloning is cheap.
#[derive(Clone, Default)]
pub struct ThreadLocks {
    locks: Arc<Mutex<HashMap<String, Weak<ThreadLock>>>>,
    barrier: Arc<RwLock<()>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread_id`
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let barrier = Arc::clone(&self.barrier).read_owned().await;
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(thread_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(ThreadLock::new(()));
                    locks.insert(thread_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        ThreadGuard {
            _lock: lock.lock_owned().await,
            _barrier: barrier,
        }
    }

    /// Wait until no thread is held, then block new acquisitions until the
    /// guard drops.
    pub async fn acquire_all(&self) -> AllThreadsGuard {
        AllThreadsGuard {
            _barrier: Arc::clone(&self.barrier).write_owned().await,
        }
    }
}
