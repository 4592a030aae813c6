use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Kind of resource a lock is keyed on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceType {
    /// A node record.
    Node,
    /// A relationship record.
    Relationship,
    /// A schema object such as an index.
    Schema,
}

/// Mode in which a lock is held.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Reader-shared.
    Shared,
    /// Writer-exclusive.
    Exclusive,
}

/// Key identifying a single lockable resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LockKey {
    /// Resource family.
    pub resource: ResourceType,
    /// Identifier inside the family.
    pub id: u64,
}

impl LockKey {
    /// Creates a new lock key.
    pub const fn new(resource: ResourceType, id: u64) -> Self {
        Self { resource, id }
    }
}

/// Short-held entity lock service consumed by scans and writers.
///
/// Implementations must allow a thread to re-acquire a lock it already holds.
pub trait LockService: Send + Sync {
    /// Blocks until the lock is granted.
    fn lock(&self, key: LockKey, mode: LockMode);

    /// Releases one hold previously granted by [`LockService::lock`].
    fn unlock(&self, key: LockKey, mode: LockMode);

    /// Returns counters for observability.
    fn snapshot(&self) -> LockSnapshot {
        LockSnapshot::default()
    }
}

impl dyn LockService {
    /// Acquires a shared lock, released when the guard drops.
    pub fn acquire_shared(&self, resource: ResourceType, id: u64) -> EntityLock<'_> {
        self.acquire(LockKey::new(resource, id), LockMode::Shared)
    }

    /// Acquires an exclusive lock, released when the guard drops.
    pub fn acquire_exclusive(&self, resource: ResourceType, id: u64) -> EntityLock<'_> {
        self.acquire(LockKey::new(resource, id), LockMode::Exclusive)
    }

    fn acquire(&self, key: LockKey, mode: LockMode) -> EntityLock<'_> {
        self.lock(key, mode);
        EntityLock {
            service: self,
            key,
            mode,
        }
    }
}

/// Guard representing a held entity lock.
pub struct EntityLock<'a> {
    service: &'a dyn LockService,
    key: LockKey,
    mode: LockMode,
}

impl EntityLock<'_> {
    /// Key this guard holds.
    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Mode this guard holds.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for EntityLock<'_> {
    fn drop(&mut self) {
        self.service.unlock(self.key, self.mode);
    }
}

/// Snapshot of lock activity.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct LockSnapshot {
    /// Shared acquisitions granted.
    pub shared_acquired: u64,
    /// Exclusive acquisitions granted.
    pub exclusive_acquired: u64,
    /// Acquisitions that had to wait for another holder.
    pub contended: u64,
    /// Keys currently held by at least one thread.
    pub held_keys: usize,
}

#[derive(Default)]
struct Holders {
    shared: SmallVec<[(ThreadId, u32); 4]>,
    exclusive: Option<(ThreadId, u32)>,
}

impl Holders {
    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    fn blocks_shared(&self, me: ThreadId) -> bool {
        matches!(self.exclusive, Some((owner, _)) if owner != me)
    }

    fn blocks_exclusive(&self, me: ThreadId) -> bool {
        self.blocks_shared(me) || self.shared.iter().any(|(owner, _)| *owner != me)
    }
}

/// Re-entrant lock table keyed by `(resource, id)`.
///
/// Shared holders never block each other; an exclusive holder blocks every
/// other thread. A thread may take a shared lock on a key it holds
/// exclusively, and may upgrade when it is the only shared holder.
#[derive(Default)]
pub struct ReentrantLockService {
    table: Mutex<FxHashMap<LockKey, Holders>>,
    released: Condvar,
    shared_acquired: AtomicU64,
    exclusive_acquired: AtomicU64,
    contended: AtomicU64,
}

impl ReentrantLockService {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockService for ReentrantLockService {
    fn lock(&self, key: LockKey, mode: LockMode) {
        let me = thread::current().id();
        let mut table = self.table.lock();
        let mut waited = false;
        loop {
            let holders = table.entry(key).or_default();
            let blocked = match mode {
                LockMode::Shared => holders.blocks_shared(me),
                LockMode::Exclusive => holders.blocks_exclusive(me),
            };
            if !blocked {
                match mode {
                    LockMode::Shared => {
                        match holders.shared.iter_mut().find(|(owner, _)| *owner == me) {
                            Some((_, depth)) => *depth += 1,
                            None => holders.shared.push((me, 1)),
                        }
                        self.shared_acquired.fetch_add(1, Ordering::Relaxed);
                    }
                    LockMode::Exclusive => {
                        match holders.exclusive.as_mut() {
                            Some((_, depth)) => *depth += 1,
                            None => holders.exclusive = Some((me, 1)),
                        }
                        self.exclusive_acquired.fetch_add(1, Ordering::Relaxed);
                    }
                }
                break;
            }
            if !waited {
                waited = true;
                self.contended.fetch_add(1, Ordering::Relaxed);
            }
            self.released.wait(&mut table);
        }
    }

    fn unlock(&self, key: LockKey, mode: LockMode) {
        let me = thread::current().id();
        let mut table = self.table.lock();
        let Some(holders) = table.get_mut(&key) else {
            debug_assert!(false, "unlock of a key that is not held: {key:?}");
            return;
        };
        match mode {
            LockMode::Shared => {
                if let Some(pos) = holders.shared.iter().position(|(owner, _)| *owner == me) {
                    holders.shared[pos].1 -= 1;
                    if holders.shared[pos].1 == 0 {
                        holders.shared.swap_remove(pos);
                    }
                }
            }
            LockMode::Exclusive => {
                if let Some((owner, depth)) = holders.exclusive.as_mut() {
                    debug_assert_eq!(*owner, me, "exclusive lock released by non-owner");
                    *depth -= 1;
                    if *depth == 0 {
                        holders.exclusive = None;
                    }
                }
            }
        }
        if holders.is_empty() {
            table.remove(&key);
        }
        drop(table);
        self.released.notify_all();
    }

    fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            shared_acquired: self.shared_acquired.load(Ordering::Relaxed),
            exclusive_acquired: self.exclusive_acquired.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            held_keys: self.table.lock().len(),
        }
    }
}

/// Lock service that grants everything immediately.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoopLockService;

impl LockService for NoopLockService {
    fn lock(&self, _key: LockKey, _mode: LockMode) {}
    fn unlock(&self, _key: LockKey, _mode: LockMode) {}
}

/// One-shot completion signal owned by a scan.
///
/// The scan completes it exactly once; any number of waiters block on it.
#[derive(Default)]
pub struct ScanCompletion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl ScanCompletion {
    /// Creates a signal in the pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal complete and wakes every waiter.
    pub fn complete(&self) {
        let mut done = self.done.lock();
        if !*done {
            *done = true;
            self.signal.notify_all();
        }
    }

    /// Returns whether the signal has been completed.
    pub fn is_complete(&self) -> bool {
        *self.done.lock()
    }

    /// Blocks until the signal is completed.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }

    /// Blocks until completion or timeout; returns whether the signal completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            let _ = self.signal.wait_for(&mut done, timeout);
        }
        *done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn service() -> Arc<dyn LockService> {
        Arc::new(ReentrantLockService::new())
    }

    #[test]
    fn shared_locks_stack_and_reenter() {
        let locks = service();
        let a = locks.acquire_shared(ResourceType::Node, 1);
        let b = locks.acquire_shared(ResourceType::Node, 1);
        assert_eq!(a.mode(), LockMode::Shared);
        assert_eq!(locks.snapshot().held_keys, 1);
        drop(a);
        drop(b);
        assert_eq!(locks.snapshot().held_keys, 0);
        assert_eq!(locks.snapshot().shared_acquired, 2);
    }

    #[test]
    fn exclusive_owner_may_read_its_own_key() {
        let locks = service();
        let _w = locks.acquire_exclusive(ResourceType::Node, 3);
        let _r = locks.acquire_shared(ResourceType::Node, 3);
        let _w2 = locks.acquire_exclusive(ResourceType::Node, 3);
        assert_eq!(locks.snapshot().exclusive_acquired, 2);
    }

    #[test]
    fn different_resources_do_not_conflict() {
        let locks = service();
        let _node = locks.acquire_exclusive(ResourceType::Node, 9);
        let other = Arc::clone(&locks);
        thread::spawn(move || {
            let _rel = other.acquire_exclusive(ResourceType::Relationship, 9);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn writer_blocks_reader_until_release() {
        let locks = service();
        let guard = locks.acquire_exclusive(ResourceType::Node, 5);
        let flag = Arc::new(AtomicBool::new(false));
        let reader_flag = Arc::clone(&flag);
        let reader_locks = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let _r = reader_locks.acquire_shared(ResourceType::Node, 5);
            reader_flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(
            !flag.load(Ordering::SeqCst),
            "reader should block while the writer holds the key"
        );
        drop(guard);
        handle.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
        assert!(locks.snapshot().contended >= 1);
    }

    #[test]
    fn completion_wakes_all_waiters() {
        let completion = Arc::new(ScanCompletion::new());
        assert!(!completion.wait_timeout(Duration::from_millis(5)));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let c = Arc::clone(&completion);
                thread::spawn(move || c.wait())
            })
            .collect();
        completion.complete();
        completion.complete();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert!(completion.is_complete());
    }
}
