//! The hierarchical lock manager (spec.md §4.3, component C3): grants,
//! queues, converts and releases multi-mode locks on named objects, and is
//! the concurrency primitive transaction isolation rests on (spec.md §5).
//!
//! Has no direct teacher counterpart -- the teacher's own concurrency
//! control is row/key-level serialisation inside `mvcc` -- so this is
//! grounded in the teacher's existing idiom for shared mutable state
//! (`Arc<Mutex<_>>`, as in `mvcc::MVCC`'s `Arc<Mutex<E>>`) generalized to a
//! per-object queue woken by a `Condvar`, rather than reaching for an async
//! runtime or a third-party lock crate the teacher doesn't otherwise use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CResult, Error};

/// Identifies a transaction to the lock manager. The transaction
/// coordinator (`txn`) allocates one of these per transaction handle --
/// distinct from the mvcc version, since several read-only transactions
/// can share an mvcc snapshot version but each needs its own lock identity.
pub type LockHolder = u64;

/// The five standard hierarchical lock modes (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    IS,
    IX,
    S,
    SIX,
    X,
}

fn idx(mode: Mode) -> usize {
    match mode {
        Mode::IS => 0,
        Mode::IX => 1,
        Mode::S => 2,
        Mode::SIX => 3,
        Mode::X => 4,
    }
}

/// Pairwise compatibility matrix from spec.md §4.3: "`S` conflicts with
/// `IX, X, SIX`; `X` conflicts with everything; `IS` is compatible with
/// `S, IS, IX, SIX`; `IX` is compatible with `IS, IX`; `SIX` is compatible
/// with `IS` only".
#[rustfmt::skip]
const COMPATIBLE: [[bool; 5]; 5] = [
    //  IS     IX     S      SIX    X
    [  true,  true,  true,  true, false ], // IS
    [  true,  true, false, false, false ], // IX
    [  true, false,  true, false, false ], // S
    [  true, false, false, false, false ], // SIX
    [ false, false, false, false, false ], // X
];

fn compatible(a: Mode, b: Mode) -> bool {
    COMPATIBLE[idx(a)][idx(b)]
}

/// The strongest mode that subsumes both `a` and `b` -- used to maintain a
/// queue's group mode as holders are added (spec.md glossary: "Group
/// mode"). Two simultaneous `IS`+`IX` holders widen the group to `IX`; an
/// `IX`+`S` combination (an intent writer alongside a shared reader)
/// widens all the way to `SIX`, the standard multi-granularity lattice.
#[rustfmt::skip]
const COMBINE: [[Mode; 5]; 5] = [
    //      IS          IX          S          SIX         X
    [ Mode::IS,  Mode::IX,  Mode::S,   Mode::SIX, Mode::X ], // IS
    [ Mode::IX,  Mode::IX,  Mode::SIX, Mode::SIX, Mode::X ], // IX
    [ Mode::S,   Mode::SIX, Mode::S,   Mode::SIX, Mode::X ], // S
    [ Mode::SIX, Mode::SIX, Mode::SIX, Mode::SIX, Mode::X ], // SIX
    [ Mode::X,   Mode::X,   Mode::X,   Mode::X,   Mode::X ], // X
];

fn combine(a: Mode, b: Mode) -> Mode {
    COMBINE[idx(a)][idx(b)]
}

fn widen(group: Option<Mode>, mode: Mode) -> Mode {
    match group {
        Some(g) => combine(g, mode),
        None => mode,
    }
}

fn group_compatible(group: Option<Mode>, mode: Mode) -> bool {
    match group {
        Some(g) => compatible(g, mode),
        None => true,
    }
}

/// A lockable object (spec.md §3 "Lock object"). `Document` keys a single
/// row within a table by its already-encoded row key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LockId {
    Database,
    Table(String),
    Document(String, Vec<u8>),
}

/// A cancellation signal a caller can use to abandon a blocked acquire
/// (spec.md §4.3 "the caller may signal cancellation", §5 "Cancellation
/// and timeouts"). Cheap to clone; every clone shares the same flag.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReqStatus {
    Granted,
    Waiting,
    Converting,
}

struct LockRequest {
    holder: LockHolder,
    mode: Mode,
    convert_mode: Option<Mode>,
    status: ReqStatus,
    hold_count: u32,
}

struct Inner {
    group_mode: Option<Mode>,
    waiting: bool,
    queue: Vec<LockRequest>,
}

/// The queue header for a single lockable object (spec.md §4.3 "Each
/// lockable object has a queue header..."). Held behind an `Arc` so the
/// coarse map lock can be dropped while a thread blocks on `cvar`.
struct QueueHeader {
    inner: Mutex<Inner>,
    cvar: Condvar,
}

/// Polling granularity for cancellable waits. The manager has no separate
/// per-request wake channel, so a cancellable wait periodically re-checks
/// the token between `Condvar` notifications; an uncancellable wait just
/// blocks on the `Condvar` with no timeout.
const CANCEL_POLL: Duration = Duration::from_millis(10);

pub struct LockManager {
    objects: Mutex<HashMap<LockId, Arc<QueueHeader>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self { objects: Mutex::new(HashMap::new()) }
    }

    fn header_for(&self, obj: &LockId) -> Arc<QueueHeader> {
        let mut map = self.objects.lock().expect("lock map poisoned");
        map.entry(obj.clone())
            .or_insert_with(|| {
                Arc::new(QueueHeader {
                    inner: Mutex::new(Inner { group_mode: None, waiting: false, queue: Vec::new() }),
                    cvar: Condvar::new(),
                })
            })
            .clone()
    }

    /// Best-effort garbage collection of an empty queue header (spec.md §3
    /// "the object node is garbage-collected when no holder remains").
    /// Uses `try_lock` rather than re-acquiring the per-object lock after
    /// releasing it, so this can never deadlock against a concurrent
    /// `header_for` (which acquires the map lock, then the header lock, in
    /// that order): if the header is momentarily busy we simply skip
    /// cleanup and let a later release retry it.
    fn try_gc(&self, obj: &LockId) {
        let mut map = self.objects.lock().expect("lock map poisoned");
        if let Some(header) = map.get(obj) {
            if let Ok(inner) = header.inner.try_lock() {
                if inner.queue.is_empty() {
                    map.remove(obj);
                }
            }
        }
    }

    /// Acquires `mode` on `obj` for `holder`, implementing the algorithm of
    /// spec.md §4.3 "Acquire" verbatim. Blocks if the request can't be
    /// granted immediately; `cancel`, if given, lets the caller abandon the
    /// wait, returning `Error::LockTimeout`.
    pub fn acquire(
        &self,
        holder: LockHolder,
        obj: LockId,
        mode: Mode,
        cancel: Option<&CancelToken>,
    ) -> CResult<()> {
        let header = self.header_for(&obj);
        let mut guard = header.inner.lock().expect("lock header poisoned");

        if let Some(pos) = guard.queue.iter().position(|r| r.holder == holder) {
            // Existing request (spec.md §4.3 point 3, re-entrant cases).
            let compatible_with_others = guard
                .queue
                .iter()
                .enumerate()
                .all(|(i, r)| i == pos || r.status != ReqStatus::Granted || compatible(r.mode, mode));
            if compatible_with_others {
                let req = &mut guard.queue[pos];
                req.hold_count += 1;
                req.mode = combine(req.mode, mode);
                guard.group_mode = Some(widen(guard.group_mode, mode));
                drop(guard);
                header.cvar.notify_all();
                return Ok(());
            }
            guard.queue[pos].status = ReqStatus::Converting;
            guard.queue[pos].convert_mode = Some(mode);
            guard.waiting = true;
            log::debug!("holder {holder} waiting to convert lock on {obj:?} to {mode:?}");
            self.wait_for_grant(&header, guard, &obj, holder, cancel, /*is_new=*/ false)
        } else {
            // New request (spec.md §4.3 point 3, first bullet).
            let granted_now = !guard.waiting && group_compatible(guard.group_mode, mode);
            guard.queue.push(LockRequest {
                holder,
                mode,
                convert_mode: None,
                status: if granted_now { ReqStatus::Granted } else { ReqStatus::Waiting },
                hold_count: 1,
            });
            if granted_now {
                guard.group_mode = Some(widen(guard.group_mode, mode));
                drop(guard);
                header.cvar.notify_all();
                return Ok(());
            }
            guard.waiting = true;
            log::debug!("holder {holder} waiting to acquire {mode:?} on {obj:?}");
            self.wait_for_grant(&header, guard, &obj, holder, cancel, /*is_new=*/ true)
        }
    }

    fn wait_for_grant(
        &self,
        header: &Arc<QueueHeader>,
        mut guard: MutexGuard<'_, Inner>,
        obj: &LockId,
        holder: LockHolder,
        cancel: Option<&CancelToken>,
        is_new: bool,
    ) -> CResult<()> {
        loop {
            match guard.queue.iter().find(|r| r.holder == holder) {
                Some(r) if r.status == ReqStatus::Granted => return Ok(()),
                Some(_) => {}
                None => return Err(Error::Internal("lock request vanished from queue".into())),
            }

            if let Some(token) = cancel {
                if token.is_cancelled() {
                    log::warn!("holder {holder} cancelled while waiting for a lock on {obj:?}");
                    withdraw(&mut guard, holder, is_new);
                    drop(guard);
                    header.cvar.notify_all();
                    self.try_gc(obj);
                    return Err(Error::LockTimeout);
                }
                let (g, _timeout) = header
                    .cvar
                    .wait_timeout(guard, CANCEL_POLL)
                    .expect("lock condvar poisoned");
                guard = g;
            } else {
                guard = header.cvar.wait(guard).expect("lock condvar poisoned");
            }
        }
    }

    /// Releases one level of `holder`'s hold on `obj` (spec.md §4.3
    /// "Release"). Releasing a lock not held is a no-op success, per the
    /// `NotHeld` policy in spec.md §4.3's Failures list -- callers on a
    /// rollback path routinely release objects they may never have locked.
    pub fn release(&self, holder: LockHolder, obj: &LockId) -> CResult<()> {
        let header = {
            let map = self.objects.lock().expect("lock map poisoned");
            match map.get(obj) {
                Some(h) => h.clone(),
                None => return Ok(()),
            }
        };
        {
            let mut guard = header.inner.lock().expect("lock header poisoned");
            release_locked(&mut guard, holder);
        }
        header.cvar.notify_all();
        self.try_gc(obj);
        Ok(())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn release_locked(guard: &mut Inner, holder: LockHolder) {
    let Some(pos) = guard.queue.iter().position(|r| r.holder == holder) else { return };
    if guard.queue[pos].hold_count > 1 {
        guard.queue[pos].hold_count -= 1;
        return;
    }
    guard.queue.remove(pos);
    revalidate(guard);
}

/// Withdraws a cancelled request. A fresh (`is_new`) request that never
/// held anything is removed outright; a cancelled conversion reverts to
/// the mode the transaction already held (spec.md §4.3 point 4: "the
/// pending request is removed (or its count decremented)").
fn withdraw(guard: &mut Inner, holder: LockHolder, is_new: bool) {
    let Some(pos) = guard.queue.iter().position(|r| r.holder == holder) else { return };
    if is_new {
        guard.queue.remove(pos);
    } else {
        guard.queue[pos].status = ReqStatus::Granted;
        guard.queue[pos].convert_mode = None;
    }
    revalidate(guard);
}

/// Rebuilds the group mode from the currently-granted requests, then walks
/// the queue in FIFO order granting Converting/Waiting requests that are
/// now compatible -- stopping at the first one that isn't, so later
/// requests are never woken out of order (spec.md §4.3 "Release" steps 3-4:
/// "once an incompatible pending request is encountered, later queued
/// requests are NOT woken, to preserve FIFO fairness").
fn revalidate(guard: &mut Inner) {
    let mut group: Option<Mode> = None;
    for r in guard.queue.iter().filter(|r| r.status == ReqStatus::Granted) {
        group = Some(widen(group, r.mode));
    }

    for i in 0..guard.queue.len() {
        match guard.queue[i].status {
            ReqStatus::Granted => {}
            ReqStatus::Converting => {
                let convert_mode = guard.queue[i].convert_mode.expect("converting request has no target mode");
                let others_ok = guard
                    .queue
                    .iter()
                    .enumerate()
                    .all(|(j, r)| j == i || r.status != ReqStatus::Granted || compatible(r.mode, convert_mode));
                if !others_ok {
                    break;
                }
                guard.queue[i].mode = convert_mode;
                guard.queue[i].convert_mode = None;
                guard.queue[i].status = ReqStatus::Granted;
                guard.queue[i].hold_count += 1;
                group = Some(widen(group, convert_mode));
            }
            ReqStatus::Waiting => {
                let mode = guard.queue[i].mode;
                if !group_compatible(group, mode) {
                    break;
                }
                guard.queue[i].status = ReqStatus::Granted;
                group = Some(widen(group, mode));
            }
        }
    }

    guard.group_mode = group;
    guard.waiting = guard.queue.iter().any(|r| r.status != ReqStatus::Granted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn independent_readers_are_compatible() {
        let mgr = LockManager::new();
        let obj = LockId::Table("t".into());
        mgr.acquire(1, obj.clone(), Mode::S, None).unwrap();
        mgr.acquire(2, obj.clone(), Mode::S, None).unwrap();
        mgr.release(1, &obj).unwrap();
        mgr.release(2, &obj).unwrap();
    }

    #[test]
    fn exclusive_excludes_everyone() {
        let mgr = Arc::new(LockManager::new());
        let obj = LockId::Table("t".into());
        mgr.acquire(1, obj.clone(), Mode::X, None).unwrap();

        let mgr2 = mgr.clone();
        let obj2 = obj.clone();
        let handle = thread::spawn(move || {
            mgr2.acquire(2, obj2, Mode::S, None).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        mgr.release(1, &obj).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn reentrant_acquisition_increments_hold_count() {
        let mgr = LockManager::new();
        let obj = LockId::Database;
        mgr.acquire(1, obj.clone(), Mode::S, None).unwrap();
        mgr.acquire(1, obj.clone(), Mode::S, None).unwrap();
        // First release just decrements the hold count; the lock is still held.
        mgr.release(1, &obj).unwrap();
        mgr.acquire(2, obj.clone(), Mode::X, Some(&{
            let t = CancelToken::new();
            t.cancel();
            t
        })).unwrap_err();
        mgr.release(1, &obj).unwrap();
    }

    #[test]
    fn cancellation_withdraws_a_waiting_request_and_empties_the_header() {
        let mgr = LockManager::new();
        let obj = LockId::Document("t".into(), b"row".to_vec());
        mgr.acquire(1, obj.clone(), Mode::S, None).unwrap();

        let token = CancelToken::new();
        let mgr2 = Arc::new(mgr);
        let mgr3 = mgr2.clone();
        let obj2 = obj.clone();
        let token2 = token.clone();
        let handle = thread::spawn(move || mgr3.acquire(2, obj2, Mode::X, Some(&token2)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(matches!(handle.join().unwrap(), Err(Error::LockTimeout)));

        mgr2.release(1, &obj).unwrap();
        let count = mgr2.objects.lock().unwrap().len();
        assert_eq!(count, 0);
    }

    #[test]
    fn lock_convert_upgrades_when_compatible_with_all_other_holders() {
        let mgr = LockManager::new();
        let obj = LockId::Table("t".into());
        mgr.acquire(1, obj.clone(), Mode::IS, None).unwrap();
        mgr.acquire(2, obj.clone(), Mode::IS, None).unwrap();
        mgr.acquire(3, obj.clone(), Mode::IX, None).unwrap();

        // T1 upgrades IS -> IX: compatible with T2 (IS) and T3 (IX).
        mgr.acquire(1, obj.clone(), Mode::IX, None).unwrap();

        let map = mgr.objects.lock().unwrap();
        let header = map.get(&obj).unwrap().clone();
        drop(map);
        let inner = header.inner.lock().unwrap();
        assert_eq!(inner.queue.len(), 3);
        assert_eq!(inner.group_mode, Some(Mode::IX));
    }
}
