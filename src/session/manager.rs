//! Bounded pool of transaction handles and scratch arenas.
//!
//! The manager makes sure no single client holds a transaction handle or an
//! arena for too long: if a client goes mute or disconnects, the oldest idle
//! session past the timeout is silently aborted and its resources are reused
//! for other connections. One mutex guards the whole pool; critical sections
//! are map lookups and stack pushes, O(capacity) only for the eviction scan,
//! and the mutex is never held across an engine call. Exclusive use of one
//! session is enforced by the `executing` flag, not by the mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::engine::{Arena, Transaction};
use crate::error::ServerError;
use crate::session::SessionId;

/// Default idle timeout. Postgres 9.6+ defaults to the same 30 seconds.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pool capacity.
pub const DEFAULT_CAPACITY: usize = 4096;

/// A session's resources while a dispatcher thread holds them exclusively.
pub struct ActiveSession {
    pub txn: Transaction,
    pub arena: Arena,
}

struct SessionRecord {
    txn: Option<Transaction>,
    arena: Option<Arena>,
    last_access: Instant,
    executing: bool,
}

struct Pool {
    free_txns: Vec<Transaction>,
    free_arenas: Vec<Arena>,
    sessions: HashMap<SessionId, SessionRecord>,
}

/// Counters for introspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionManagerSnapshot {
    pub capacity: usize,
    pub free_transactions: usize,
    pub free_arenas: usize,
    pub live_sessions: usize,
}

pub struct SessionManager {
    inner: Mutex<Pool>,
    capacity: usize,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        let pool = Pool {
            free_txns: (0..capacity).map(|_| Transaction::default()).collect(),
            free_arenas: (0..capacity).map(|_| Arena::default()).collect(),
            sessions: HashMap::with_capacity(capacity),
        };
        Self {
            inner: Mutex::new(pool),
            capacity,
            idle_timeout,
        }
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evict the oldest idle session past the timeout and reuse its
    /// resources. Fails with capacity-exhausted when every session is
    /// executing or the oldest idle one is still young.
    fn evict(&self, pool: &mut Pool) -> Result<(Transaction, Arena), ServerError> {
        let victim = pool
            .sessions
            .iter()
            .filter(|(_, record)| !record.executing)
            .min_by_key(|(_, record)| record.last_access)
            .map(|(id, record)| (*id, record.last_access));
        let Some((victim, last_access)) = victim else {
            return Err(ServerError::CapacityExhausted);
        };
        if last_access.elapsed() < self.idle_timeout {
            return Err(ServerError::CapacityExhausted);
        }

        warn!(session = %victim, "evicting idle session; its transaction is aborted");
        let record = pool
            .sessions
            .remove(&victim)
            .ok_or_else(|| ServerError::internal("eviction victim vanished"))?;
        match (record.txn, record.arena) {
            (Some(txn), Some(arena)) => Ok((txn, arena)),
            _ => Err(ServerError::internal("idle session lost its handles")),
        }
    }

    /// Reserve resources for a new transaction. The caller must initialize
    /// the engine transaction and then either `hold_txn` or `release_txn`.
    pub fn request_txn(&self, id: SessionId) -> Result<ActiveSession, ServerError> {
        let mut pool = self.pool();
        if pool.sessions.contains_key(&id) {
            return Err(ServerError::conflict(
                "transaction is already running, continue using it",
            ));
        }
        if pool.free_txns.is_empty() || pool.free_arenas.is_empty() {
            let (txn, arena) = self.evict(&mut pool)?;
            return Ok(ActiveSession { txn, arena });
        }
        let (Some(txn), Some(arena)) = (pool.free_txns.pop(), pool.free_arenas.pop()) else {
            return Err(ServerError::internal("free stacks emptied underneath us"));
        };
        Ok(ActiveSession { txn, arena })
    }

    /// Take exclusive hold of an existing transactional session.
    pub fn continue_txn(&self, id: SessionId) -> Result<ActiveSession, ServerError> {
        let mut pool = self.pool();
        let record = pool.sessions.get_mut(&id).ok_or_else(|| {
            ServerError::not_found("transaction was terminated, start a new one")
        })?;
        if record.executing {
            return Err(ServerError::conflict(
                "transaction cannot be used concurrently",
            ));
        }
        record.executing = true;
        record.last_access = Instant::now();
        let (Some(txn), Some(arena)) = (record.txn.take(), record.arena.take()) else {
            return Err(ServerError::internal("session record lost its handles"));
        };
        Ok(ActiveSession { txn, arena })
    }

    /// Park a session back into the map, idle.
    pub fn hold_txn(&self, id: SessionId, active: ActiveSession) {
        let mut pool = self.pool();
        pool.sessions.insert(
            id,
            SessionRecord {
                txn: Some(active.txn),
                arena: Some(active.arena),
                last_access: Instant::now(),
                executing: false,
            },
        );
    }

    /// Destroy a session, returning its resources to the free stacks.
    pub fn release_txn(&self, id: SessionId, active: ActiveSession) {
        let mut pool = self.pool();
        pool.free_txns.push(active.txn);
        pool.free_arenas.push(active.arena);
        pool.sessions.remove(&id);
        debug!(session = %id, "session released");
    }

    /// Borrow an arena for a non-transactional operation.
    pub fn request_arena(&self) -> Result<Arena, ServerError> {
        let mut pool = self.pool();
        if let Some(arena) = pool.free_arenas.pop() {
            return Ok(arena);
        }
        let (txn, arena) = self.evict(&mut pool)?;
        pool.free_txns.push(txn);
        Ok(arena)
    }

    pub fn release_arena(&self, arena: Arena) {
        let mut pool = self.pool();
        pool.free_arenas.push(arena);
    }

    /// Unified entry point for request handling: borrows an arena for
    /// non-transactional sessions, continues the transaction otherwise. The
    /// returned guard releases the resources when dropped.
    pub fn lock(&self, id: SessionId) -> Result<SessionLock<'_>, ServerError> {
        if id.is_txn() {
            let active = self.continue_txn(id)?;
            Ok(SessionLock {
                manager: self,
                id,
                txn: Some(active.txn),
                arena: Some(active.arena),
            })
        } else {
            let arena = self.request_arena()?;
            Ok(SessionLock {
                manager: self,
                id,
                txn: None,
                arena: Some(arena),
            })
        }
    }

    pub fn snapshot(&self) -> SessionManagerSnapshot {
        let pool = self.pool();
        SessionManagerSnapshot {
            capacity: self.capacity,
            free_transactions: pool.free_txns.len(),
            free_arenas: pool.free_arenas.len(),
            live_sessions: pool.sessions.len(),
        }
    }
}

/// Scoped exclusive access to one session's transaction and arena.
///
/// Dropping the lock parks a transactional session back into the map with a
/// refreshed `last_access`, or returns the borrowed arena to the pool. This
/// runs on every path out of a handler, so an error can never leave a
/// session marked executing.
pub struct SessionLock<'a> {
    manager: &'a SessionManager,
    id: SessionId,
    txn: Option<Transaction>,
    arena: Option<Arena>,
}

impl SessionLock<'_> {
    pub fn is_txn(&self) -> bool {
        self.txn.is_some()
    }

    /// The transaction (if any) and arena, for an engine call.
    pub fn parts(&mut self) -> (Option<&mut Transaction>, &mut Arena) {
        (
            self.txn.as_mut(),
            self.arena.as_mut().expect("arena is present until drop"),
        )
    }

    /// The arena's outputs, for marshalling after an engine call.
    pub fn arena(&self) -> &Arena {
        self.arena.as_ref().expect("arena is present until drop")
    }
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        let arena = self.arena.take();
        match (self.txn.take(), arena) {
            (Some(txn), Some(arena)) => {
                self.manager.hold_txn(self.id, ActiveSession { txn, arena })
            }
            (None, Some(arena)) => self.manager.release_arena(arena),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientId, TxnId};

    fn txn_session(txn: u64) -> SessionId {
        SessionId::new(ClientId::from_peer("test-peer"), TxnId::new(txn))
    }

    fn plain_session() -> SessionId {
        SessionId::new(ClientId::from_peer("test-peer"), TxnId::NONE)
    }

    #[test]
    fn pool_accounting_stays_at_capacity() {
        let manager = SessionManager::new(3, DEFAULT_IDLE_TIMEOUT);
        let id = txn_session(1);

        let active = manager.request_txn(id).expect("request");
        let snapshot = manager.snapshot();
        // One of each handle is in flight.
        assert_eq!(snapshot.free_transactions + snapshot.live_sessions + 1, 3);
        assert_eq!(snapshot.free_arenas + snapshot.live_sessions + 1, 3);

        manager.hold_txn(id, active);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.free_transactions + snapshot.live_sessions, 3);
        assert_eq!(snapshot.free_arenas + snapshot.live_sessions, 3);

        let active = manager.continue_txn(id).expect("continue");
        manager.release_txn(id, active);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.live_sessions, 0);
        assert_eq!(snapshot.free_transactions, 3);
        assert_eq!(snapshot.free_arenas, 3);
    }

    #[test]
    fn duplicate_begin_is_a_conflict() {
        let manager = SessionManager::new(2, DEFAULT_IDLE_TIMEOUT);
        let id = txn_session(7);
        let active = manager.request_txn(id).expect("request");
        manager.hold_txn(id, active);
        assert!(matches!(
            manager.request_txn(id),
            Err(ServerError::Conflict(_))
        ));
    }

    #[test]
    fn concurrent_use_of_one_transaction_is_rejected() {
        let manager = SessionManager::new(2, DEFAULT_IDLE_TIMEOUT);
        let id = txn_session(7);
        let active = manager.request_txn(id).expect("request");
        manager.hold_txn(id, active);

        let lock = manager.lock(id).expect("first lock");
        assert!(matches!(manager.lock(id), Err(ServerError::Conflict(_))));
        drop(lock);
        // The drop parked the session; it can be used again.
        manager.lock(id).expect("lock after drop");
    }

    #[test]
    fn unknown_transaction_is_not_found() {
        let manager = SessionManager::new(2, DEFAULT_IDLE_TIMEOUT);
        assert!(matches!(
            manager.continue_txn(txn_session(9)),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn eviction_reclaims_only_idle_sessions_past_the_timeout() {
        // Timeout zero: any idle session is immediately evictable.
        let manager = SessionManager::new(1, Duration::ZERO);
        let first = txn_session(1);
        let active = manager.request_txn(first).expect("first");
        manager.hold_txn(first, active);

        let second = txn_session(2);
        let active = manager.request_txn(second).expect("evicting request");
        manager.hold_txn(second, active);

        // The evicted session is gone.
        assert!(matches!(
            manager.continue_txn(first),
            Err(ServerError::NotFound(_))
        ));

        // A long timeout protects the idle session instead.
        let manager = SessionManager::new(1, Duration::from_secs(3600));
        let active = manager.request_txn(first).expect("first");
        manager.hold_txn(first, active);
        assert!(matches!(
            manager.request_txn(second),
            Err(ServerError::CapacityExhausted)
        ));
    }

    #[test]
    fn executing_sessions_are_never_evicted() {
        let manager = SessionManager::new(1, Duration::ZERO);
        let first = txn_session(1);
        let active = manager.request_txn(first).expect("first");
        manager.hold_txn(first, active);

        let lock = manager.lock(first).expect("lock");
        assert!(matches!(
            manager.request_txn(txn_session(2)),
            Err(ServerError::CapacityExhausted)
        ));
        drop(lock);
    }

    #[test]
    fn non_transactional_lock_borrows_and_returns_an_arena() {
        let manager = SessionManager::new(2, DEFAULT_IDLE_TIMEOUT);
        {
            let mut lock = manager.lock(plain_session()).expect("lock");
            let (txn, _arena) = lock.parts();
            assert!(txn.is_none());
            assert_eq!(manager.snapshot().free_arenas, 1);
        }
        assert_eq!(manager.snapshot().free_arenas, 2);
    }

    #[test]
    fn arena_request_on_exhausted_pool_evicts_and_keeps_the_transaction() {
        let manager = SessionManager::new(1, Duration::ZERO);
        let id = txn_session(1);
        let active = manager.request_txn(id).expect("request");
        manager.hold_txn(id, active);

        let arena = manager.request_arena().expect("evicting arena request");
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.free_transactions, 1);
        assert_eq!(snapshot.live_sessions, 0);
        manager.release_arena(arena);
        assert_eq!(manager.snapshot().free_arenas, 1);
    }
}
