//! Page locks for strict two-phase locking.
//!
//! Every request either gets granted, blocks until it can be, or fails with
//! [`LockError::Deadlock`] once waiting would close a cycle in the wait-for
//! graph. The requester that closes the cycle is the victim.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::TransactionId;
use crate::storage::entity::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("deadlock detected, {0} must abort")]
    Deadlock(TransactionId),
    #[error("{0} ended while waiting for a lock")]
    Withdrawn(TransactionId),
}

#[derive(Debug)]
struct LockRequest {
    tx_id: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockQueue {
    waiting: VecDeque<LockRequest>,
    sharing: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockQueue {
    fn holds(&self, tx_id: TransactionId) -> bool {
        self.exclusive == Some(tx_id) || self.sharing.contains(&tx_id)
    }

    fn covers(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.holds(tx_id),
            LockMode::Exclusive => self.exclusive == Some(tx_id),
        }
    }

    fn is_waiting(&self, tx_id: TransactionId) -> bool {
        self.waiting.iter().any(|req| req.tx_id == tx_id)
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.sharing.is_empty() && self.exclusive.is_none()
    }

    fn conflicting_holders(&self, tx_id: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut holders = Vec::new();
        if let Some(ex_holder) = self.exclusive {
            if ex_holder != tx_id {
                holders.push(ex_holder);
            }
        }
        if mode == LockMode::Exclusive {
            holders.extend(self.sharing.iter().copied().filter(|&h| h != tx_id));
        }
        holders
    }

    /// Everyone `tx_id` has to wait for: conflicting holders, plus every
    /// request queued ahead of it unless it already holds the resource.
    fn blockers(&self, tx_id: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut blockers = self.conflicting_holders(tx_id, mode);
        if !self.holds(tx_id) {
            blockers.extend(
                self.waiting
                    .iter()
                    .take_while(|req| req.tx_id != tx_id)
                    .map(|req| req.tx_id),
            );
        }
        blockers
    }

    fn grantable(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        if !self.conflicting_holders(tx_id, mode).is_empty() {
            return false;
        }
        // upgrades jump the queue, everyone else goes in arrival order
        self.holds(tx_id)
            || self
                .waiting
                .front()
                .map_or(true, |first| first.tx_id == tx_id)
    }

    fn grant(&mut self, tx_id: TransactionId, mode: LockMode) {
        self.waiting.retain(|req| req.tx_id != tx_id);
        match mode {
            LockMode::Shared => {
                self.sharing.insert(tx_id);
            }
            LockMode::Exclusive => {
                self.sharing.remove(&tx_id);
                self.exclusive = Some(tx_id);
            }
        }
    }

    fn release(&mut self, tx_id: TransactionId) -> bool {
        let mut changed = self.sharing.remove(&tx_id);
        if self.exclusive == Some(tx_id) {
            self.exclusive = None;
            changed = true;
        }
        let before = self.waiting.len();
        self.waiting.retain(|req| req.tx_id != tx_id);
        changed || before != self.waiting.len()
    }
}

#[derive(Debug, Default)]
struct WaitQueue {
    queue: Mutex<LockQueue>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<PageId, Arc<WaitQueue>>>,
    waits_for: Mutex<HashMap<TransactionId, Vec<TransactionId>>>,
    held: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    // the page each blocked transaction is queued on
    pending: Mutex<HashMap<TransactionId, PageId>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `tx_id` holds `page_id` in at least `mode`.
    pub fn lock(
        &self,
        page_id: PageId,
        tx_id: TransactionId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let wait_queue = {
            let mut table = self.table.lock();
            table.entry(page_id).or_default().clone()
        };

        let mut queue = wait_queue.queue.lock();
        if queue.covers(tx_id, mode) {
            return Ok(());
        }

        queue.waiting.push_back(LockRequest { tx_id, mode });
        self.pending.lock().insert(tx_id, page_id);
        loop {
            // release_all removed our request while we slept
            if !queue.is_waiting(tx_id) {
                self.waits_for.lock().remove(&tx_id);
                debug!(tx = %tx_id, page = %page_id, "lock request withdrawn");
                return Err(LockError::Withdrawn(tx_id));
            }

            if queue.grantable(tx_id, mode) {
                queue.grant(tx_id, mode);
                self.pending.lock().remove(&tx_id);
                self.waits_for.lock().remove(&tx_id);
                self.held.lock().entry(tx_id).or_default().insert(page_id);
                // the next request in line may be compatible too
                wait_queue.cvar.notify_all();
                debug!(tx = %tx_id, page = %page_id, ?mode, "lock granted");
                return Ok(());
            }

            let blockers = queue.blockers(tx_id, mode);
            if self.closes_cycle(tx_id, blockers) {
                queue.waiting.retain(|req| req.tx_id != tx_id);
                self.pending.lock().remove(&tx_id);
                wait_queue.cvar.notify_all();
                warn!(tx = %tx_id, page = %page_id, ?mode, "deadlock, aborting requester");
                return Err(LockError::Deadlock(tx_id));
            }

            wait_queue.cvar.wait(&mut queue);
        }
    }

    /// Records that `tx_id` now waits for `blockers` and reports whether that
    /// lets `tx_id` reach itself in the wait-for graph.
    fn closes_cycle(&self, tx_id: TransactionId, blockers: Vec<TransactionId>) -> bool {
        let mut waits_for = self.waits_for.lock();
        waits_for.insert(tx_id, blockers);

        let mut visited = HashSet::new();
        let mut stack = vec![tx_id];
        let mut cycle = false;
        while let Some(current) = stack.pop() {
            let Some(next) = waits_for.get(&current) else {
                continue;
            };
            for &waited in next {
                if waited == tx_id {
                    cycle = true;
                    break;
                }
                if visited.insert(waited) {
                    stack.push(waited);
                }
            }
            if cycle {
                break;
            }
        }

        if cycle {
            waits_for.remove(&tx_id);
        }
        cycle
    }

    /// Gives up a single lock before transaction end. This breaks strict 2PL
    /// for that page; callers accept losing serializability on it.
    pub fn unlock(&self, page_id: PageId, tx_id: TransactionId) {
        if let Some(pages) = self.held.lock().get_mut(&tx_id) {
            pages.remove(&page_id);
        }
        self.release(page_id, tx_id);
    }

    /// Releases every lock `tx_id` holds and withdraws any pending request.
    /// A thread blocked in [`lock`](Self::lock) for `tx_id` wakes up with
    /// [`LockError::Withdrawn`].
    pub fn release_all(&self, tx_id: TransactionId) {
        let mut pages = self.held.lock().remove(&tx_id).unwrap_or_default();
        if let Some(page_id) = self.pending.lock().remove(&tx_id) {
            pages.insert(page_id);
        }
        self.waits_for.lock().remove(&tx_id);
        for page_id in pages {
            self.release(page_id, tx_id);
        }
    }

    pub fn holds_lock(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        self.held
            .lock()
            .get(&tx_id)
            .map_or(false, |pages| pages.contains(&page_id))
    }

    /// Pages currently locked by `tx_id`, in no particular order.
    pub fn locked_pages(&self, tx_id: TransactionId) -> Vec<PageId> {
        self.held
            .lock()
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    fn release(&self, page_id: PageId, tx_id: TransactionId) {
        let wait_queue = match self.table.lock().get(&page_id) {
            Some(wait_queue) => wait_queue.clone(),
            None => return,
        };
        if wait_queue.queue.lock().release(tx_id) {
            wait_queue.cvar.notify_all();
        }
        drop(wait_queue);

        // Drop the queue once nobody references it. Clones are only made
        // under the table lock, so a count of one here is final.
        let mut table = self.table.lock();
        let unused = table
            .get(&page_id)
            .map_or(false, |wq| Arc::strong_count(wq) == 1 && wq.queue.lock().is_idle());
        if unused {
            table.remove(&page_id);
        }
    }
}
