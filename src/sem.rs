//! Fair binary semaphores addressed by id.
//!
//! A tree record stores only a [`SemId`]; the semaphore itself lives in
//! the [`SemTable`] of the partition that holds the tree. Waiters are
//! served strictly in arrival order (ticket lock).

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Default number of semaphores a table can hold.
pub const DEFAULT_MAX_SEMAPHORES: usize = 1024;

/// Identifier of a semaphore within a [`SemTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SemId(u32);

impl SemId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by [`SemTable::take`] when the semaphore was ended or deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ended;

struct Tickets {
    next: u64,
    serving: u64,
    ended: bool,
}

struct Semaphore {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets {
                next: 0,
                serving: 0,
                ended: false,
            }),
            turn: Condvar::new(),
        }
    }

    fn take(&self) -> Result<(), Ended> {
        let mut t = self.tickets.lock();
        if t.ended {
            return Err(Ended);
        }
        let mine = t.next;
        t.next += 1;
        while t.serving != mine {
            if t.ended {
                return Err(Ended);
            }
            self.turn.wait(&mut t);
        }
        Ok(())
    }

    fn give(&self) {
        let mut t = self.tickets.lock();
        debug_assert!(t.serving < t.next, "semaphore given without a taker");
        t.serving += 1;
        drop(t);
        self.turn.notify_all();
    }

    fn end(&self) {
        self.tickets.lock().ended = true;
        self.turn.notify_all();
    }
}

/// Table of fair semaphores, the lock contract used by trees.
pub struct SemTable {
    slots: Mutex<Vec<Option<Arc<Semaphore>>>>,
    limit: usize,
}

impl SemTable {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_SEMAPHORES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Create an available semaphore. `None` when the table is full.
    pub fn create(&self) -> Option<SemId> {
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if slots.len() < self.limit => {
                slots.push(None);
                slots.len() - 1
            }
            None => return None,
        };
        let id = u32::try_from(index).ok()?;
        slots[index] = Some(Arc::new(Semaphore::new()));
        Some(SemId(id))
    }

    fn get(&self, id: SemId) -> Option<Arc<Semaphore>> {
        self.slots.lock().get(id.0 as usize).cloned().flatten()
    }

    /// Block until the semaphore is ours. Fails once it has been ended
    /// or if it no longer exists.
    pub fn take(&self, id: SemId) -> Result<(), Ended> {
        // The table lock is not held while blocking.
        let sem = self.get(id).ok_or(Ended)?;
        sem.take()
    }

    pub fn give(&self, id: SemId) {
        if let Some(sem) = self.get(id) {
            sem.give();
        }
    }

    /// Wake every waiter; current and future takes fail.
    pub fn end(&self, id: SemId) {
        if let Some(sem) = self.get(id) {
            sem.end();
        }
    }

    pub fn delete(&self, id: SemId) {
        let removed = self
            .slots
            .lock()
            .get_mut(id.0 as usize)
            .and_then(Option::take);
        if let Some(sem) = removed {
            sem.end();
        }
    }

    /// Take the semaphore and give it back when the guard drops.
    pub fn acquire(&self, id: SemId) -> Result<SemGuard<'_>, Ended> {
        let sem = self.get(id).ok_or(Ended)?;
        sem.take()?;
        Ok(SemGuard {
            sem,
            id,
            _table: PhantomData,
        })
    }

    /// Number of semaphores currently allocated.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a taken semaphore. Gives back the semaphore it took even if
/// its id has since been deleted and reused.
pub struct SemGuard<'a> {
    sem: Arc<Semaphore>,
    id: SemId,
    _table: PhantomData<&'a SemTable>,
}

impl SemGuard<'_> {
    pub fn id(&self) -> SemId {
        self.id
    }
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        self.sem.give();
    }
}
