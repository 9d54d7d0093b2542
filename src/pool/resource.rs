//! Bounded pool of reusable blocking resources.
//!
//! A fixed set of handles is created up front. `acquire` blocks on a
//! counting semaphore until one is free and hands it out wrapped in a
//! [`PoolGuard`]; dropping the guard puts the handle back on the free list
//! and releases the permit. Because release lives in `Drop`, a handle comes
//! back on every exit path of the borrowing scope, unwinding included.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::PoolError;
use super::semaphore::Semaphore;

struct FreeList<T> {
    free: VecDeque<T>,
    used: usize,
}

pub struct ResourcePool<T> {
    state: Mutex<FreeList<T>>,
    permits: Semaphore,
    capacity: usize,
}

impl<T> ResourcePool<T> {
    /// Builds a pool owning `items`. Capacity is fixed at `items.len()`.
    pub fn new(items: Vec<T>) -> Result<Self, PoolError> {
        if items.is_empty() {
            return Err(PoolError::Empty);
        }
        let capacity = items.len();
        Ok(Self {
            state: Mutex::new(FreeList {
                free: items.into(),
                used: 0,
            }),
            permits: Semaphore::new(capacity),
            capacity,
        })
    }

    /// Blocks until a handle is free and checks it out.
    pub fn acquire(&self) -> PoolGuard<'_, T> {
        self.permits.wait();
        self.checkout()
    }

    /// Checks out a handle only if one is free right now.
    pub fn try_acquire(&self) -> Option<PoolGuard<'_, T>> {
        self.permits.try_wait().then(|| self.checkout())
    }

    /// Like `acquire`, giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PoolGuard<'_, T>> {
        self.permits.wait_timeout(timeout).then(|| self.checkout())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles currently on the free list. Racy; diagnostics only.
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    /// Handles currently checked out. Racy; diagnostics only.
    pub fn used_count(&self) -> usize {
        self.lock().used
    }

    // Caller holds a permit, and permits never outnumber free handles.
    fn checkout(&self) -> PoolGuard<'_, T> {
        let mut state = self.lock();
        let item = state.free.pop_front();
        if item.is_some() {
            state.used += 1;
        }
        PoolGuard { pool: self, item }
    }

    fn release(&self, item: T) {
        {
            let mut state = self.lock();
            state.free.push_back(item);
            state.used -= 1;
        }
        self.permits.post();
    }

    fn lock(&self) -> MutexGuard<'_, FreeList<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out pool handle, returned to the pool on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a ResourcePool<T>,
    item: Option<T>,
}

impl<T> PoolGuard<'_, T> {
    /// Returns the handle now rather than at the end of the scope.
    pub fn release(self) {}
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
