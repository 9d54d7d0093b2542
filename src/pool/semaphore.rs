use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Counting semaphore.
///
/// `wait` blocks while the count is zero, then decrements it; `post`
/// increments it and wakes one waiter.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn wait(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self.cond.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    /// Like `wait`, but gives up after `timeout`. Returns whether a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.lock();
        let (mut count, result) = self
            .cond
            .wait_timeout_while(count, timeout, |c| *c == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn try_wait(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn post(&self) {
        *self.lock() += 1;
        self.cond.notify_one();
    }

    /// Current permit count. Racy; diagnostics only.
    pub fn available(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        sem.post();
        waiter.join().unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn try_wait_and_timeout() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(10)));
    }
}
