use core::{
    hint::spin_loop,
    ops::{Deref, DerefMut},
};
use try_lock::{Locked, TryLock};

/// Spinning lock on top of [`TryLock`].
///
/// All locks of this crate are taken in the following order:
/// address space SPT, copy lock, frame table, page state, physical memory,
/// swap store, page table.
pub(crate) struct SharedLock<T> {
    inner: TryLock<T>,
}

impl<T> SharedLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: TryLock::new(value),
        }
    }

    /// Spins until the lock is free
    pub(crate) fn lock(&self) -> SharedGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            spin_loop();
        }
    }

    pub(crate) fn try_lock(&self) -> Option<SharedGuard<'_, T>> {
        self.inner.try_lock().map(|guard| SharedGuard { guard })
    }
}

pub(crate) struct SharedGuard<'a, T> {
    guard: Locked<'a, T>,
}

impl<T> Deref for SharedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.guard
    }
}

impl<T> DerefMut for SharedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.guard
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use super::SharedLock;

    #[test]
    fn test_lock_excludes() {
        let lock = SharedLock::new(0usize);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_lock_counter_threads() {
        const THREADS: usize = 4;
        const ITERATIONS: usize = 1000;

        let lock = Arc::new(SharedLock::new(0usize));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), THREADS * ITERATIONS);
    }
}
