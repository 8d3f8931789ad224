//! Observable state container.
//!
//! Every `update`/`set` runs to completion under one lock and then bumps a
//! version published on a `watch` channel, so subscribers only ever observe
//! fully applied mutations.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Reactive<T> {
    value: Mutex<T>,
    version: watch::Sender<u64>,
}

impl<T> Reactive<T> {
    pub fn new(value: T) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            value: Mutex::new(value),
            version,
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        lock(&self.value).clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.value))
    }

    pub fn set(&self, value: T) -> T {
        let previous = std::mem::replace(&mut *lock(&self.value), value);
        self.notify();
        previous
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut lock(&self.value));
        self.notify();
        out
    }

    /// Current version; increases by one per mutation.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

impl<T: Default> Default for Reactive<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
