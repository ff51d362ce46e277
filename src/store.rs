use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;

/// Session-scoped state container for one logical store.
///
/// Mutations apply synchronously and never wait on I/O; every subscriber
/// receives the new value through its own unbounded channel.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: &'static str,
    state: Mutex<T>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field(
                "state",
                &*self.inner.state.lock().unwrap_or_else(PoisonError::into_inner),
            )
            .finish()
    }
}

impl<T: Clone> Store<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(initial),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn get(&self) -> T {
        self.state().clone()
    }

    pub fn set(&self, value: T) {
        self.update(|state| *state = value);
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state();
        let out = f(&mut state);
        // Notify under the state lock so subscribers see changes in order.
        self.notify(&state);
        out
    }

    /// Changes published after this call; the current value is not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn state(&self) -> MutexGuard<'_, T> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, value: &T) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}
