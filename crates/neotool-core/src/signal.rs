//! Observable cells for published session state.
//!
//! A [`Signal`] is owned by the writer; readers hold [`Readable`] views that
//! can poll the latest snapshot or wait for changes. Backed by
//! [`tokio::sync::watch`], so readers always observe a consistent value and
//! intermediate updates may be coalesced.

use tokio::{sync::watch, task::JoinHandle};

/// Writable observable cell.
#[derive(Debug)]
pub struct Signal<T> {
    tx: watch::Sender<T>,
}

impl<T> Signal<T> {
    /// Create a signal holding `value`.
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    /// Mutate in place and notify readers unconditionally.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Mutate in place; readers are notified only if `f` returns true.
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Read-only view of this signal.
    pub fn readable(&self) -> Readable<T> {
        Readable { rx: self.tx.subscribe() }
    }
}

impl<T: Clone> Signal<T> {
    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T: PartialEq> Signal<T> {
    /// Replace the value, notifying readers only if it changed.
    ///
    /// Returns whether a notification was sent.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }
}

impl<T: Default> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Read-only view of a [`Signal`].
#[derive(Debug, Clone)]
pub struct Readable<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Readable<T> {
    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new snapshot.
    ///
    /// Returns `None` once the owning signal is dropped.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Readable<T> {
    /// Invoke `f` with the current value and then with every change.
    ///
    /// The callback runs on a spawned task, so this must be called from
    /// within a tokio runtime. Dropping the returned [`Subscription`]
    /// unsubscribes.
    pub fn subscribe<F>(&self, mut f: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.rx.clone();
        let task = tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            f(initial);
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                f(value);
            }
        });
        Subscription { task }
    }
}

/// Handle for a callback registered with [`Readable::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering changes.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
