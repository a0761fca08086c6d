use tokio::sync::watch;

/// A single published value with latest-value-wins fan-out.
///
/// Writes to one cell are serialised by the underlying channel and never wait
/// for subscribers. Slow subscribers only ever see the newest value.
#[derive(Debug)]
pub struct StateCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Runs `modify` under the cell's write lock. Subscribers are only woken
    /// when `modify` reports that it changed the value.
    pub fn update(&self, modify: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(modify)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            primed: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Default> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq> StateCell<T> {
    /// Replaces the value, publishing only if it differs from the current one.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }
}

/// Conflated view of a [`StateCell`]. Closes once the cell is dropped.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
    primed: bool,
}

impl<T: Clone> Subscription<T> {
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Yields the current value first, then each newer value as it is
    /// published. Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<T> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Non-suspending variant of [`Subscription::next`] for polling callers.
    pub fn try_next(&mut self) -> Option<T> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}
