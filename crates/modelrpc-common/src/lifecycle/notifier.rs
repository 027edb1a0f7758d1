//! Per-component observer registry for status changes.
//!
//! Each observer owns an unbounded queue and a single consumer, so a slow
//! observer never blocks a transition or another observer, and every observer
//! receives events in the order the transitions happened.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use super::StatusChangeEvent;

/// Boxed observer callback, as accepted by [`Component::on_status_change`].
///
/// [`Component::on_status_change`]: super::Component::on_status_change
pub type StatusCallback = Box<dyn Fn(StatusChangeEvent) + Send + Sync + 'static>;

/// Holds the observers of one lifecycle component.
#[derive(Default)]
pub struct StatusNotifier {
    observers: Mutex<Vec<mpsc::UnboundedSender<StatusChangeEvent>>>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer queue and returns its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Registers a callback driven by its own delivery worker.
    ///
    /// The worker is a tokio task when called inside a runtime and a plain
    /// thread otherwise. It exits once the notifier is dropped.
    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(StatusChangeEvent) + Send + Sync + 'static,
    {
        let mut rx = self.subscribe();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        callback(event);
                    }
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    while let Some(event) = rx.blocking_recv() {
                        callback(event);
                    }
                });
            }
        }
    }

    /// Queues `event` for every live observer.
    ///
    /// The observer list is copied before sending; observers whose receiver
    /// is gone are pruned.
    pub fn notify(&self, event: &StatusChangeEvent) {
        let snapshot = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut saw_closed = false;
        for observer in &snapshot {
            if observer.send(event.clone()).is_err() {
                saw_closed = true;
            }
        }

        if saw_closed {
            self.observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|tx| !tx.is_closed());
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
