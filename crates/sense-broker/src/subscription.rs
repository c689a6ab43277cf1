// src/subscription.rs

//! A typed handle to a live pub/sub subscription.
//!
//! Dropping the handle drops the underlying forwarding task's sender, which
//! unwinds the task and releases its sibling connection — this is how
//! `unsubscribe` is realized without a separate explicit call.

use tokio::sync::mpsc;

pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Waits for the next message. Returns `None` once the publisher side
    /// (or the broker connection backing it) has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
