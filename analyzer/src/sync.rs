// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::types::AnalysisError;

type CompletionValue<T> = Option<Result<T, AnalysisError>>;

///
/// A completion handle for one analysis round of an entry.
///
/// Each generation is one-shot: it is completed at most once, with a value or an error.
/// `reset` installs a fresh generation; a waiter parked on a superseded generation silently
/// moves to the new one, so `wait` always resolves with the round that actually completes.
///
pub struct CompletionCell<T: Clone> {
    sender: Mutex<watch::Sender<CompletionValue<T>>>,
}

impl<T: Clone> CompletionCell<T> {
    pub fn new() -> CompletionCell<T> {
        let (sender, _) = watch::channel(None);
        CompletionCell {
            sender: Mutex::new(sender),
        }
    }

    ///
    /// Discards the current generation. Outstanding waiters move to the new one.
    ///
    pub fn reset(&self) {
        let (sender, _) = watch::channel(None);
        *self.sender.lock() = sender;
    }

    ///
    /// Completes the current generation, unless it has already completed. Returns whether this
    /// call won.
    ///
    pub fn complete(&self, result: Result<T, AnalysisError>) -> bool {
        let sender = self.sender.lock();
        if sender.borrow().is_some() {
            return false;
        }
        let _ = sender.send(Some(result));
        true
    }

    pub async fn wait(&self) -> Result<T, AnalysisError> {
        loop {
            let mut receiver = self.sender.lock().subscribe();
            loop {
                if let Some(result) = receiver.borrow_and_update().clone() {
                    return result;
                }
                if receiver.changed().await.is_err() {
                    // This generation was reset: move to its successor.
                    break;
                }
            }
        }
    }
}

///
/// A resettable condition: `wait` resolves while the event is set, and callers that arrive
/// while it is unset park until the next `set`.
///
pub struct StateEvent {
    sender: watch::Sender<bool>,
}

impl StateEvent {
    pub fn new(set: bool) -> StateEvent {
        let (sender, _) = watch::channel(set);
        StateEvent { sender }
    }

    pub fn set(&self) {
        self.sender.send_replace(true);
    }

    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only resolves by observing `true`.
        let _ = receiver.wait_for(|set| *set).await;
    }
}

///
/// A one-way cancellation flag, observed cooperatively between nodes.
///
#[derive(Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
