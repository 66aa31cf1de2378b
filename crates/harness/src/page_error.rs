//! Uncaught page errors for the current scenario iteration

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::page::PageEvent;

/// Single-slot record of the first uncaught error seen on the page
///
/// Written by a [`PageErrorObserver`], read by the scenario. Cleared only by an
/// explicit [`PageErrorRecord::reset`] at the start of an iteration.
#[derive(Debug, Clone, Default)]
pub struct PageErrorRecord {
    slot: Arc<Mutex<Option<String>>>,
}

impl PageErrorRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message` unless an earlier error is already held
    pub fn record(&self, message: impl Into<String>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }

    pub fn get(&self) -> Option<String> {
        self.slot.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Clear the slot, returning what it held
    pub fn reset(&self) -> Option<String> {
        self.slot.lock().take()
    }
}

/// Copies `PageError` events into a [`PageErrorRecord`] until dropped
pub struct PageErrorObserver {
    task: JoinHandle<()>,
}

impl PageErrorObserver {
    /// Must be called inside a tokio runtime.
    pub fn attach(events: broadcast::Receiver<PageEvent>, record: PageErrorRecord) -> Self {
        Self {
            task: tokio::spawn(observe(events, record)),
        }
    }
}

impl Drop for PageErrorObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn observe(mut events: broadcast::Receiver<PageEvent>, record: PageErrorRecord) {
    loop {
        match events.recv().await {
            Ok(PageEvent::PageError(message)) => {
                error!(%message, "uncaught page error");
                record.record(message);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "page error observer fell behind page events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_error_is_kept() {
        let record = PageErrorRecord::new();
        record.record("TypeError: x is undefined");
        record.record("ReferenceError: y is not defined");
        assert_eq!(record.get().as_deref(), Some("TypeError: x is undefined"));
    }

    #[test]
    fn test_reset_clears_and_returns() {
        let record = PageErrorRecord::new();
        record.record("boom");
        assert_eq!(record.reset().as_deref(), Some("boom"));
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn test_observer_records_page_errors() {
        let (tx, rx) = broadcast::channel(16);
        let record = PageErrorRecord::new();
        let _observer = PageErrorObserver::attach(rx, record.clone());

        tx.send(PageEvent::RequestFinished {
            request_id: "1".to_string(),
        })
        .unwrap();
        tx.send(PageEvent::PageError("TypeError: x is undefined".to_string()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(record.get().as_deref(), Some("TypeError: x is undefined"));
    }
}
