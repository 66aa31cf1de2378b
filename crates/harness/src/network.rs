//! In-flight request tracking and network idle detection

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::page::PageEvent;

/// Default quiet window before the network counts as idle
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// What "idle" means
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdleMode {
    /// No request in flight for the whole quiet window
    #[default]
    #[serde(rename = "network-idle-0")]
    NetworkIdle0,

    /// At most two requests in flight, tolerating long-lived connections
    #[serde(rename = "network-idle-2")]
    NetworkIdle2,
}

impl IdleMode {
    pub fn max_in_flight(&self) -> usize {
        match self {
            IdleMode::NetworkIdle0 => 0,
            IdleMode::NetworkIdle2 => 2,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            IdleMode::NetworkIdle0 => "network-idle-0",
            IdleMode::NetworkIdle2 => "network-idle-2",
        }
    }
}

impl fmt::Display for IdleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network-idle-0" => Ok(IdleMode::NetworkIdle0),
            "network-idle-2" => Ok(IdleMode::NetworkIdle2),
            other => Err(HarnessError::InvalidConfig(format!("unknown idle mode: {}", other))),
        }
    }
}

/// Counts in-flight requests on a page from the moment it is attached
pub struct NetworkActivityMonitor {
    in_flight: watch::Receiver<usize>,
    quiet_window: Duration,
    tracker: JoinHandle<()>,
}

impl NetworkActivityMonitor {
    /// Start tracking. Must be called inside a tokio runtime.
    pub fn attach(events: broadcast::Receiver<PageEvent>, quiet_window: Duration) -> Self {
        let (tx, rx) = watch::channel(0);
        let tracker = tokio::spawn(track_requests(events, tx));

        Self {
            in_flight: rx,
            quiet_window,
            tracker,
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Resolve once the in-flight count stays within `mode` for the quiet window
    ///
    /// Any change in activity restarts the window. A request that starts right
    /// after the window closed is not seen, so callers pair this with an explicit
    /// UI-state wait when one action fires several requests in sequence.
    pub async fn wait_for_idle(&self, mode: IdleMode, timeout: Duration) -> HarnessResult<()> {
        let mut rx = self.in_flight.clone();
        let max = mode.max_in_flight();
        let quiet = self.quiet_window;

        let settle = async move {
            loop {
                let count = *rx.borrow_and_update();
                if count <= max {
                    tokio::select! {
                        _ = sleep(quiet) => return Ok(()),
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // Page gone while quiet: nothing else can start.
                                sleep(quiet).await;
                                return Ok(());
                            }
                        }
                    }
                } else {
                    trace!(in_flight = count, max, "waiting for requests to settle");
                    if rx.changed().await.is_err() {
                        return Err(HarnessError::EventStreamClosed(mode.to_string()));
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, settle).await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(%mode, "network idle");
                }
                result
            }
            Err(_) => Err(HarnessError::timeout(mode.to_string(), timeout)),
        }
    }
}

impl Drop for NetworkActivityMonitor {
    fn drop(&mut self) {
        self.tracker.abort();
    }
}

async fn track_requests(mut events: broadcast::Receiver<PageEvent>, in_flight: watch::Sender<usize>) {
    let mut pending: HashSet<String> = HashSet::new();

    loop {
        match events.recv().await {
            Ok(PageEvent::RequestStarted { request_id, method, url }) => {
                trace!(%request_id, %method, %url, "request started");
                pending.insert(request_id);
            }
            Ok(PageEvent::RequestFinished { request_id }) => {
                pending.remove(&request_id);
            }
            Ok(PageEvent::RequestFailed { request_id, reason }) => {
                debug!(%request_id, %reason, "request failed");
                pending.remove(&request_id);
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "network monitor fell behind page events");
                continue;
            }
            Err(RecvError::Closed) => break,
        }

        let count = pending.len();
        in_flight.send_if_modified(|current| {
            if *current != count {
                *current = count;
                true
            } else {
                false
            }
        });
    }
}
