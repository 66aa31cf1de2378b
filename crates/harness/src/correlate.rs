//! Correlating a user action with the network response it produces
//!
//! Waiters are armed before the triggering action runs. Each response is
//! handed to the first armed waiter (in arm order) whose matcher accepts it,
//! so one response never satisfies two waiters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::page::{NetworkResponse, PageEvent};

/// Selects responses by URL fragment, method and status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatcher {
    url_part: String,
    encoded_url_part: String,
    method: String,
    status: Option<u16>,
}

impl ResponseMatcher {
    /// Match `method` requests whose URL contains `url_part`, with status 200
    pub fn new(url_part: impl Into<String>, method: impl Into<String>) -> Self {
        let url_part = url_part.into();
        // The REST route may travel as `?rest_route=%2Fwp%2Fv2%2F...`
        let encoded_url_part = urlencoding::encode(&url_part).into_owned();
        Self {
            url_part,
            encoded_url_part,
            method: method.into().to_ascii_uppercase(),
            status: Some(200),
        }
    }

    pub fn get(url_part: impl Into<String>) -> Self {
        Self::new(url_part, "GET")
    }

    pub fn post(url_part: impl Into<String>) -> Self {
        Self::new(url_part, "POST")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn any_status(mut self) -> Self {
        self.status = None;
        self
    }

    pub fn url_part(&self) -> &str {
        &self.url_part
    }

    pub fn matches(&self, response: &NetworkResponse) -> bool {
        if response.method.eq_ignore_ascii_case("OPTIONS") {
            return false;
        }
        if !response.method.eq_ignore_ascii_case(&self.method) {
            return false;
        }
        if let Some(status) = self.status {
            if response.status != status {
                return false;
            }
        }
        response.url.contains(&self.url_part) || response.url.contains(&self.encoded_url_part)
    }

    fn describe(&self) -> String {
        format!("{} {} response", self.method, self.url_part)
    }
}

struct Waiter {
    id: u64,
    matcher: ResponseMatcher,
    tx: oneshot::Sender<NetworkResponse>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    waiters: Vec<Waiter>,
    closed: bool,
}

/// Routes page responses to armed waiters
pub struct ResponseCorrelator {
    registry: Arc<Mutex<Registry>>,
    dispatcher: JoinHandle<()>,
}

impl ResponseCorrelator {
    /// Start routing responses from `events`. Must be called inside a tokio runtime.
    pub fn attach(events: broadcast::Receiver<PageEvent>) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let dispatcher = tokio::spawn(dispatch(events, registry.clone()));
        Self { registry, dispatcher }
    }

    /// Register interest in the next response accepted by `matcher`
    ///
    /// Call this before triggering the action, otherwise the response may be missed.
    pub fn arm(&self, matcher: ResponseMatcher) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let what = matcher.describe();
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        if registry.closed {
            // Dropping tx makes wait() report the closed stream.
            drop(tx);
        } else {
            trace!(id, %what, "armed response waiter");
            registry.waiters.push(Waiter { id, matcher, tx });
        }

        PendingResponse {
            id,
            what,
            rx,
            registry: self.registry.clone(),
        }
    }

    /// Arm, run `trigger`, then wait for the matching response
    pub async fn await_response<F, Fut>(
        &self,
        matcher: ResponseMatcher,
        timeout: Duration,
        trigger: F,
    ) -> HarnessResult<NetworkResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let pending = self.arm(matcher);
        trigger().await?;
        pending.wait(timeout).await
    }

    /// Number of waiters still registered
    pub fn armed(&self) -> usize {
        self.registry.lock().waiters.len()
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// A waiter registered with [`ResponseCorrelator::arm`]
///
/// Dropping it deregisters the waiter.
pub struct PendingResponse {
    id: u64,
    what: String,
    rx: oneshot::Receiver<NetworkResponse>,
    registry: Arc<Mutex<Registry>>,
}

impl PendingResponse {
    pub async fn wait(mut self, timeout: Duration) -> HarnessResult<NetworkResponse> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HarnessError::EventStreamClosed(self.what.clone())),
            Err(_) => Err(HarnessError::timeout(self.what.clone(), timeout)),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let id = self.id;
        self.registry.lock().waiters.retain(|w| w.id != id);
    }
}

async fn dispatch(mut events: broadcast::Receiver<PageEvent>, registry: Arc<Mutex<Registry>>) {
    loop {
        match events.recv().await {
            Ok(PageEvent::Response(response)) => deliver(&registry, response),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "response correlator fell behind page events");
            }
            Err(RecvError::Closed) => break,
        }
    }

    let mut registry = registry.lock();
    registry.closed = true;
    registry.waiters.clear();
}

fn deliver(registry: &Mutex<Registry>, response: NetworkResponse) {
    let mut registry = registry.lock();
    registry.waiters.retain(|w| !w.tx.is_closed());

    let Some(pos) = registry
        .waiters
        .iter()
        .position(|w| w.matcher.matches(&response))
    else {
        return;
    };

    let waiter = registry.waiters.remove(pos);
    debug!(
        id = waiter.id,
        url = %response.url,
        status = response.status,
        "response matched"
    );
    let _ = waiter.tx.send(response);
}
