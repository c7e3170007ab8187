//! Event hub for "unit of work executed" notifications
//!
//! Subscribers register globally, by exact operation name, or by a regex
//! over the derived event name `tool.<operation>.executed`. Emission only
//! queues the event; a single dispatcher task delivers it to subscribers in
//! subscription order, so a slow or panicking subscriber never stalls or
//! breaks the emitter.

use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use strata_core::fail_open::fail_open_call;
use strata_core::{Result, StrataError, ToolEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Callback = Arc<dyn Fn(&ToolEvent) + Send + Sync>;

enum Filter {
    All,
    Name(String),
    Pattern(Regex),
}

impl Filter {
    fn matches(&self, event: &ToolEvent) -> bool {
        match self {
            Self::All => true,
            Self::Name(name) => event.operation_name == *name,
            Self::Pattern(re) => re.is_match(&event.event_name()),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: Filter,
    callback: Callback,
}

#[derive(Default)]
struct HubInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn add(&self, filter: Filter, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                id,
                filter,
                callback,
            });
        id
    }

    fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.id != id);
    }

    /// Deliver to subscribers registered at dispatch time
    fn dispatch(&self, event: &ToolEvent) {
        let targets: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.filter.matches(event))
            .map(|s| s.callback.clone())
            .collect();

        trace!(
            "Dispatching {} to {} subscriber(s)",
            event.event_name(),
            targets.len()
        );

        for callback in targets {
            fail_open_call("event_subscriber", || callback(event));
        }
    }
}

/// Handle returned by every `subscribe*` call
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to stop delivery.
pub struct Subscription {
    id: u64,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// Stop delivering events to this subscription's callback
    ///
    /// Idempotent; events queued but not yet dispatched are not delivered.
    pub fn unsubscribe(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

/// Publish/subscribe channel for [`ToolEvent`]s
///
/// Constructed explicitly and shared via `Arc`; each test or orchestrator run
/// can own an isolated hub. When created inside a Tokio runtime, delivery
/// happens on a background dispatcher task. Outside a runtime, subscribers
/// run inline on the emitting thread.
pub struct EventHub {
    inner: Arc<HubInner>,
    queue: Option<mpsc::UnboundedSender<ToolEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        let inner = Arc::new(HubInner::default());

        let queue = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<ToolEvent>();
                let dispatcher = inner.clone();
                handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        dispatcher.dispatch(&event);
                    }
                });
                Some(tx)
            }
            Err(_) => {
                debug!("No Tokio runtime; event hub dispatches inline");
                None
            }
        };

        Self { inner, queue }
    }

    /// Publish an event without waiting for subscribers
    pub fn emit(&self, event: ToolEvent) {
        match &self.queue {
            Some(tx) => {
                if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                    // Dispatcher is gone (runtime shut down)
                    self.inner.dispatch(&event);
                }
            }
            None => self.inner.dispatch(&event),
        }
    }

    /// Receive every event
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.register(Filter::All, Arc::new(callback))
    }

    /// Receive events whose operation name equals `name`
    pub fn subscribe_by_name<F>(&self, name: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.register(Filter::Name(name.into()), Arc::new(callback))
    }

    /// Receive events whose `tool.<operation>.executed` name matches `pattern`
    pub fn subscribe_by_pattern<F>(&self, pattern: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        let re = Regex::new(pattern).map_err(|e| {
            StrataError::InvalidInput(format!("invalid event pattern {:?}: {}", pattern, e))
        })?;
        Ok(self.register(Filter::Pattern(re), Arc::new(callback)))
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn register(&self, filter: Filter, callback: Callback) -> Subscription {
        let id = self.inner.add(filter, callback);
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
