//! Synchronous publish/subscribe bus.
//!
//! # Dispatch rules
//!
//! - Listeners run in subscription order on the publisher's thread.
//! - `publish` copies the listener list before dispatching, so a listener
//!   may subscribe or unsubscribe anyone (itself included) from inside its
//!   callback.  Changes apply to the *next* publish.
//! - A listener that returns `Err` or panics is logged and skipped; the
//!   remaining listeners still run and nothing propagates to the publisher.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{error, trace, warn};

use super::{Event, EventKind};

/// Error a listener may return.  It is logged by the bus and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered event consumer.
///
/// Implementations must be cheap: they run inline on the connection task
/// that produced the event.
#[cfg_attr(test, mockall::automock)]
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError>;
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Adapts a closure into a [`Listener`].
///
/// # Examples
///
/// ```rust
/// use votifier_core::{listener_fn, EventBus};
///
/// let bus = EventBus::new();
/// bus.subscribe(listener_fn(|event| {
///     println!("{:?}", event.kind());
///     Ok(())
/// }));
/// assert_eq!(bus.len(), 1);
/// ```
pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

struct FnListener<F>(F);

impl<F> Listener for FnListener<F>
where
    F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        (self.0)(event)
    }
}

/// Fires the wrapped listener on the first matching event, then removes
/// itself from the bus.
struct OnceListener {
    id: ListenerId,
    filter: EventKind,
    fired: AtomicBool,
    bus: Weak<EventBus>,
    inner: Arc<dyn Listener>,
}

impl Listener for OnceListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        if event.kind() != self.filter {
            return Ok(());
        }
        // Two publishers may both hold a snapshot containing us.
        if self.fired.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
        self.inner.on_event(event)
    }
}

// ── EventBus ──────────────────────────────────────────────────────────────────

/// Ordered list of listeners with synchronous dispatch.
///
/// Shared as `Arc<EventBus>` between the server, its connection handlers,
/// and the operator facade.
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn Listener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends `listener` to the dispatch list.
    pub fn subscribe(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = self.allocate_id();
        self.lock().push((id, listener));
        trace!("listener {id} subscribed");
        id
    }

    /// Subscribes `listener` for the first event of kind `filter` only.
    ///
    /// The listener fires at most once even when several threads publish
    /// matching events concurrently, and is unsubscribed before it runs.
    pub fn subscribe_once(
        self: &Arc<Self>,
        filter: EventKind,
        listener: Arc<dyn Listener>,
    ) -> ListenerId {
        let id = self.allocate_id();
        let once = OnceListener {
            id,
            filter,
            fired: AtomicBool::new(false),
            bus: Arc::downgrade(self),
            inner: listener,
        };
        self.lock().push((id, Arc::new(once)));
        trace!("one-shot listener {id} subscribed for {filter}");
        id
    }

    /// Removes the listener registered under `id`.
    ///
    /// Returns `false` if it was not subscribed; that is not an error.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if removed {
            trace!("listener {id} unsubscribed");
        }
        removed
    }

    /// Delivers `event` to every listener subscribed at the time of the call.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<(ListenerId, Arc<dyn Listener>)> = self
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("listener {id} failed to handle {}: {e}", event.kind());
                }
                Err(payload) => {
                    error!(
                        "listener {id} panicked while handling {}: {}",
                        event.kind(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn Listener>)>> {
        // Listeners never run under this lock, so a poisoned list is intact.
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
