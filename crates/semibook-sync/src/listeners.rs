//! Subscription and callback layer
//!
//! Two kinds of listeners observe a semibook's mutation events:
//!
//! - **Persistent** listeners ([`Listeners::subscribe`]) run synchronously on
//!   every event until unsubscribed. Keep them fast; they run on the task that
//!   applies logs.
//! - **One-shot** subscriptions ([`Listeners::once`]) evaluate an async
//!   predicate against each event and resolve with the first accepted one.
//!
//! # One-shot State Machine
//!
//! ```text
//! Pending → Evaluating → Pending   (predicate rejected)
//!                      → Fired     (predicate accepted)
//! Pending/Evaluating   → Discarded (handle dropped or semibook disconnected)
//! ```
//!
//! Each subscription owns a task fed through a channel, so events are evaluated
//! one at a time and never twice. On acceptance the subscription removes itself
//! from the registry before the event is delivered to the handle.

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use semibook_cache::SemibookEvent;
use semibook_types::{Address, EventKind, OfferId, SemibookError, SemibookResult};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Identifier returned by [`Listeners::subscribe`]
pub type ListenerId = u64;

/// Persistent event callback
pub type EventCallback = Arc<dyn Fn(&SemibookEvent) + Send + Sync>;

/// Async predicate used by one-shot subscriptions
pub type EventPredicate = Arc<dyn Fn(&SemibookEvent) -> BoxFuture<'static, bool> + Send + Sync>;

// ============================================================================
// Filtering
// ============================================================================

/// Event filter for listeners
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Filter by event kind (None = all kinds)
    pub kinds: Option<HashSet<EventKind>>,
    /// Filter by offer id (None = all offers)
    pub offer_ids: Option<HashSet<OfferId>>,
    /// Filter by maker (None = all makers)
    pub makers: Option<HashSet<Address>>,
}

impl EventFilter {
    /// Create a filter that allows all events
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific event kinds only
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Create a filter for specific offers only
    pub fn offers(ids: impl IntoIterator<Item = OfferId>) -> Self {
        Self {
            offer_ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Create a filter for removals only (fills and retracts)
    pub fn removals() -> Self {
        Self::kinds(EventKind::ALL.into_iter().filter(|k| k.is_removal()))
    }

    /// Add an event kind
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    /// Add an offer id
    pub fn with_offer(mut self, id: OfferId) -> Self {
        self.offer_ids.get_or_insert_with(HashSet::new).insert(id);
        self
    }

    /// Add a maker
    pub fn with_maker(mut self, maker: impl Into<Address>) -> Self {
        self.makers.get_or_insert_with(HashSet::new).insert(maker.into());
        self
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &SemibookEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(ids) = &self.offer_ids {
            match event.offer_id {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(makers) = &self.makers {
            match &event.offer {
                Some(offer) if makers.contains(&offer.maker) => {}
                _ => return false,
            }
        }
        true
    }
}

// ============================================================================
// One-shot Subscriptions
// ============================================================================

/// State of a one-shot subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceState {
    /// Waiting for the next event
    Pending,
    /// Predicate running on an event
    Evaluating,
    /// An event was accepted and delivered
    Fired,
    /// Cancelled before any event was accepted
    Discarded,
}

impl OnceState {
    /// Check if the subscription can no longer fire
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fired | Self::Discarded)
    }
}

/// Handle to a one-shot subscription
///
/// Resolves with the first accepted event. Dropping the handle discards the
/// subscription. Resolves to [`SemibookError::Disconnected`] if the
/// subscription is discarded by its semibook.
pub struct OnceHandle {
    id: ListenerId,
    state: Arc<Mutex<OnceState>>,
    result: oneshot::Receiver<SemibookEvent>,
    registry: Weak<Registry>,
}

impl OnceHandle {
    /// Subscription id
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> OnceState {
        *self.state.lock()
    }

    /// Discard the subscription
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Future for OnceHandle {
    type Output = SemibookResult<SemibookEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|r| r.map_err(|_| SemibookError::Disconnected))
    }
}

impl Drop for OnceHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_once(self.id);
        }
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = OnceState::Discarded;
        }
    }
}

impl fmt::Debug for OnceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

struct OnceSlot {
    id: ListenerId,
    events: mpsc::UnboundedSender<SemibookEvent>,
}

struct PersistentListener {
    id: ListenerId,
    filter: Option<EventFilter>,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    persistent: RwLock<Vec<PersistentListener>>,
    once: RwLock<Vec<OnceSlot>>,
}

impl Registry {
    fn next_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remove_once(&self, id: ListenerId) -> bool {
        let mut once = self.once.write();
        let before = once.len();
        once.retain(|slot| slot.id != id);
        once.len() != before
    }
}

// ============================================================================
// Listener Registry
// ============================================================================

/// Listener registry owned by one semibook
#[derive(Clone, Default)]
pub struct Listeners {
    registry: Arc<Registry>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("persistent", &self.persistent_count())
            .field("once", &self.once_count())
            .finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every event
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SemibookEvent) + Send + Sync + 'static,
    {
        self.add_persistent(None, Arc::new(callback))
    }

    /// Register a callback for events passing `filter`
    pub fn subscribe_filtered<F>(&self, filter: EventFilter, callback: F) -> ListenerId
    where
        F: Fn(&SemibookEvent) + Send + Sync + 'static,
    {
        self.add_persistent(Some(filter), Arc::new(callback))
    }

    fn add_persistent(&self, filter: Option<EventFilter>, callback: EventCallback) -> ListenerId {
        let id = self.registry.next_id();
        self.registry.persistent.write().push(PersistentListener {
            id,
            filter,
            callback,
        });
        debug!(id, "listener subscribed");
        id
    }

    /// Remove a persistent listener or one-shot subscription
    ///
    /// Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut persistent = self.registry.persistent.write();
        let before = persistent.len();
        persistent.retain(|l| l.id != id);
        let removed = persistent.len() != before;
        drop(persistent);

        removed || self.registry.remove_once(id)
    }

    /// Wait for the first event accepted by an async predicate
    ///
    /// Must be called within a tokio runtime.
    pub fn once<F, Fut>(&self, predicate: F) -> OnceHandle
    where
        F: Fn(&SemibookEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let predicate: EventPredicate = Arc::new(move |event: &SemibookEvent| predicate(event).boxed());
        self.add_once(predicate)
    }

    /// Wait for the first event passing `filter`
    ///
    /// Must be called within a tokio runtime.
    pub fn once_matching(&self, filter: EventFilter) -> OnceHandle {
        let predicate: EventPredicate =
            Arc::new(move |event: &SemibookEvent| future::ready(filter.matches(event)).boxed());
        self.add_once(predicate)
    }

    fn add_once(&self, predicate: EventPredicate) -> OnceHandle {
        let id = self.registry.next_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(OnceState::Pending));

        self.registry.once.write().push(OnceSlot {
            id,
            events: events_tx,
        });

        tokio::spawn(run_once(
            id,
            predicate,
            events_rx,
            result_tx,
            state.clone(),
            Arc::downgrade(&self.registry),
        ));

        OnceHandle {
            id,
            state,
            result: result_rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every listener
    pub fn dispatch(&self, event: &SemibookEvent) {
        // Snapshot under the lock so callbacks may (un)subscribe
        let callbacks: Vec<EventCallback> = self
            .registry
            .persistent
            .read()
            .iter()
            .filter(|l| l.filter.as_ref().map_or(true, |f| f.matches(event)))
            .map(|l| l.callback.clone())
            .collect();

        for callback in callbacks {
            callback(event);
        }

        self.registry
            .once
            .write()
            .retain(|slot| slot.events.send(event.clone()).is_ok());
    }

    /// Discard every listener (semibook disconnected)
    pub fn clear(&self) {
        self.registry.persistent.write().clear();
        self.registry.once.write().clear();
    }

    /// Number of persistent listeners
    pub fn persistent_count(&self) -> usize {
        self.registry.persistent.read().len()
    }

    /// Number of live one-shot subscriptions
    pub fn once_count(&self) -> usize {
        self.registry.once.read().len()
    }
}

async fn run_once(
    id: ListenerId,
    predicate: EventPredicate,
    mut events: mpsc::UnboundedReceiver<SemibookEvent>,
    result: oneshot::Sender<SemibookEvent>,
    state: Arc<Mutex<OnceState>>,
    registry: Weak<Registry>,
) {
    while let Some(event) = events.recv().await {
        {
            let mut state = state.lock();
            if state.is_terminal() {
                return;
            }
            *state = OnceState::Evaluating;
        }

        if predicate(&event).await {
            if let Some(registry) = registry.upgrade() {
                registry.remove_once(id);
            }
            *state.lock() = OnceState::Fired;
            trace!(id, kind = %event.kind, "once subscription fired");
            let _ = result.send(event);
            return;
        }

        let mut state = state.lock();
        if state.is_terminal() {
            return;
        }
        *state = OnceState::Pending;
    }

    let mut state = state.lock();
    if !state.is_terminal() {
        *state = OnceState::Discarded;
    }
}
