#![forbid(unsafe_code)]

//! Cancellation handles for subscriptions.
//!
//! A token pairs a [`SubscriptionId`] with a **non-owning** back-reference to
//! the container that issued it. Holding a token never keeps a container
//! alive; once the container is gone, the token is inert.
//!
//! # State machine
//!
//! ```text
//! Active --cancel()--> Cancelled
//! Cancelled --cancel()--> Cancelled
//! ```
//!
//! # Invariants
//!
//! 1. `cancel()` removes at most one registry entry, over the token's whole
//!    lifetime.
//! 2. `cancel()` never panics: not when repeated, not after the container has
//!    been dropped, not from inside a notification callback.
//! 3. Dropping a bare token does **not** cancel. Use [`SubscriptionGuard`] or
//!    [`TokenBag`] for scope-bound subscriptions.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::id::SubscriptionId;
use crate::registry::Registry;

/// Back-reference interface implemented by every container.
pub(crate) trait Unsubscribe {
    /// Remove `id`; returns whether an entry was removed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Whether `id` is still registered.
    fn is_subscribed(&self, id: SubscriptionId) -> bool;
}

impl<C> Unsubscribe for RefCell<Registry<C>> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // Dropping the removed entry happens after the borrow is released,
        // in case its destructor touches this registry again.
        let removed = self.borrow_mut().remove(id);
        removed.is_some()
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.borrow().contains(id)
    }
}

/// Lifecycle of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// The subscription is registered and will receive updates.
    Active,
    /// Terminal: cancelled explicitly, or the container/entry is gone.
    Cancelled,
}

/// Common interface of the token flavours, used by [`SubscriptionGuard`]
/// and [`TokenBag`].
pub trait Cancellable {
    /// Id this token was issued for.
    fn id(&self) -> SubscriptionId;

    /// Idempotently remove the subscription.
    fn cancel(&self);

    /// Current lifecycle state.
    fn state(&self) -> TokenState;

    /// Shorthand for `state() == TokenState::Active`.
    fn is_active(&self) -> bool {
        self.state() == TokenState::Active
    }
}

// ---------------------------------------------------------------------------
// SubscriptionToken (single-threaded)
// ---------------------------------------------------------------------------

/// Cancellation handle for a subscription on an
/// [`ObservableValue`](crate::ObservableValue).
///
/// Not `Send`: the container it points at is single-threaded.
#[must_use = "dropping a token leaves the subscription registered with no way to cancel it"]
pub struct SubscriptionToken {
    id: SubscriptionId,
    target: Weak<dyn Unsubscribe>,
    cancelled: Cell<bool>,
}

impl SubscriptionToken {
    pub(crate) fn new(id: SubscriptionId, target: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            target,
            cancelled: Cell::new(false),
        }
    }

    /// Id this token was issued for.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription if it is still registered.
    ///
    /// Safe to call any number of times, and after the container has been
    /// dropped.
    pub fn cancel(&self) {
        self.cancel_and_report();
    }

    /// Like [`cancel`](Self::cancel), but returns `true` only if this call
    /// actually removed the entry.
    pub fn cancel_and_report(&self) -> bool {
        if self.cancelled.replace(true) {
            return false;
        }
        let removed = self
            .target
            .upgrade()
            .is_some_and(|target| target.unsubscribe(self.id));
        tracing::trace!(id = %self.id, removed, "subscription cancelled");
        removed
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        if self.cancelled.get() {
            return TokenState::Cancelled;
        }
        match self.target.upgrade() {
            Some(target) if target.is_subscribed(self.id) => TokenState::Active,
            _ => TokenState::Cancelled,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TokenState::Active
    }

    /// Convert into a guard that cancels when dropped.
    pub fn into_guard(self) -> SubscriptionGuard<Self> {
        SubscriptionGuard::new(self)
    }
}

impl Cancellable for SubscriptionToken {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn cancel(&self) {
        SubscriptionToken::cancel(self);
    }

    fn state(&self) -> TokenState {
        SubscriptionToken::state(self)
    }
}

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SharedSubscriptionToken (thread-safe)
// ---------------------------------------------------------------------------

/// Cancellation handle for a subscription on a
/// [`SharedObservableValue`](crate::SharedObservableValue).
///
/// `Send + Sync`: may be cancelled from any thread, concurrently.
#[must_use = "dropping a token leaves the subscription registered with no way to cancel it"]
pub struct SharedSubscriptionToken {
    id: SubscriptionId,
    target: std::sync::Weak<dyn Unsubscribe + Send + Sync>,
    cancelled: AtomicBool,
}

impl SharedSubscriptionToken {
    pub(crate) fn new(
        id: SubscriptionId,
        target: std::sync::Weak<dyn Unsubscribe + Send + Sync>,
    ) -> Self {
        Self {
            id,
            target,
            cancelled: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription if it is still registered. Idempotent, and
    /// only the first of several racing calls performs the removal.
    pub fn cancel(&self) {
        self.cancel_and_report();
    }

    /// Returns `true` only for the call that removed the entry.
    pub fn cancel_and_report(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let removed = self
            .target
            .upgrade()
            .is_some_and(|target| target.unsubscribe(self.id));
        tracing::trace!(id = %self.id, removed, "shared subscription cancelled");
        removed
    }

    #[must_use]
    pub fn state(&self) -> TokenState {
        if self.cancelled.load(Ordering::Acquire) {
            return TokenState::Cancelled;
        }
        match self.target.upgrade() {
            Some(target) if target.is_subscribed(self.id) => TokenState::Active,
            _ => TokenState::Cancelled,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TokenState::Active
    }

    pub fn into_guard(self) -> SubscriptionGuard<Self> {
        SubscriptionGuard::new(self)
    }
}

impl Cancellable for SharedSubscriptionToken {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn cancel(&self) {
        SharedSubscriptionToken::cancel(self);
    }

    fn state(&self) -> TokenState {
        SharedSubscriptionToken::state(self)
    }
}

impl fmt::Debug for SharedSubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSubscriptionToken")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// RAII wrapper that cancels its token on drop.
#[must_use = "dropping the guard cancels the subscription immediately"]
pub struct SubscriptionGuard<K: Cancellable> {
    token: Option<K>,
}

impl<K: Cancellable> SubscriptionGuard<K> {
    fn new(token: K) -> Self {
        Self { token: Some(token) }
    }

    /// Borrow the wrapped token.
    #[must_use]
    pub fn token(&self) -> Option<&K> {
        self.token.as_ref()
    }

    /// Give the token back without cancelling it.
    #[must_use]
    pub fn release(mut self) -> Option<K> {
        self.token.take()
    }
}

impl<K: Cancellable> Drop for SubscriptionGuard<K> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

impl<K: Cancellable> fmt::Debug for SubscriptionGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.token.as_ref().map(Cancellable::id))
            .finish()
    }
}

/// A set of tokens cancelled together, explicitly or on drop.
///
/// Handy for an owner that subscribes to several containers and wants all of
/// them torn down with itself.
#[derive(Default)]
pub struct TokenBag {
    tokens: Vec<Box<dyn Cancellable>>,
}

impl TokenBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `token`.
    pub fn push(&mut self, token: impl Cancellable + 'static) {
        self.tokens.push(Box::new(token));
    }

    /// Number of tokens held (cancelled or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Cancel and discard every token.
    pub fn cancel_all(&mut self) {
        for token in self.tokens.drain(..) {
            token.cancel();
        }
    }
}

impl Extend<SubscriptionToken> for TokenBag {
    fn extend<I: IntoIterator<Item = SubscriptionToken>>(&mut self, iter: I) {
        for token in iter {
            self.push(token);
        }
    }
}

impl Drop for TokenBag {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl fmt::Debug for TokenBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBag")
            .field("len", &self.tokens.len())
            .finish()
    }
}
