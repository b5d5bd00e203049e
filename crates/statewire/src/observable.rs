#![forbid(unsafe_code)]

//! Single-threaded observable value with cancellable subscriptions.
//!
//! # Design
//!
//! [`ObservableValue<T>`] keeps its value and an insertion-ordered
//! `Registry` of callbacks behind one `Rc`. Every subscription is answered
//! with a [`SubscriptionToken`] holding a `Weak` back-reference, so tokens
//! never extend the container's lifetime and go inert when it is dropped.
//!
//! A notification pass works on a snapshot of the registry taken before the
//! first callback runs. No borrow is held while callbacks execute, so a
//! callback may subscribe, cancel any token, read the value, or call
//! [`update`](ObservableValue::update) again:
//!
//! - a subscription added mid-pass is first notified by the next update;
//! - a token cancelled mid-pass still gets the value of the running pass
//!   if it was in the snapshot, and nothing afterwards;
//! - a nested `update` stores the value immediately but its delivery is
//!   queued behind the running pass, so every subscriber sees updates in
//!   issue order.
//!
//! # Performance
//!
//! | Operation     | Complexity                   |
//! |---------------|------------------------------|
//! | `subscribe()` | O(log S) plus one replay     |
//! | `update()`    | O(S) where S = subscribers   |
//! | `cancel()`    | O(log S)                     |
//!
//! # Failure Modes
//!
//! - **Panicking subscriber**: caught per callback; the pass continues and
//!   [`PanicPolicy`](crate::PanicPolicy) decides whether the first panic is
//!   resumed afterwards or logged.
//! - **Panicking replay**: the callback is unregistered again, then the
//!   panic is handled like any other subscriber panic.
//! - **`update()` inside [`with`](ObservableValue::with)**: panics (`RefCell`
//!   borrow rules). Clone the value out first.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::ObserveConfig;
use crate::dispatch::{self, Failure};
use crate::error::NotifyError;
use crate::id::SubscriptionId;
use crate::registry::Registry;
use crate::token::{SubscriptionToken, Unsubscribe};

type Callback<T> = Rc<dyn Fn(&T)>;
type Snapshot<T> = Vec<(SubscriptionId, Callback<T>)>;

struct Inner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    subscribers: RefCell<Registry<Callback<T>>>,
    /// Set while a notification pass is running.
    notifying: Cell<bool>,
    /// Updates issued re-entrantly, with the subscribers they were issued to.
    pending: RefCell<VecDeque<(T, Snapshot<T>)>>,
    config: ObserveConfig,
}

impl<T> Unsubscribe for Inner<T> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers.is_subscribed(id)
    }
}

/// A value that broadcasts every update to its subscribers.
///
/// Cloning creates another handle to the **same** container. The container
/// is destroyed when its last handle is dropped; outstanding tokens then
/// become no-ops.
///
/// # Invariants
///
/// 1. Each registered callback corresponds to exactly one uncancelled token
///    (or a live owner, for [`observe`](Self::observe)).
/// 2. Subscribers are notified in registration order.
/// 3. Each live subscriber sees every update exactly once, in issue order.
/// 4. After `cancel()` returns, the callback is never invoked by a later
///    pass.
pub struct ObservableValue<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

impl<T: Default + Clone + 'static> Default for ObservableValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + 'static> ObservableValue<T> {
    /// Create a container with the default configuration.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_config(value, ObserveConfig::default())
    }

    #[must_use]
    pub fn with_config(value: T, config: ObserveConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                value: RefCell::new(value),
                version: Cell::new(0),
                subscribers: RefCell::new(Registry::new()),
                notifying: Cell::new(false),
                pending: RefCell::new(VecDeque::new()),
                config,
            }),
        }
    }

    /// Configuration this container was built with.
    #[must_use]
    pub fn config(&self) -> ObserveConfig {
        self.inner.config
    }

    /// Clone of the value at the instant of the call.
    #[must_use]
    pub fn current_value_snapshot(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Number of `update`-style publications so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Register `callback` for the current and all future values.
    ///
    /// With replay enabled (the default), `callback` runs once right away
    /// with the current value. Updates issued during the replay are
    /// delivered after it.
    ///
    /// # Panics
    ///
    /// If the replay panics, the callback is unregistered again and the
    /// panic is handled by the configured [`PanicPolicy`](crate::PanicPolicy).
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> SubscriptionToken {
        if self.inner.config.replay_on_subscribe {
            return self.subscribe_replaying(callback);
        }
        self.register(Rc::new(callback))
    }

    /// Register `callback` and replay the current value to it, whatever the
    /// replay setting.
    pub(crate) fn subscribe_replaying(
        &self,
        callback: impl Fn(&T) + 'static,
    ) -> SubscriptionToken {
        let callback: Callback<T> = Rc::new(callback);
        let token = self.register(Rc::clone(&callback));
        self.replay(&token, callback);
        token
    }

    /// Register `callback` for future values only, regardless of the replay
    /// setting.
    pub fn subscribe_changes(&self, callback: impl Fn(&T) + 'static) -> SubscriptionToken {
        self.register(Rc::new(callback))
    }

    /// Observe on behalf of `owner`, which is held weakly.
    ///
    /// The callback receives the owner alongside each value. Once the owner
    /// has been dropped, the entry removes itself the next time it would be
    /// notified. The returned token can still cancel earlier.
    pub fn observe<O: 'static>(
        &self,
        owner: &Rc<O>,
        callback: impl Fn(&O, &T) + 'static,
    ) -> SubscriptionToken {
        let weak_owner = Rc::downgrade(owner);
        let container = Rc::downgrade(&self.inner);
        let mut entry = None;
        let id = self.inner.subscribers.borrow_mut().insert_with(|id| {
            let wrapped: Callback<T> = Rc::new(move |value: &T| match weak_owner.upgrade() {
                Some(owner) => callback(&*owner, value),
                None => {
                    if let Some(inner) = container.upgrade() {
                        inner.unsubscribe(id);
                        tracing::trace!(id = %id, "owner dropped, observation removed");
                    }
                }
            });
            entry = Some(Rc::clone(&wrapped));
            wrapped
        });
        tracing::trace!(id = %id, "owner-scoped observation added");
        let token = self.token(id);
        if let Some(wrapped) = entry.filter(|_| self.inner.config.replay_on_subscribe) {
            self.replay(&token, wrapped);
        }
        token
    }

    /// Replace the value and notify every registered subscriber.
    ///
    /// # Panics
    ///
    /// Under [`PanicPolicy::Propagate`](crate::PanicPolicy::Propagate),
    /// re-raises the first subscriber panic once all subscribers have been
    /// notified. Values published from callbacks during this call count as
    /// part of it.
    pub fn update(&self, value: T) {
        let failures = self.publish(value);
        dispatch::settle(failures, self.inner.config.panic_policy);
    }

    /// Like [`update`](Self::update), but reports subscriber panics instead
    /// of applying the configured policy.
    ///
    /// Called from inside a callback of this container, the value is only
    /// queued behind the running pass, so this returns `Ok(())`; the panics
    /// it causes are reported by the outermost `update` or `try_update`.
    pub fn try_update(&self, value: T) -> Result<(), NotifyError> {
        dispatch::report(self.publish(value))
    }

    /// Mutate the value in place, then publish it like [`update`](Self::update).
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        let value = {
            let mut current = self.inner.value.borrow_mut();
            f(&mut current);
            current.clone()
        };
        self.update(value);
    }

    fn register(&self, callback: Callback<T>) -> SubscriptionToken {
        let id = self.inner.subscribers.borrow_mut().insert(callback);
        tracing::trace!(id = %id, "subscribed");
        self.token(id)
    }

    fn token(&self, id: SubscriptionId) -> SubscriptionToken {
        let target: Weak<dyn Unsubscribe> = Rc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        SubscriptionToken::new(id, target)
    }

    /// Deliver the current value to a freshly registered callback.
    fn replay(&self, token: &SubscriptionToken, callback: Callback<T>) {
        let value = self.current_value_snapshot();
        let nested = self.inner.notifying.replace(true);
        let mut failures = Vec::new();
        dispatch::deliver(&[(token.id(), callback)], |cb| cb(&value), &mut failures);
        if !failures.is_empty() {
            token.cancel();
        }
        if !nested {
            failures.extend(self.drain());
        }
        dispatch::settle(failures, self.inner.config.panic_policy);
    }

    /// Store `value` and queue its delivery to the current subscribers.
    /// Delivers right away unless a pass is already running further up the
    /// stack, in which case that pass picks it up.
    fn publish(&self, value: T) -> Vec<Failure> {
        let inner = &self.inner;
        *inner.value.borrow_mut() = value.clone();
        inner.version.set(inner.version.get() + 1);
        let targets = inner.subscribers.borrow().snapshot();
        inner.pending.borrow_mut().push_back((value, targets));

        if inner.notifying.replace(true) {
            tracing::trace!(version = inner.version.get(), "nested update queued");
            return Vec::new();
        }
        self.drain()
    }

    /// Run queued passes until none are left, then clear `notifying`.
    ///
    /// The subscriber set of each pass is the one captured when its update
    /// was issued. Entries cancelled before the pass starts are dropped from
    /// it; once the pass is running nothing is dropped.
    fn drain(&self) -> Vec<Failure> {
        let inner = &self.inner;
        let mut failures = Vec::new();
        loop {
            let next = inner.pending.borrow_mut().pop_front();
            let Some((value, mut targets)) = next else {
                break;
            };
            {
                let subscribers = inner.subscribers.borrow();
                targets.retain(|(id, _)| subscribers.contains(*id));
            }
            tracing::debug!(subscribers = targets.len(), "notifying subscribers");
            dispatch::deliver(&targets, |callback| callback(&value), &mut failures);
        }
        inner.notifying.set(false);
        failures
    }
}

impl<T: Clone + PartialEq + 'static> ObservableValue<T> {
    /// Publish `value` only if it differs from the current one.
    ///
    /// Returns whether an update happened.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        self.update(value);
        true
    }
}
