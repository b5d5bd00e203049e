#![forbid(unsafe_code)]

//! Thread-safe observable value.
//!
//! [`SharedObservableValue<T>`] offers the same contract as
//! [`ObservableValue`](crate::ObservableValue) to callers on several threads.
//!
//! # Design
//!
//! One `Mutex` guards the value, the subscriber `Registry` and a delivery
//! queue. Every `update` captures its subscriber snapshot under the lock and
//! appends it to the queue; callbacks are always invoked with the lock
//! released, so a callback may subscribe, cancel or update without
//! deadlocking.
//!
//! At most one thread drains the queue at a time (the *deliverer*). A thread
//! that publishes while another thread is delivering enqueues its value with
//! a `Receipt` and blocks until the deliverer has handed the value out, in
//! issue order, and filled the receipt with the panics it caused. A nested
//! `update` from inside a callback cannot wait for the running pass; it is
//! queued without a receipt and its panics go to the outermost `update`
//! on that thread.
//!
//! Replay follows the same rule. When nobody is delivering, or the caller is
//! the deliverer itself (subscribing from a callback), the new callback is
//! replayed immediately. Otherwise the replay is queued behind the updates
//! already in flight, which keeps every subscriber's view ordered, and
//! `subscribe` returns without waiting.
//!
//! # Failure Modes
//!
//! - **Poisoned lock**: cannot be caused by a callback (callbacks run
//!   unlocked); the guard is recovered with `PoisonError::into_inner`.
//! - **Panicking subscriber**: handled as in the single-threaded container,
//!   by the thread that published the value.
//! - **Panicking queued replay**: nobody is waiting for it, so the callback
//!   is unregistered and the panic is logged regardless of policy.
//! - **Callback waiting on a publisher**: a callback that blocks until
//!   another thread's `update` returns deadlocks, since that `update` waits
//!   for the callback's pass to finish.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::config::{ObserveConfig, PanicPolicy};
use crate::dispatch::{self, Failure};
use crate::error::NotifyError;
use crate::id::SubscriptionId;
use crate::registry::Registry;
use crate::token::{SharedSubscriptionToken, Unsubscribe};

type SharedCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Target<T> = (SubscriptionId, SharedCallback<T>);

enum Delivery<T> {
    Broadcast {
        value: T,
        targets: Vec<Target<T>>,
        /// Present when the publisher is another thread waiting for this
        /// pass; `None` means the deliverer keeps the failures itself.
        receipt: Option<Arc<Receipt>>,
    },
    Replay {
        value: T,
        target: Target<T>,
    },
}

/// Outcome of one publication, handed from the deliverer to a waiting
/// publisher.
#[derive(Default)]
struct Receipt {
    outcome: Mutex<Option<Vec<Failure>>>,
    delivered: Condvar,
}

impl Receipt {
    fn complete(&self, failures: Vec<Failure>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(failures);
        self.delivered.notify_all();
    }

    fn wait(&self) -> Vec<Failure> {
        let outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = self
            .delivered
            .wait_while(outcome, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        outcome.take().unwrap_or_default()
    }
}

struct State<T> {
    value: T,
    version: u64,
    subscribers: Registry<SharedCallback<T>>,
    queue: VecDeque<Delivery<T>>,
    deliverer: Option<ThreadId>,
}

struct SharedInner<T> {
    state: Mutex<State<T>>,
    config: ObserveConfig,
}

impl<T> SharedInner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Unsubscribe for SharedInner<T> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().subscribers.remove(id);
        removed.is_some()
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.contains(id)
    }
}

/// Thread-safe counterpart of [`ObservableValue`](crate::ObservableValue).
///
/// Cloning shares the container. Tokens are [`SharedSubscriptionToken`]s
/// and may be cancelled from any thread.
pub struct SharedObservableValue<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for SharedObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SharedObservableValue")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscriber_count", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> SharedObservableValue<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_config(value, ObserveConfig::default())
    }

    #[must_use]
    pub fn with_config(value: T, config: ObserveConfig) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                state: Mutex::new(State {
                    value,
                    version: 0,
                    subscribers: Registry::new(),
                    queue: VecDeque::new(),
                    deliverer: None,
                }),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> ObserveConfig {
        self.inner.config
    }

    /// Clone of the value at the instant of the call.
    #[must_use]
    pub fn current_value_snapshot(&self) -> T {
        self.inner.lock().value.clone()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Register `callback` for the current and all future values.
    ///
    /// With replay enabled, the callback gets the current value right away,
    /// unless another thread is delivering: then the replay is queued behind
    /// the updates in flight and `subscribe` returns first.
    ///
    /// # Panics
    ///
    /// A panicking replay unregisters the callback; the panic is then handled
    /// by the configured [`PanicPolicy`](crate::PanicPolicy).
    pub fn subscribe(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> SharedSubscriptionToken {
        let callback: SharedCallback<T> = Arc::new(callback);
        if !self.inner.config.replay_on_subscribe {
            return self.register(callback);
        }

        let me = thread::current().id();
        let mut state = self.inner.lock();
        let id = state.subscribers.insert(Arc::clone(&callback));
        tracing::trace!(id = %id, "shared subscribe");
        let token = self.token(id);
        let value = state.value.clone();

        let deliverer = state.deliverer;
        let nested = match deliverer {
            Some(deliverer) if deliverer != me => {
                state.queue.push_back(Delivery::Replay {
                    value,
                    target: (id, callback),
                });
                tracing::trace!(id = %id, "replay queued behind active delivery");
                return token;
            }
            Some(_) => true,
            None => {
                state.deliverer = Some(me);
                false
            }
        };
        drop(state);

        let mut failures = Vec::new();
        dispatch::deliver(&[(id, callback)], |cb| cb(&value), &mut failures);
        if !failures.is_empty() {
            token.cancel();
        }
        if !nested {
            failures.extend(self.drain());
        }
        dispatch::settle(failures, self.inner.config.panic_policy);
        token
    }

    /// Register `callback` for future values only.
    pub fn subscribe_changes(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> SharedSubscriptionToken {
        self.register(Arc::new(callback))
    }

    /// Replace the value and notify every registered subscriber.
    ///
    /// If another thread is currently delivering, the value is queued behind
    /// the values in flight and this call blocks until it has been delivered.
    /// Called from inside a callback of this container, it returns at once
    /// and the value is delivered after the running pass.
    ///
    /// # Panics
    ///
    /// Under [`PanicPolicy::Propagate`], re-raises the first panic caused by
    /// this value (or by values published from callbacks during this call).
    pub fn update(&self, value: T) {
        let failures = self.publish(value);
        dispatch::settle(failures, self.inner.config.panic_policy);
    }

    /// Like [`update`](Self::update), but returns the subscriber panics this
    /// value caused instead of applying the configured policy.
    ///
    /// From inside a callback of this container the value is only queued, so
    /// this returns `Ok(())`; its panics are reported by the outermost
    /// `update` or `try_update` on the delivering thread.
    pub fn try_update(&self, value: T) -> Result<(), NotifyError> {
        dispatch::report(self.publish(value))
    }

    /// Mutate the value in place under the lock, then publish it.
    ///
    /// `f` must not call back into this container.
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        let failures = {
            let mut state = self.inner.lock();
            f(&mut state.value);
            let value = state.value.clone();
            self.enqueue(state, value)
        };
        dispatch::settle(failures, self.inner.config.panic_policy);
    }

    fn register(&self, callback: SharedCallback<T>) -> SharedSubscriptionToken {
        let id = self.inner.lock().subscribers.insert(callback);
        tracing::trace!(id = %id, "shared subscribe");
        self.token(id)
    }

    fn token(&self, id: SubscriptionId) -> SharedSubscriptionToken {
        let target = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe + Send + Sync>;
        SharedSubscriptionToken::new(id, target)
    }

    fn publish(&self, value: T) -> Vec<Failure> {
        let mut state = self.inner.lock();
        state.value = value.clone();
        self.enqueue(state, value)
    }

    /// Bump the version and queue a broadcast of `value`.
    ///
    /// Drains the queue when no delivery is in progress, returns at once when
    /// the caller is the deliverer, and otherwise waits for the deliverer to
    /// hand out `value`.
    fn enqueue(&self, mut state: MutexGuard<'_, State<T>>, value: T) -> Vec<Failure> {
        state.version += 1;
        let targets = state.subscribers.snapshot();
        let me = thread::current().id();
        match state.deliverer {
            None => {
                state.queue.push_back(Delivery::Broadcast {
                    value,
                    targets,
                    receipt: None,
                });
                state.deliverer = Some(me);
                drop(state);
                self.drain()
            }
            Some(deliverer) if deliverer == me => {
                state.queue.push_back(Delivery::Broadcast {
                    value,
                    targets,
                    receipt: None,
                });
                tracing::trace!(version = state.version, "nested update queued");
                Vec::new()
            }
            Some(_) => {
                let receipt = Arc::new(Receipt::default());
                state.queue.push_back(Delivery::Broadcast {
                    value,
                    targets,
                    receipt: Some(Arc::clone(&receipt)),
                });
                tracing::trace!(version = state.version, "waiting for active deliverer");
                drop(state);
                receipt.wait()
            }
        }
    }

    /// Deliver queued items until the queue is empty, then give up the
    /// deliverer role. Must only be called by the deliverer.
    fn drain(&self) -> Vec<Failure> {
        let mut failures = Vec::new();
        loop {
            let item = {
                let mut state = self.inner.lock();
                match state.queue.pop_front() {
                    Some(Delivery::Broadcast {
                        value,
                        mut targets,
                        receipt,
                    }) => {
                        targets.retain(|(id, _)| state.subscribers.contains(*id));
                        Delivery::Broadcast {
                            value,
                            targets,
                            receipt,
                        }
                    }
                    Some(Delivery::Replay { target, .. })
                        if !state.subscribers.contains(target.0) =>
                    {
                        tracing::trace!(id = %target.0, "queued replay dropped, cancelled");
                        continue;
                    }
                    Some(replay) => replay,
                    None => {
                        state.deliverer = None;
                        break;
                    }
                }
            };
            match item {
                Delivery::Broadcast {
                    value,
                    targets,
                    receipt,
                } => {
                    tracing::debug!(subscribers = targets.len(), "notifying shared subscribers");
                    match receipt {
                        Some(receipt) => {
                            let mut caused = Vec::new();
                            dispatch::deliver(&targets, |cb| cb(&value), &mut caused);
                            receipt.complete(caused);
                        }
                        None => dispatch::deliver(&targets, |cb| cb(&value), &mut failures),
                    }
                }
                Delivery::Replay { value, target } => {
                    let mut caused = Vec::new();
                    let target = std::slice::from_ref(&target);
                    dispatch::deliver(target, |cb| cb(&value), &mut caused);
                    if !caused.is_empty() {
                        self.inner.unsubscribe(target[0].0);
                        dispatch::settle(caused, PanicPolicy::Log);
                    }
                }
            }
        }
        failures
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> SharedObservableValue<T> {
    /// Publish `value` only if it differs from the current one, checked and
    /// stored atomically.
    pub fn set_if_changed(&self, value: T) -> bool {
        let failures = {
            let mut state = self.inner.lock();
            if state.value == value {
                return false;
            }
            state.value = value.clone();
            self.enqueue(state, value)
        };
        dispatch::settle(failures, self.inner.config.panic_policy);
        true
    }
}
