#![forbid(unsafe_code)]

//! Observable values with cancellable subscriptions.
//!
//! - [`ObservableValue`]: single-threaded value container that broadcasts
//!   every update to its subscribers, replaying the current value to each
//!   new one.
//! - [`SharedObservableValue`]: the same contract for multi-threaded use.
//! - [`SubscriptionToken`] / [`SharedSubscriptionToken`]: idempotent
//!   cancellation handles that never keep their container alive.
//! - [`SubscriptionGuard`] and [`TokenBag`]: scope-bound cancellation.
//! - [`LoadState`] and [`RenderBinding`]: state-driven, idempotent
//!   re-rendering.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use statewire::ObservableValue;
//!
//! let counter = ObservableValue::new(0);
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let sink = Rc::clone(&seen);
//! let token = counter.subscribe(move |v| sink.borrow_mut().push(*v));
//! counter.update(5);
//! token.cancel();
//! counter.update(10);
//!
//! assert_eq!(*seen.borrow(), vec![0, 5]);
//! ```
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Each live subscriber sees every update exactly once, in issue order.
//! 3. A notification pass delivers to the subscribers present when the
//!    update was issued; cancelling or subscribing mid-pass affects later
//!    passes only.
//! 4. `cancel()` is idempotent and never fails, even after the container
//!    has been dropped.

pub mod config;
mod dispatch;
pub mod error;
pub mod id;
pub mod observable;
mod registry;
pub mod shared;
pub mod state;
pub mod token;

pub use config::{ObserveConfig, PanicPolicy};
pub use error::{CallbackFailure, ConfigError, NotifyError};
pub use id::SubscriptionId;
pub use observable::ObservableValue;
pub use shared::SharedObservableValue;
pub use state::{LoadState, Render, RenderBinding};
pub use token::{
    Cancellable, SharedSubscriptionToken, SubscriptionGuard, SubscriptionToken, TokenBag,
    TokenState,
};
