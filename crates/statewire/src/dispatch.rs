#![forbid(unsafe_code)]

//! Panic-isolated delivery of one notification pass.
//!
//! Both containers take a snapshot of their registry, release any borrow or
//! lock, and hand the snapshot to [`deliver`]. Each callback runs inside its
//! own `catch_unwind`, so a panicking subscriber cannot stop delivery to the
//! ones after it. What happens to collected panics is decided afterwards by
//! [`settle`] (configured policy) or [`report`] (`try_update`).

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use crate::config::PanicPolicy;
use crate::error::{CallbackFailure, NotifyError, panic_message};
use crate::id::SubscriptionId;

/// A caught panic together with the subscription that raised it.
pub(crate) type Failure = (SubscriptionId, Box<dyn Any + Send>);

/// Invoke `call` for every entry of `snapshot`, in order.
pub(crate) fn deliver<C>(
    snapshot: &[(SubscriptionId, C)],
    call: impl Fn(&C),
    failures: &mut Vec<Failure>,
) {
    for (id, entry) in snapshot {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(entry))) {
            tracing::warn!(
                id = %id,
                message = %panic_message(payload.as_ref()),
                "subscriber callback panicked"
            );
            failures.push((*id, payload));
        }
    }
}

/// Apply `policy` to the panics collected over one `update`.
pub(crate) fn settle(failures: Vec<Failure>, policy: PanicPolicy) {
    if failures.is_empty() {
        return;
    }
    match policy {
        PanicPolicy::Log => {
            for (id, payload) in &failures {
                tracing::error!(
                    id = %id,
                    message = %panic_message(payload.as_ref()),
                    "subscriber panic suppressed"
                );
            }
        }
        PanicPolicy::Propagate => {
            if let Some((_, payload)) = failures.into_iter().next() {
                resume_unwind(payload);
            }
        }
    }
}

/// Turn collected panics into a [`NotifyError`].
pub(crate) fn report(failures: Vec<Failure>) -> Result<(), NotifyError> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(NotifyError {
        failures: failures
            .into_iter()
            .map(|(id, payload)| CallbackFailure {
                id,
                message: panic_message(payload.as_ref()),
            })
            .collect(),
    })
}
