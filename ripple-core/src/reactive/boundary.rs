//! Boundaries
//!
//! A boundary gives a subtree of the owner tree a queue of its own and
//! decides what its parent sees:
//!
//! - [`create_boundary`] hides its content while a condition holds.
//! - [`create_load_boundary`] shows a fallback while anything inside is
//!   waiting on a value that is not ready.
//! - [`create_error_boundary`] shows a fallback while anything inside has
//!   failed, until the failure recovers or the boundary is reset.
//!
//! While a boundary is gated its user effects are held; render effects keep
//! running so async work inside it can still make progress.
//!
//! Each boundary builds two computeds. The content computed lives inside the
//! boundary's owner, so effects it creates notify the boundary queue. The
//! result computed lives in the caller's owner and is what the caller reads.

use std::fmt;

use crate::error::{ReactiveError, Result};
use crate::graph::queue::{CollectStatus, QueueKind};
use crate::graph::QueueId;

use super::computed::Computed;
use super::owner::Owner;
use super::runtime::with_runtime;
use super::signal::{Signal, SignalOptions};

/// Hide `content` while `condition` is true.
///
/// The returned computed reads `None` while hidden. The condition is
/// re-evaluated at the start of every flush iteration; user effects inside
/// the boundary are held while it is true.
pub fn create_boundary<T>(
    content: impl Fn() -> Result<T> + 'static,
    condition: impl Fn() -> Result<bool> + 'static,
) -> Computed<Option<T>>
where
    T: Clone + 'static,
{
    let condition = Computed::new(condition);
    let owner = Owner::new();
    let queue = with_runtime(|rt| rt.create_boundary_queue(owner.id(), QueueKind::conditional(condition.id())));
    let inner = owner.run(|| Computed::with_options(content, SignalOptions::always_notify()));

    tracing::debug!(%queue, "conditional boundary created");
    Computed::with_options(
        move || {
            if condition.get()? {
                return Ok(None);
            }
            inner.get().map(Some)
        },
        SignalOptions::always_notify(),
    )
}

/// Show `fallback` while `content` or any effect inside it is not ready.
///
/// Real failures pass through to the caller (or an enclosing error
/// boundary).
pub fn create_load_boundary<T>(
    content: impl Fn() -> Result<T> + 'static,
    fallback: impl Fn() -> Result<T> + 'static,
) -> Computed<T>
where
    T: Clone + 'static,
{
    let owner = Owner::new();
    let revision = owner.run(|| Signal::with_options(0_u64, SignalOptions::always_notify()));
    let queue = with_runtime(|rt| {
        rt.create_boundary_queue(owner.id(), QueueKind::collection(CollectStatus::Pending, revision.id()))
    });
    let inner = owner.run(|| Computed::with_options(content, SignalOptions::always_notify()));

    Computed::with_options(
        move || {
            revision.get()?;
            // Effects built by the content report while it runs.
            let content = inner.get();
            let waiting = matches!(&content, Err(err) if err.is_not_ready());
            let pending = with_runtime(|rt| {
                rt.hold_content(queue, inner.id(), waiting);
                rt.has_collected(queue)
            });
            match content {
                Ok(value) if !pending => Ok(value),
                Err(err) if !err.is_not_ready() => Err(err),
                _ => fallback(),
            }
        },
        SignalOptions::always_notify(),
    )
}

/// Handle passed to an error boundary's fallback.
#[derive(Clone, Copy)]
pub struct BoundaryReset {
    queue: QueueId,
    epoch: Signal<u64>,
}

impl BoundaryReset {
    /// Forget collected failures and rebuild the boundary's content.
    pub fn reset(&self) {
        with_runtime(|rt| rt.clear_collected(self.queue));
        if let Err(err) = self.epoch.update(|n| n + 1) {
            tracing::debug!(error = %err, "reset on a disposed boundary");
        }
    }
}

impl fmt::Debug for BoundaryReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryReset").field("queue", &self.queue).finish()
    }
}

/// Show `fallback` while `content` or any effect inside it has failed.
///
/// The fallback receives the first failure and a [`BoundaryReset`]. A
/// collected effect that later recomputes successfully clears itself, so
/// the boundary also recovers without a reset. `NotReady` is not a failure
/// and passes through.
pub fn create_error_boundary<T>(
    content: impl Fn() -> Result<T> + 'static,
    fallback: impl Fn(&ReactiveError, &BoundaryReset) -> Result<T> + 'static,
) -> Computed<T>
where
    T: Clone + 'static,
{
    let owner = Owner::new();
    let (revision, epoch) = owner.run(|| {
        (
            Signal::with_options(0_u64, SignalOptions::always_notify()),
            Signal::with_options(0_u64, SignalOptions::always_notify()),
        )
    });
    let queue = with_runtime(|rt| {
        rt.create_boundary_queue(owner.id(), QueueKind::collection(CollectStatus::Error, revision.id()))
    });
    let inner = owner.run(|| {
        Computed::with_options(
            move || {
                epoch.get()?;
                content()
            },
            SignalOptions::always_notify(),
        )
    });
    let reset = BoundaryReset { queue, epoch };

    Computed::with_options(
        move || {
            revision.get()?;
            let content = inner.get();
            if let Some(err) = with_runtime(|rt| rt.first_collected(queue)) {
                return fallback(&err, &reset);
            }
            match content {
                Err(err) if !err.is_not_ready() => fallback(&err, &reset),
                other => other,
            }
        },
        SignalOptions::always_notify(),
    )
}
