//! Async resources.
//!
//! A resource turns an async fetch into a node: it reads
//! [`ReactiveError::NotReady`] until the latest fetch resolves, which is what
//! load boundaries wait on.
//!
//! A render effect tracks the source. Every new source value (or a
//! [`Resource::refetch`]) starts the fetcher on the host scheduler and bumps
//! a generation counter; a fetch that resolves after a newer one started is
//! dropped.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use tracing::trace;

use crate::error::{ReactiveError, Result};

use super::computed::Computed;
use super::effect::Effect;
use super::runtime::with_runtime;
use super::signal::{Signal, SignalOptions};

/// An async-backed value.
pub struct Resource<T> {
    value: Computed<T>,
    state: Signal<Option<Result<T>>>,
    loading: Signal<bool>,
    trigger: Signal<u64>,
    generation: Rc<Cell<u64>>,
    effect: Effect,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            state: self.state,
            loading: self.loading,
            trigger: self.trigger,
            generation: self.generation.clone(),
            effect: self.effect,
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("value", &self.value.id())
            .field("generation", &self.generation.get())
            .finish()
    }
}

impl<T: Clone + 'static> Resource<T> {
    /// The latest fetched value. `NotReady` while a fetch is in flight.
    pub fn get(&self) -> Result<T> {
        self.value.get()
    }

    pub fn get_untracked(&self) -> Result<T> {
        self.value.get_untracked()
    }

    /// The computed that readers and boundaries track.
    pub fn computed(&self) -> Computed<T> {
        self.value
    }

    /// Whether a fetch is in flight. Tracked.
    pub fn loading(&self) -> Result<bool> {
        self.loading.get()
    }

    /// Overwrite the value locally. Any fetch in flight is discarded.
    pub fn mutate(&self, value: T) -> Result<()> {
        self.generation.set(self.generation.get() + 1);
        self.state.set(Some(Ok(value)))?;
        self.loading.set(false)
    }

    /// Fetch again with the current source value.
    pub fn refetch(&self) -> Result<()> {
        self.trigger.update(|n| n + 1)
    }

    /// Stop tracking the source and drop the value.
    pub fn dispose(&self) {
        self.effect.dispose();
        self.value.dispose();
    }
}

/// Create a resource that runs `fetcher(source())` whenever the source
/// changes.
///
/// Fetches are spawned on the runtime's host scheduler, see
/// [`crate::Runtime::set_host`].
pub fn create_resource<S, T, Fut>(
    source: impl Fn() -> Result<S> + 'static,
    fetcher: impl Fn(S) -> Fut + 'static,
) -> Resource<T>
where
    S: Clone + PartialEq + 'static,
    T: Clone + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    let state: Signal<Option<Result<T>>> = Signal::with_options(None, SignalOptions::always_notify());
    let loading = Signal::new(false);
    let trigger = Signal::with_options(0_u64, SignalOptions::always_notify());
    let generation = Rc::new(Cell::new(0_u64));

    let value = Computed::with_options(
        move || match state.get()? {
            Some(result) => result,
            None => Err(ReactiveError::NotReady),
        },
        SignalOptions::always_notify(),
    );

    let fetch_generation = generation.clone();
    let effect = Effect::builder(move || Ok((source()?, trigger.get()?)))
        .render()
        .name("resource")
        .build(move |(input, _), _| {
            let current = fetch_generation.get() + 1;
            fetch_generation.set(current);

            let settled = state.get_untracked().is_ok_and(|slot| slot.is_some());
            if settled {
                log_disposed(state.set(None));
            }
            log_disposed(loading.set(true));

            let future = fetcher(input.clone());
            let generation = fetch_generation.clone();
            let host = with_runtime(|rt| rt.host());
            host.spawn(Box::pin(async move {
                let result = future.await;
                if generation.get() != current {
                    trace!(generation = current, "dropping superseded fetch");
                    return;
                }
                log_disposed(state.set(Some(result)));
                log_disposed(loading.set(false));
            }));
        });

    Resource {
        value,
        state,
        loading,
        trigger,
        generation,
        effect,
    }
}

fn log_disposed(written: Result<()>) {
    if let Err(err) = written {
        trace!(error = %err, "resource written after disposal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use crate::reactive::runtime::{flush, Runtime};
    use std::cell::RefCell;

    fn manual_host() -> ManualHost {
        let host = ManualHost::new();
        Runtime::set_host(Rc::new(host.clone()));
        host
    }

    #[test]
    fn resource_is_not_ready_until_fetch_resolves() {
        let host = manual_host();
        let id = Signal::new(1);

        let resource = create_resource(move || id.get(), |id: i32| async move { Ok::<_, ReactiveError>(id * 10) });
        assert!(matches!(resource.get(), Err(ReactiveError::NotReady)));

        flush().unwrap();
        assert!(resource.loading().unwrap());

        host.run_pending();
        assert_eq!(resource.get().unwrap(), 10);
        assert!(!resource.loading().unwrap());
    }

    #[test]
    fn source_change_refetches() {
        let host = manual_host();
        let id = Signal::new(1);
        let fetched = Rc::new(RefCell::new(Vec::new()));

        let log = fetched.clone();
        let resource = create_resource(move || id.get(), move |id: i32| {
            log.borrow_mut().push(id);
            async move { Ok::<_, ReactiveError>(id) }
        });

        flush().unwrap();
        host.run_pending();
        assert_eq!(resource.get().unwrap(), 1);

        id.set(2).unwrap();
        flush().unwrap();
        assert!(matches!(resource.get(), Err(ReactiveError::NotReady)));
        host.run_pending();
        assert_eq!(resource.get().unwrap(), 2);

        resource.refetch().unwrap();
        flush().unwrap();
        host.run_pending();
        assert_eq!(*fetched.borrow(), vec![1, 2, 2]);
    }

    #[test]
    fn mutate_discards_inflight_fetch() {
        let host = manual_host();
        let resource = create_resource(|| Ok(()), |_| async { Ok::<_, ReactiveError>("remote") });

        flush().unwrap();
        resource.mutate("local").unwrap();
        host.run_pending();

        assert_eq!(resource.get().unwrap(), "local");
        assert!(!resource.loading().unwrap());
    }

    #[test]
    fn fetch_resolving_after_disposal_is_dropped() {
        let host = manual_host();
        let (owner, resource) = crate::reactive::owner::create_root(|owner| {
            let resource = create_resource(|| Ok(()), |_| async { Ok::<_, ReactiveError>(5) });
            (owner, resource)
        });

        flush().unwrap();
        owner.dispose();
        assert_eq!(host.run_pending(), 1);
        assert!(matches!(resource.get(), Err(ReactiveError::Disposed(_))));
    }

    #[test]
    fn debug_names_the_value_node() {
        let _host = manual_host();
        let resource = create_resource(|| Ok(1), |n: i32| async move { Ok::<_, ReactiveError>(n) });
        let rendered = format!("{resource:?}");
        assert!(rendered.starts_with("Resource"));
        assert!(rendered.contains(&format!("{:?}", resource.computed().id())));
    }

    #[test]
    fn fetch_errors_surface_on_read() {
        let host = manual_host();
        let resource: Resource<i32> =
            create_resource(|| Ok(()), |_| async { Err::<i32, _>(ReactiveError::msg("offline")) });

        flush().unwrap();
        host.run_pending();

        assert_eq!(resource.get().unwrap_err().to_string(), "offline");
    }
}
