//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! sources change.
//!
//! # How Computeds Work
//!
//! 1. Nothing runs at creation. The first read evaluates the derivation and
//!    caches the result (value or error).
//!
//! 2. A write upstream marks the computed `Stale` (direct source) or
//!    `Check` (transitive source).
//!
//! 3. On the next read a `Check` computed asks its sources, in order,
//!    whether they really changed. If none did it becomes `Clean` again
//!    without running the derivation.
//!
//! 4. If the new value equals the cached one, observers further down are
//!    left alone.
//!
//! Computeds that are never read stay dirty and cost nothing.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::node::{ComputeFn, Node, Value};
use crate::graph::{NodeId, NodeState};

use super::runtime::with_runtime;
use super::signal::{cast, SignalOptions};

/// A cached derived value that recomputes only when sources change.
///
/// The derivation returns `Result<T>`, so reads of other nodes inside it can
/// use `?`. A failed derivation caches its error and every reader gets a
/// copy until the next successful evaluation.
pub struct Computed<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Computed<T> {}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Computed<T> {}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("state", &with_runtime(|rt| rt.node_state(self.id)))
            .finish()
    }
}

impl<T> Computed<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current recomputation state. Reading does not change it.
    pub fn state(&self) -> NodeState {
        with_runtime(|rt| rt.node_state(self.id))
    }

    /// Number of computations currently reading this computed.
    pub fn observer_count(&self) -> usize {
        with_runtime(|rt| rt.observer_count(self.id))
    }

    /// Dispose the computed and whatever its derivation created.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_computation(self.id))
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed with `PartialEq` change detection.
    pub fn new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        Self::with_options(compute, SignalOptions::new())
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed with custom equality or a name.
    pub fn with_options(compute: impl Fn() -> Result<T> + 'static, options: SignalOptions<T>) -> Self {
        let (equals, name) = options.into_parts();
        let compute: ComputeFn = Rc::new(move || compute().map(|v| Rc::new(v) as Value));
        let node = Node::computed(compute, equals).with_name(name);
        let id = with_runtime(|rt| rt.create_computation(node));
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the current value, recomputing first if needed.
    ///
    /// If called within a tracking frame, the running computation starts
    /// depending on this computed.
    pub fn get(&self) -> Result<T> {
        let value = with_runtime(|rt| rt.read(self.id, true))?;
        cast(self.id, value)
    }

    pub fn get_untracked(&self) -> Result<T> {
        let value = with_runtime(|rt| rt.read(self.id, false))?;
        cast(self.id, value)
    }

}

/// Create a memoized derivation.
pub fn create_computed<T: Clone + PartialEq + 'static>(compute: impl Fn() -> Result<T> + 'static) -> Computed<T> {
    Computed::new(compute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::signal::Signal;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<i32>>, Rc<Cell<i32>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn computed_is_lazy() {
        let (calls, calls_clone) = counter();

        let computed = Computed::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(42)
        });

        // Not computed yet
        assert_eq!(computed.state(), NodeState::Stale);
        assert_eq!(calls.get(), 0);

        // First access triggers computation
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(calls.get(), 1);
        assert_eq!(computed.state(), NodeState::Clean);
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let (calls, calls_clone) = counter();

        let computed = Computed::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(42)
        });

        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.get_untracked().unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn computed_recomputes_after_source_write() {
        let source = Signal::new(1);
        let doubled = Computed::new(move || Ok(source.get()? * 2));

        assert_eq!(doubled.get().unwrap(), 2);

        source.set(5).unwrap();
        assert_eq!(doubled.state(), NodeState::Stale);
        assert_eq!(doubled.get().unwrap(), 10);
    }

    #[test]
    fn unchanged_intermediate_skips_downstream_recompute() {
        let source = Signal::new(2);
        let parity = Computed::new(move || Ok(source.get()? % 2));
        let (calls, calls_clone) = counter();
        let label = Computed::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(if parity.get()? == 0 { "even" } else { "odd" })
        });

        assert_eq!(label.get().unwrap(), "even");
        assert_eq!(calls.get(), 1);

        source.set(4).unwrap();
        assert_eq!(label.state(), NodeState::Check);
        assert_eq!(label.get().unwrap(), "even");
        assert_eq!(calls.get(), 1);
        assert_eq!(label.state(), NodeState::Clean);
    }

    #[test]
    fn errors_are_cached_until_recovery() {
        let source = Signal::new(0);
        let (calls, calls_clone) = counter();
        let inverse = Computed::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            match source.get()? {
                0 => Err(ReactiveError::msg("division by zero")),
                n => Ok(100 / n),
            }
        });

        assert!(inverse.get().is_err());
        assert!(inverse.get().is_err());
        assert_eq!(calls.get(), 1);

        source.set(4).unwrap();
        assert_eq!(inverse.get().unwrap(), 25);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Rc<Cell<Option<Computed<i32>>>> = Rc::new(Cell::new(None));
        let inner = slot.clone();
        let computed = Computed::new(move || match inner.get() {
            Some(me) => me.get(),
            None => Ok(0),
        });
        slot.set(Some(computed));

        assert!(matches!(computed.get(), Err(ReactiveError::Cycle(_))));
    }

    #[test]
    fn disposed_computed_rejects_reads() {
        let computed = Computed::new(|| Ok(1));
        assert_eq!(computed.get().unwrap(), 1);

        computed.dispose();
        assert_eq!(computed.state(), NodeState::Disposed);
        assert!(matches!(computed.get(), Err(ReactiveError::Disposed(_))));
    }
}
