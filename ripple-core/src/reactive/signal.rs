//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking frame (computed or effect),
//!    the read is recorded and becomes an edge once the evaluation ends.
//!
//! 2. When a signal's value changes, its direct observers become stale and
//!    everything further downstream needs checking.
//!
//! 3. Nothing recomputes synchronously: computeds recompute on their next
//!    read and effects on the next flush.
//!
//! # Memory Layout
//!
//! A `Signal<T>` is just a node ID. The value lives in the thread's runtime
//! behind an `Rc<dyn Any>`, so handles are `Copy` and cheap to move into
//! closures.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::node::{EqualsFn, Node, Value};
use crate::graph::NodeId;

use super::runtime::with_runtime;

/// Downcast a node value to the handle's type.
pub(crate) fn cast<T: Clone + 'static>(id: NodeId, value: Value) -> Result<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or(ReactiveError::TypeMismatch(id))
}

/// Options for signals and computeds.
pub struct SignalOptions<T> {
    equals: Option<Rc<dyn Fn(&T, &T) -> bool>>,
    name: Option<String>,
}

impl<T: PartialEq + 'static> SignalOptions<T> {
    /// Default options: writes of an equal value are ignored.
    pub fn new() -> Self {
        Self {
            equals: Some(Rc::new(|a: &T, b: &T| a == b)),
            name: None,
        }
    }
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SignalOptions<T> {
    /// Every write notifies, even of an equal value.
    pub fn always_notify() -> Self {
        Self {
            equals: None,
            name: None,
        }
    }

    /// Use `f` to decide whether a new value equals the old one.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(f));
        self
    }

    /// Diagnostic name, shown in snapshots.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn into_parts(self) -> (Option<EqualsFn>, Option<String>) {
        let equals = self.equals.map(|f| {
            Rc::new(move |a: &dyn Any, b: &dyn Any| {
                match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                    (Some(a), Some(b)) => f(a, b),
                    _ => false,
                }
            }) as EqualsFn
        });
        (equals, self.name)
    }
}

impl<T> fmt::Debug for SignalOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions")
            .field("equals", &self.equals.is_some())
            .field("name", &self.name)
            .finish()
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use ripple_core::Signal;
///
/// let count = Signal::new(0);
/// count.set(5).unwrap();
/// assert_eq!(count.get().unwrap(), 5);
/// ```
pub struct Signal<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Signal<T> {}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&self.id).finish()
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_options(value, SignalOptions::new())
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal with custom equality or a name.
    pub fn with_options(value: T, options: SignalOptions<T>) -> Self {
        let (equals, name) = options.into_parts();
        let node = Node::signal(Rc::new(value), equals).with_name(name);
        let id = with_runtime(|rt| rt.create_signal(node));
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a tracking frame, the running computation starts
    /// depending on this signal.
    pub fn get(&self) -> Result<T> {
        let value = with_runtime(|rt| rt.read(self.id, true))?;
        cast(self.id, value)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> Result<T> {
        let value = with_runtime(|rt| rt.read(self.id, false))?;
        cast(self.id, value)
    }

    /// Borrow the current value without cloning it. Tracked like `get`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let value = with_runtime(|rt| rt.read(self.id, true))?;
        let value = value
            .downcast_ref::<T>()
            .ok_or(ReactiveError::TypeMismatch(self.id))?;
        Ok(f(value))
    }

    /// Set a new value and mark dependents.
    ///
    /// A value equal to the current one (per the signal's equality) is
    /// ignored.
    pub fn set(&self, value: T) -> Result<()> {
        with_runtime(|rt| rt.write(self.id, Rc::new(value))).map(|_| ())
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = self.with_untracked(f)?;
        self.set(next)
    }

    fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let value = with_runtime(|rt| rt.read(self.id, false))?;
        let value = value
            .downcast_ref::<T>()
            .ok_or(ReactiveError::TypeMismatch(self.id))?;
        Ok(f(value))
    }

    /// Number of computations currently reading this signal.
    pub fn observer_count(&self) -> usize {
        with_runtime(|rt| rt.observer_count(self.id))
    }

    /// Split into read and write halves.
    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (ReadSignal { inner: self }, WriteSignal { inner: self })
    }
}

/// Read half of a signal.
pub struct ReadSignal<T> {
    inner: Signal<T>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadSignal<T> {}

impl<T> fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.inner.id).finish()
    }
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn get(&self) -> Result<T> {
        self.inner.get()
    }

    pub fn get_untracked(&self) -> Result<T> {
        self.inner.get_untracked()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.with(f)
    }
}

/// Write half of a signal.
pub struct WriteSignal<T> {
    inner: Signal<T>,
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteSignal<T> {}

impl<T> fmt::Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteSignal").field(&self.inner.id).finish()
    }
}

impl<T: Clone + 'static> WriteSignal<T> {
    pub fn set(&self, value: T) -> Result<()> {
        self.inner.set(value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.inner.update(f)
    }
}

/// Create a signal and return its read and write halves.
pub fn create_signal<T: Clone + PartialEq + 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}
