//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! An effect has two halves:
//!
//! 1. `compute` is tracked. It runs immediately at creation to establish
//!    dependencies, and again whenever a dependency changes, exactly like a
//!    computed.
//!
//! 2. The side-effect function is untracked. It runs during a flush, after
//!    `compute` produced a value that differs from the last one, and receives
//!    the new and the previous value.
//!
//! Effects in the render phase run before user effects in every flush.
//! User effects inside a gated boundary wait until the boundary opens.
//!
//! # Cleanup
//!
//! The side-effect function can return a [`Cleanup`]. It runs before the
//! next invocation and when the effect is disposed.
//!
//! # Errors
//!
//! A failing `compute` goes to the effect's error handler first, which can
//! recover with a fallback value. Otherwise the error is collected by the
//! nearest boundary for its kind, or it surfaces from [`crate::flush`].

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::node::{ComputeFn, EffectFn, EffectSlot, ErrorFn, Node, Value};
use crate::graph::{NodeId, NodeState, Phase};

use super::owner::Cleanup;
use super::runtime::with_runtime;
use super::signal::SignalOptions;

/// Values a side-effect function may return.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

/// Handle to a scheduled side effect.
///
/// # Example
///
/// ```rust
/// use ripple_core::{create_effect, flush, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(1);
/// let seen = Rc::new(Cell::new(0));
///
/// let sink = seen.clone();
/// create_effect(move || count.get(), move |value, _| sink.set(*value));
///
/// flush().unwrap();
/// assert_eq!(seen.get(), 1);
///
/// count.set(5).unwrap();
/// flush().unwrap();
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Start building an effect around `compute`.
    pub fn builder<T, F>(compute: F) -> EffectBuilder<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        EffectBuilder::new(compute)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Number of times the side-effect function has run.
    pub fn run_count(&self) -> usize {
        with_runtime(|rt| rt.effect_runs(self.id))
    }

    pub fn state(&self) -> NodeState {
        with_runtime(|rt| rt.node_state(self.id))
    }

    /// Stop the effect, run its cleanup and drop it from any queue.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_computation(self.id))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == NodeState::Disposed
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .finish()
    }
}

/// Builder for [`Effect`].
pub struct EffectBuilder<T> {
    compute: Rc<dyn Fn() -> Result<T>>,
    on_error: Option<Rc<dyn Fn(ReactiveError) -> Result<T>>>,
    initial: Option<T>,
    phase: Phase,
    defer: bool,
    options: SignalOptions<T>,
}

impl<T: Clone + PartialEq + 'static> EffectBuilder<T> {
    fn new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        Self {
            compute: Rc::new(compute),
            on_error: None,
            initial: None,
            phase: Phase::User,
            defer: false,
            options: SignalOptions::new(),
        }
    }
}

impl<T: Clone + 'static> EffectBuilder<T> {
    /// Handle `compute` failures. Returning `Ok` recovers with that value.
    pub fn on_error(mut self, handler: impl Fn(ReactiveError) -> Result<T> + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    /// Value passed as "previous" to the first run.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Run in the render phase, ahead of user effects and never held by
    /// boundaries.
    pub fn render(mut self) -> Self {
        self.phase = Phase::Render;
        self
    }

    /// Skip the side effect for the first value.
    pub fn defer(mut self) -> Self {
        self.defer = true;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options = self.options.name(name);
        self
    }

    /// Decide when a recomputed value counts as changed.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.options = self.options.equals(f);
        self
    }

    /// Create the effect with `effect` as its side-effect function.
    ///
    /// `compute` runs right away; `effect` runs on the next flush.
    pub fn build<R, F>(self, effect: F) -> Effect
    where
        R: IntoCleanup,
        F: Fn(&T, Option<&T>) -> R + 'static,
    {
        let compute_fn = self.compute;
        let compute: ComputeFn = Rc::new(move || compute_fn().map(|v| Rc::new(v) as Value));

        let run: EffectFn = Rc::new(move |value: &dyn Any, previous: Option<&dyn Any>| {
            let value = value.downcast_ref::<T>()?;
            let previous = previous.and_then(|p| p.downcast_ref::<T>());
            effect(value, previous).into_cleanup()
        });

        let on_error: Option<ErrorFn> = self.on_error.map(|handler| {
            Rc::new(move |err: ReactiveError| handler(err).map(|v| Rc::new(v) as Value)) as ErrorFn
        });

        let (equals, name) = self.options.into_parts();
        let initial = self.initial.map(|v| Rc::new(v) as Value);
        let defer = self.defer;
        let phase = self.phase;

        let id = with_runtime(|rt| {
            let mut slot = EffectSlot::new(phase, rt.root_queue(), run);
            slot.on_error = on_error;
            slot.previous = initial;
            slot.skip_next = defer;
            let node = Node::effect(compute, equals, slot).with_name(name);
            rt.create_effect(node)
        });
        Effect { id }
    }
}

impl<T> fmt::Debug for EffectBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectBuilder")
            .field("phase", &self.phase)
            .field("defer", &self.defer)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Create a user effect: `compute` is tracked, `effect` receives its new and
/// previous values.
pub fn create_effect<T, R>(
    compute: impl Fn() -> Result<T> + 'static,
    effect: impl Fn(&T, Option<&T>) -> R + 'static,
) -> Effect
where
    T: Clone + PartialEq + 'static,
    R: IntoCleanup,
{
    Effect::builder(compute).build(effect)
}

/// Create a render-phase effect.
pub fn create_render_effect<T, R>(
    compute: impl Fn() -> Result<T> + 'static,
    effect: impl Fn(&T, Option<&T>) -> R + 'static,
) -> Effect
where
    T: Clone + PartialEq + 'static,
    R: IntoCleanup,
{
    Effect::builder(compute).render().build(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::owner::Owner;
    use crate::reactive::runtime::flush;
    use crate::reactive::signal::Signal;
    use std::cell::{Cell, RefCell};

    #[test]
    fn compute_runs_on_creation_side_effect_on_flush() {
        let computes = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));

        let c = computes.clone();
        let r = runs.clone();
        let effect = create_effect(
            move || {
                c.set(c.get() + 1);
                Ok(())
            },
            move |_, _| r.set(r.get() + 1),
        );

        assert_eq!(computes.get(), 1);
        assert_eq!(runs.get(), 0);
        assert_eq!(effect.run_count(), 0);

        flush().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_receives_previous_value() {
        let source = Signal::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        Effect::builder(move || source.get())
            .initial(0)
            .build(move |value, previous| sink.borrow_mut().push((*value, previous.copied())));

        flush().unwrap();
        source.set(2).unwrap();
        flush().unwrap();

        assert_eq!(*log.borrow(), vec![(1, Some(0)), (2, Some(1))]);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let source = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let r = runs.clone();
        let effect = create_effect(move || source.get(), move |_, _| r.set(r.get() + 1));
        flush().unwrap();
        assert_eq!(runs.get(), 1);

        source.set(1).unwrap();
        effect.dispose();
        assert!(effect.is_disposed());

        flush().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(source.observer_count(), 0);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let source = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        let effect = create_effect(move || source.get(), move |value, _| {
            sink.borrow_mut().push(format!("run {value}"));
            let sink = sink.clone();
            let value = *value;
            Cleanup::new(move || sink.borrow_mut().push(format!("cleanup {value}")))
        });

        flush().unwrap();
        source.set(1).unwrap();
        flush().unwrap();
        effect.dispose();

        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn render_effects_run_first() {
        let source = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let user = log.clone();
        create_effect(move || source.get(), move |_, _| user.borrow_mut().push("user"));
        let render = log.clone();
        create_render_effect(move || source.get(), move |_, _| render.borrow_mut().push("render"));

        flush().unwrap();
        assert_eq!(*log.borrow(), vec!["render", "user"]);
    }

    #[test]
    fn deferred_effect_skips_initial_value() {
        let source = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let r = runs.clone();
        let effect = Effect::builder(move || source.get())
            .defer()
            .build(move |_, _| r.set(r.get() + 1));

        flush().unwrap();
        assert_eq!(runs.get(), 0);

        source.set(1).unwrap();
        flush().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn error_handler_can_recover() {
        let source = Signal::new(-1);
        let seen = Rc::new(Cell::new(0));

        let sink = seen.clone();
        Effect::builder(move || {
            let n = source.get()?;
            if n < 0 {
                return Err(ReactiveError::msg("negative"));
            }
            Ok(n)
        })
        .on_error(|_| Ok(0))
        .build(move |value, _| sink.set(*value));

        flush().unwrap();
        assert_eq!(seen.get(), 0);

        source.set(7).unwrap();
        flush().unwrap();
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn unhandled_error_surfaces_from_flush() {
        let source = Signal::new(false);
        let runs = Rc::new(Cell::new(0));

        let r = runs.clone();
        create_effect(
            move || {
                if source.get()? {
                    Err(ReactiveError::msg("boom"))
                } else {
                    Ok(())
                }
            },
            move |_, _| r.set(r.get() + 1),
        );
        flush().unwrap();

        source.set(true).unwrap();
        let err = flush().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(runs.get(), 1);

        // Reported once.
        flush().unwrap();
    }

    #[test]
    fn effect_created_inside_effect_is_disposed_on_rerun() {
        let outer_source = Signal::new(0);
        let inner_runs = Rc::new(Cell::new(0));

        let counter = inner_runs.clone();
        create_effect(
            move || {
                outer_source.get()?;
                let counter = counter.clone();
                create_effect(|| Ok(()), move |_, _| counter.set(counter.get() + 1));
                Ok(())
            },
            |_, _| {},
        );

        flush().unwrap();
        assert_eq!(inner_runs.get(), 1);

        let before = with_runtime(|rt| rt.graph_len());
        outer_source.set(1).unwrap();
        flush().unwrap();
        assert_eq!(inner_runs.get(), 2);
        assert_eq!(with_runtime(|rt| rt.graph_len()), before);
    }

    #[test]
    fn effect_inside_disposed_owner_never_runs() {
        let runs = Rc::new(Cell::new(0));
        let owner = Owner::detached();

        let r = runs.clone();
        owner.run(|| create_effect(|| Ok(()), move |_, _| r.set(r.get() + 1)));
        owner.dispose();

        flush().unwrap();
        assert_eq!(runs.get(), 0);
    }
}
