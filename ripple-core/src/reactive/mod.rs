//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects, owners, context and boundaries.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reading it inside a computed
//! or effect records a dependency; writing it marks everything downstream.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! lazily, on the next read after one of its sources really changed.
//!
//! ## Effects
//!
//! An Effect is a tracked computation paired with an untracked side
//! effect. The side effect runs during a flush, in height order, so it
//! never observes a half-updated graph.
//!
//! ## Owners
//!
//! Everything is created under an owner. Disposing an owner tears down the
//! nodes, child owners and cleanups registered under it.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking stack to detect
//! dependencies. When a node is read, we check if there is an active
//! tracking frame and, if so, record the read in it.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod boundary;
mod computed;
mod context;
mod effect;
mod owner;
mod resource;
mod runtime;
mod signal;
mod snapshot;
mod tracking;

pub use boundary::{create_boundary, create_error_boundary, create_load_boundary, BoundaryReset};
pub use computed::{create_computed, Computed};
pub use context::{create_context, get_context, set_context, Context};
pub use effect::{create_effect, create_render_effect, Effect, EffectBuilder, IntoCleanup};
pub use owner::{create_owner, create_root, get_owner, on_cleanup, Cleanup, Owner, OwnerId};
pub use resource::{create_resource, Resource};
pub use runtime::{flush, Runtime};
pub use signal::{create_signal, ReadSignal, Signal, SignalOptions, WriteSignal};
pub use snapshot::{GraphSnapshot, NodeSnapshot};
pub use tracking::{untrack, ReactiveContext};
