//! Ripple Core
//!
//! This crate provides a single-threaded, push-pull reactive runtime. It
//! implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Height-ordered, glitch-free effect scheduling
//! - Ownership scopes with cleanups and keyed context
//! - Conditional, load and error boundaries
//! - Async resources driven by a pluggable host scheduler
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, owners and the runtime
//! - `graph`: Dependency graph, height heap and queue tree
//! - `host`: Event-loop abstraction for deferred work
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{create_effect, flush, Computed, Signal};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new(move || Ok(count.get()? * 2));
//!
//! // Create an effect
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! create_effect(move || doubled.get(), move |value, _| sink.set(*value));
//!
//! // Update the signal and flush pending effects
//! count.set(5).unwrap();
//! flush().unwrap();
//! assert_eq!(seen.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod reactive;

pub use config::{ConfigError, FlushMode, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use graph::{NodeId, NodeKind, NodeState};
pub use host::{HostScheduler, ManualHost, TokioHost};
pub use reactive::{
    create_boundary, create_computed, create_context, create_effect, create_error_boundary,
    create_load_boundary, create_owner, create_render_effect, create_resource, create_root,
    create_signal, flush, get_context, get_owner, on_cleanup, set_context, untrack, BoundaryReset,
    Cleanup, Computed, Context, Effect, EffectBuilder, GraphSnapshot, IntoCleanup, NodeSnapshot,
    Owner, ReadSignal, Resource, Runtime, Signal, SignalOptions, WriteSignal,
};
