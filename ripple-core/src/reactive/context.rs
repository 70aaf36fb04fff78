//! Keyed context injection.
//!
//! A [`Context`] is a typed key. Values are stored on owners with
//! [`set_context`] and looked up with [`get_context`], which walks from the
//! given owner towards the root and returns the first value found. A value
//! set on an inner owner shadows the outer one for that subtree only.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ReactiveError, Result};

use super::owner::Owner;
use super::runtime::with_runtime;

/// A typed context key with an optional default.
pub struct Context<T> {
    id: u64,
    default: Option<Rc<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Context<T> {
    /// A context without a default: lookups outside a provider fail.
    pub fn new() -> Self {
        Self::create(None)
    }

    /// A context that falls back to `default` outside a provider.
    pub fn with_default(default: T) -> Self {
        Self::create(Some(Rc::new(default)))
    }

    fn create(default: Option<Rc<T>>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            default,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T: Clone + 'static> Default for Context<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a context key. `default` is returned by lookups that find no
/// provider.
pub fn create_context<T: Clone + 'static>(default: Option<T>) -> Context<T> {
    match default {
        Some(value) => Context::with_default(value),
        None => Context::new(),
    }
}

/// Look up `ctx` starting at `owner`, or at the current owner.
///
/// Fails with [`ReactiveError::NoOwner`] when there is no owner to start
/// from, and with [`ReactiveError::ContextNotFound`] when no owner up the
/// chain provides the context and it has no default.
pub fn get_context<T: Clone + 'static>(ctx: &Context<T>, owner: Option<Owner>) -> Result<T> {
    let start = owner.map(|o| o.id()).or_else(|| with_runtime(|rt| rt.current_owner()));
    let found = with_runtime(|rt| rt.lookup_context(start, ctx.id))?;

    match found {
        Some(value) => value
            .downcast_ref::<T>()
            .cloned()
            .ok_or(ReactiveError::ContextNotFound(ctx.id)),
        None => ctx
            .default
            .as_deref()
            .cloned()
            .ok_or(ReactiveError::ContextNotFound(ctx.id)),
    }
}

/// Provide `value` for `ctx` on `owner`, or on the current owner.
pub fn set_context<T: Clone + 'static>(ctx: &Context<T>, value: T, owner: Option<Owner>) -> Result<()> {
    let target = owner.map(|o| o.id()).or_else(|| with_runtime(|rt| rt.current_owner()));
    with_runtime(|rt| rt.provide_context(target, ctx.id, Rc::new(value)))
}
