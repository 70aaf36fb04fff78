//! Ownership Scopes
//!
//! Every computation, effect and signal is created under an owner. Owners
//! form a tree: disposing an owner disposes its children depth-first, then
//! its own computation, then runs its cleanups in reverse registration
//! order, then detaches it from its parent.
//!
//! Computeds and effects each get their own scope. Before a computation
//! re-runs, its scope is reset so whatever the previous run created (nested
//! effects, signals, cleanups) is torn down first.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, QueueId};

use super::runtime::with_runtime;

/// Unique identifier for an owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// A teardown callback.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

pub(crate) struct OwnerData {
    pub(crate) parent: Option<OwnerId>,
    pub(crate) children: Vec<OwnerId>,
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) context: HashMap<u64, Rc<dyn Any>>,
    /// Signals created directly in this scope.
    pub(crate) nodes: Vec<NodeId>,
    /// The computation this scope belongs to.
    pub(crate) node: Option<NodeId>,
    /// Queue that effects created in this scope notify.
    pub(crate) queue: QueueId,
    /// Boundary queue created for this scope, removed with it.
    pub(crate) boundary: Option<QueueId>,
}

/// All live owners, indexed by ID.
#[derive(Default)]
pub(crate) struct OwnerTree {
    owners: HashMap<OwnerId, OwnerData>,
}

impl OwnerTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a scope under `parent`, inheriting its queue.
    ///
    /// Without a (live) parent the scope is rootless and notifies `root_queue`.
    pub(crate) fn create(&mut self, parent: Option<OwnerId>, root_queue: QueueId) -> OwnerId {
        let id = OwnerId::new();
        let parent = parent.filter(|p| self.owners.contains_key(p));
        let queue = parent
            .and_then(|p| self.owners.get(&p))
            .map_or(root_queue, |p| p.queue);

        if let Some(parent) = parent.and_then(|p| self.owners.get_mut(&p)) {
            parent.children.push(id);
        }

        self.owners.insert(
            id,
            OwnerData {
                parent,
                children: Vec::new(),
                cleanups: Vec::new(),
                context: HashMap::new(),
                nodes: Vec::new(),
                node: None,
                queue,
                boundary: None,
            },
        );
        id
    }

    pub(crate) fn get(&self, id: OwnerId) -> Option<&OwnerData> {
        self.owners.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: OwnerId) -> Option<&mut OwnerData> {
        self.owners.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: OwnerId) -> bool {
        self.owners.contains_key(&id)
    }

    /// Remove a scope and detach it from its parent.
    pub(crate) fn remove(&mut self, id: OwnerId) -> Option<OwnerData> {
        let data = self.owners.remove(&id)?;
        if let Some(parent) = data.parent.and_then(|p| self.owners.get_mut(&p)) {
            parent.children.retain(|&c| c != id);
        }
        Some(data)
    }

    /// Walk `from -> parent -> ...` looking for a context value.
    pub(crate) fn lookup(&self, from: OwnerId, key: u64) -> Option<Rc<dyn Any>> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let data = self.owners.get(&id)?;
            if let Some(value) = data.context.get(&key) {
                return Some(value.clone());
            }
            cursor = data.parent;
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}

/// Handle to an owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: OwnerId,
}

impl Owner {
    /// Create a scope under the current owner, or a rootless one if there is
    /// no current owner.
    pub fn new() -> Self {
        let id = with_runtime(|rt| rt.create_owner(rt.current_owner()));
        Self { id }
    }

    /// Create a rootless scope, ignoring the current owner.
    pub fn detached() -> Self {
        let id = with_runtime(|rt| rt.create_owner(None));
        Self { id }
    }

    pub(crate) fn from_id(id: OwnerId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// The owner active right now, if any.
    pub fn current() -> Option<Self> {
        with_runtime(|rt| rt.current_owner()).map(Self::from_id)
    }

    pub fn parent(&self) -> Option<Self> {
        with_runtime(|rt| rt.owner_parent(self.id)).map(Self::from_id)
    }

    /// Run `f` with this owner active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        with_runtime(|rt| rt.with_owner(Some(self.id), f))
    }

    /// Register a cleanup on this owner.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> Result<()> {
        with_runtime(|rt| rt.add_cleanup(self.id, Cleanup::new(f)))
    }

    /// Dispose this owner and everything under it. Idempotent.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_owner(self.id))
    }

    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.owner_exists(self.id))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a scope under the current owner.
pub fn create_owner() -> Owner {
    Owner::new()
}

/// Run `f` inside a fresh rootless scope. The scope lives until
/// `Owner::dispose` is called on the handle `f` receives.
pub fn create_root<R>(f: impl FnOnce(Owner) -> R) -> R {
    let owner = Owner::detached();
    owner.run(|| f(owner))
}

/// The owner active right now, if any.
pub fn get_owner() -> Option<Owner> {
    Owner::current()
}

/// Register `f` to run when the current owner is disposed or reset.
pub fn on_cleanup(f: impl FnOnce() + 'static) -> Result<()> {
    match Owner::current() {
        Some(owner) => owner.on_cleanup(f),
        None => Err(ReactiveError::NoOwner),
    }
}
