//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the dependency graph, the owner tree and the queue
//! tree, and it is the only place that calls user code.
//!
//! # How It Works
//!
//! 1. Writing a signal marks its direct observers `Stale` and everything
//!    further downstream `Check`. Effects that became dirty are enqueued in
//!    their owner's queue, and a flush is scheduled.
//!
//! 2. Reading a node first brings it up to date (`update_if_necessary`):
//!    a `Check` node walks its sources in order and recomputes only if one
//!    of them actually changed.
//!
//! 3. A flush drains the queue tree, render phase before user phase, until
//!    nothing runnable is left. Gated boundaries keep their user effects
//!    until they open.
//!
//! # Thread Safety
//!
//! There is one runtime per thread, in thread-local storage. Handles are
//! plain IDs; using one on another thread finds nothing there.
//!
//! No `RefCell` borrow is held while user code runs: equality functions,
//! derivations, side effects and cleanups are all cloned out first.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::config::{ConfigError, FlushMode, RuntimeConfig};
use crate::error::{ReactiveError, Result};
use crate::graph::node::{Node, Value};
use crate::graph::queue::{CollectStatus, QueueKind, QueueTree};
use crate::graph::store::DependencyGraph;
use crate::graph::{NodeId, NodeState, Phase, QueueId};
use crate::host::{default_host, HostScheduler};

use super::owner::{Cleanup, OwnerId, OwnerTree};
use super::snapshot::{GraphSnapshot, NodeSnapshot};
use super::tracking::{untrack, ReactiveContext};

/// Global logical clock, advanced once per completed flush.
static CLOCK: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState::new();
}

pub(crate) fn with_runtime<R>(f: impl FnOnce(&RuntimeState) -> R) -> R {
    RUNTIME.with(f)
}

fn clock() -> u64 {
    CLOCK.load(Ordering::Relaxed)
}

/// Run a cleanup, logging instead of unwinding if it panics.
fn run_guarded(cleanup: Cleanup) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| untrack(|| cleanup.run())));
    if outcome.is_err() {
        error!("cleanup panicked; remaining cleanups still run");
    }
}

pub(crate) struct RuntimeState {
    graph: RefCell<DependencyGraph>,
    owners: RefCell<OwnerTree>,
    queues: RefCell<QueueTree>,
    current_owner: Cell<Option<OwnerId>>,
    flushing: Cell<bool>,
    scheduled: Cell<bool>,
    config: RefCell<RuntimeConfig>,
    host: RefCell<Option<Rc<dyn HostScheduler>>>,
    /// Effect errors no boundary collected, reported by the next flush.
    unhandled: RefCell<Vec<ReactiveError>>,
}

/// Restores the previous owner when an owner switch ends, even on panic.
struct OwnerGuard<'a> {
    rt: &'a RuntimeState,
    previous: Option<OwnerId>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.rt.current_owner.set(self.previous);
    }
}

struct FlushGuard<'a>(&'a RuntimeState);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.flushing.set(false);
    }
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: RefCell::new(DependencyGraph::new()),
            owners: RefCell::new(OwnerTree::new()),
            queues: RefCell::new(QueueTree::new()),
            current_owner: Cell::new(None),
            flushing: Cell::new(false),
            scheduled: Cell::new(false),
            config: RefCell::new(RuntimeConfig::default()),
            host: RefCell::new(None),
            unhandled: RefCell::new(Vec::new()),
        }
    }

    // ---------------------------------------------------------------------
    // Owners
    // ---------------------------------------------------------------------

    pub(crate) fn current_owner(&self) -> Option<OwnerId> {
        self.current_owner.get()
    }

    pub(crate) fn create_owner(&self, parent: Option<OwnerId>) -> OwnerId {
        let root = self.queues.borrow().root();
        self.owners.borrow_mut().create(parent, root)
    }

    pub(crate) fn owner_exists(&self, id: OwnerId) -> bool {
        self.owners.borrow().contains(id)
    }

    pub(crate) fn owner_parent(&self, id: OwnerId) -> Option<OwnerId> {
        self.owners.borrow().get(id).and_then(|o| o.parent)
    }

    /// Run `f` with `owner` as the current owner.
    pub(crate) fn with_owner<R>(&self, owner: Option<OwnerId>, f: impl FnOnce() -> R) -> R {
        let previous = self.current_owner.replace(owner);
        let _guard = OwnerGuard { rt: self, previous };
        f()
    }

    pub(crate) fn add_cleanup(&self, owner: OwnerId, cleanup: Cleanup) -> Result<()> {
        match self.owners.borrow_mut().get_mut(owner) {
            Some(data) => {
                data.cleanups.push(cleanup);
                Ok(())
            }
            None => Err(ReactiveError::NoOwner),
        }
    }

    /// Dispose an owner: children depth-first, then its computation, then
    /// its signals and cleanups, then detach it.
    pub(crate) fn dispose_owner(&self, id: OwnerId) {
        let children = match self.owners.borrow().get(id) {
            Some(data) => data.children.clone(),
            None => return,
        };
        for child in children.into_iter().rev() {
            self.dispose_owner(child);
        }

        let node = self.owners.borrow().get(id).and_then(|o| o.node);
        if let Some(node) = node {
            self.dispose_node(node);
        }

        self.run_cleanups(id);

        let removed = self.owners.borrow_mut().remove(id);
        if let Some(queue) = removed.and_then(|data| data.boundary) {
            self.queues.borrow_mut().remove(queue);
        }
        trace!(owner = %id, "owner disposed");
    }

    /// Tear down what the previous evaluation of a scope created, keeping
    /// the scope itself.
    fn reset_scope(&self, id: OwnerId) {
        let children = match self.owners.borrow().get(id) {
            Some(data) => data.children.clone(),
            None => return,
        };
        for child in children.into_iter().rev() {
            self.dispose_owner(child);
        }
        self.run_cleanups(id);
    }

    fn run_cleanups(&self, id: OwnerId) {
        let (nodes, cleanups) = {
            let mut owners = self.owners.borrow_mut();
            match owners.get_mut(id) {
                Some(data) => (
                    std::mem::take(&mut data.nodes),
                    std::mem::take(&mut data.cleanups),
                ),
                None => return,
            }
        };

        for node in nodes {
            self.dispose_node(node);
        }
        for cleanup in cleanups.into_iter().rev() {
            run_guarded(cleanup);
        }
    }

    /// Remove a node from the graph and from wherever the scheduler still
    /// references it.
    fn dispose_node(&self, id: NodeId) {
        let Some(mut node) = self.graph.borrow_mut().remove(id) else {
            return;
        };
        node.state = NodeState::Disposed;

        if let Some(effect) = node.effect.take() {
            self.queues.borrow_mut().dequeue(effect.queue, id);
            if let Some(queue) = effect.reported {
                let revision = self.queues.borrow_mut().release(queue, id);
                self.bump(revision);
            }
            if let Some(cleanup) = effect.cleanup {
                run_guarded(cleanup);
            }
        }
        trace!(node = %id, kind = ?node.kind, "node disposed");
    }

    /// Dispose the scope of a computation, which disposes the node with it.
    pub(crate) fn dispose_computation(&self, id: NodeId) {
        let scope = self.graph.borrow().get(id).and_then(|n| n.scope);
        match scope {
            Some(scope) => self.dispose_owner(scope),
            None => self.dispose_node(id),
        }
    }

    // ---------------------------------------------------------------------
    // Context
    // ---------------------------------------------------------------------

    pub(crate) fn lookup_context(&self, owner: Option<OwnerId>, key: u64) -> Result<Option<Value>> {
        let owner = owner.ok_or(ReactiveError::NoOwner)?;
        let owners = self.owners.borrow();
        if !owners.contains(owner) {
            return Err(ReactiveError::NoOwner);
        }
        Ok(owners.lookup(owner, key))
    }

    pub(crate) fn provide_context(&self, owner: Option<OwnerId>, key: u64, value: Value) -> Result<()> {
        let owner = owner.ok_or(ReactiveError::NoOwner)?;
        match self.owners.borrow_mut().get_mut(owner) {
            Some(data) => {
                data.context.insert(key, value);
                Ok(())
            }
            None => Err(ReactiveError::NoOwner),
        }
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Register a signal under the current owner.
    pub(crate) fn create_signal(&self, node: Node) -> NodeId {
        let id = self.graph.borrow_mut().insert(node);
        if let Some(owner) = self.current_owner.get() {
            if let Some(data) = self.owners.borrow_mut().get_mut(owner) {
                data.nodes.push(id);
            }
        }
        trace!(node = %id, "signal created");
        id
    }

    /// Register a computed or effect with a scope of its own under the
    /// current owner.
    pub(crate) fn create_computation(&self, mut node: Node) -> NodeId {
        let scope = self.create_owner(self.current_owner.get());
        node.scope = Some(scope);

        let queue = self.owners.borrow().get(scope).map(|o| o.queue);
        if let (Some(effect), Some(queue)) = (node.effect.as_mut(), queue) {
            effect.queue = queue;
        }

        let id = self.graph.borrow_mut().insert(node);
        if let Some(data) = self.owners.borrow_mut().get_mut(scope) {
            data.node = Some(id);
        }
        trace!(node = %id, owner = %scope, "computation created");
        id
    }

    /// Register an effect and run its compute half right away so its
    /// dependencies are known before the first flush.
    pub(crate) fn create_effect(&self, node: Node) -> NodeId {
        let id = self.create_computation(node);
        let _ = self.recompute(id);
        id
    }

    pub(crate) fn root_queue(&self) -> QueueId {
        self.queues.borrow().root()
    }

    pub(crate) fn graph_len(&self) -> usize {
        self.graph.borrow().len()
    }

    pub(crate) fn node_state(&self, id: NodeId) -> NodeState {
        self.graph.borrow().state(id)
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.graph.borrow().get(id).map_or(0, |n| n.observers.len())
    }

    pub(crate) fn effect_runs(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get(id)
            .and_then(|n| n.effect.as_ref())
            .map_or(0, |e| e.runs)
    }

    /// Read a node, bringing it up to date first.
    pub(crate) fn read(&self, id: NodeId, tracked: bool) -> Result<Value> {
        if tracked {
            ReactiveContext::track(id);
        }
        self.update_if_necessary(id)?;

        let graph = self.graph.borrow();
        let node = graph.get(id).ok_or(ReactiveError::Disposed(id))?;
        if let Some(err) = &node.error {
            return Err(err.clone());
        }
        node.value.clone().ok_or(ReactiveError::NotReady)
    }

    /// Write a signal. Returns `false` if equality suppressed the write.
    pub(crate) fn write(&self, id: NodeId, value: Value) -> Result<bool> {
        let (old, equals) = {
            let graph = self.graph.borrow();
            let node = graph.get(id).ok_or(ReactiveError::Disposed(id))?;
            (node.value.clone(), node.equals.clone())
        };
        if let (Some(old), Some(equals)) = (&old, &equals) {
            if untrack(|| equals(&**old, &*value)) {
                return Ok(false);
            }
        }

        let effects = {
            let mut graph = self.graph.borrow_mut();
            let node = graph.get_mut(id).ok_or(ReactiveError::Disposed(id))?;
            node.value = Some(value);
            node.error = None;
            node.updated_at = clock();
            if node.observers.is_empty() {
                return Ok(true);
            }
            graph.mark_changed(id)
        };

        trace!(node = %id, dirtied = effects.len(), "signal written");
        self.enqueue_all(effects);
        self.schedule();
        Ok(true)
    }

    /// Bring a node up to date.
    ///
    /// A `Check` node verifies its sources in order and stops at the first
    /// one that turns it `Stale`. A `Stale` node recomputes. A `Check` node
    /// whose sources all turned out unchanged becomes `Clean` without
    /// recomputing.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let (state, sources) = {
            let graph = self.graph.borrow();
            let node = graph.get(id).ok_or(ReactiveError::Disposed(id))?;
            if node.computing {
                return Err(ReactiveError::Cycle(id));
            }
            let sources = match node.state {
                NodeState::Check => node.sources.clone(),
                _ => SmallVec::new(),
            };
            (node.state, sources)
        };

        if state == NodeState::Check {
            for source in sources {
                if self.update_if_necessary(source).is_err() {
                    if let Some(node) = self.graph.borrow_mut().get_mut(id) {
                        node.raise(NodeState::Stale);
                    }
                }
                if self.graph.borrow().state(id) == NodeState::Stale {
                    break;
                }
            }
        }

        let state = self.graph.borrow().state(id);
        match state {
            NodeState::Stale => self.recompute(id),
            NodeState::Check => {
                if let Some(node) = self.graph.borrow_mut().get_mut(id) {
                    node.mark_clean();
                }
                Ok(())
            }
            NodeState::Clean => Ok(()),
            NodeState::Disposed => Err(ReactiveError::Disposed(id)),
        }
    }

    /// Re-run a computation's derivation under a fresh tracking frame and
    /// commit the result.
    fn recompute(&self, id: NodeId) -> Result<()> {
        let (compute, scope) = {
            let graph = self.graph.borrow();
            let node = graph.get(id).ok_or(ReactiveError::Disposed(id))?;
            (node.compute.clone(), node.scope)
        };
        let Some(compute) = compute else {
            if let Some(node) = self.graph.borrow_mut().get_mut(id) {
                node.mark_clean();
            }
            return Ok(());
        };

        if let Some(scope) = scope {
            self.reset_scope(scope);
        }
        {
            let mut graph = self.graph.borrow_mut();
            let node = graph.get_mut(id).ok_or(ReactiveError::Disposed(id))?;
            node.mark_clean();
            node.computing = true;
        }

        let ctx = ReactiveContext::enter(id);
        let result = self.with_owner(scope, || compute());
        let sources = ctx.exit();

        {
            let mut graph = self.graph.borrow_mut();
            if let Some(node) = graph.get_mut(id) {
                node.computing = false;
            }
            graph.replace_sources(id, sources);
        }

        let result = match result {
            Err(err) if !err.is_not_ready() => self.recover(id, scope, err),
            other => other,
        };
        self.commit(id, result);
        Ok(())
    }

    /// Give an effect's error handler a chance to recover.
    fn recover(&self, id: NodeId, scope: Option<OwnerId>, err: ReactiveError) -> Result<Value> {
        let handler = self
            .graph
            .borrow()
            .get(id)
            .and_then(|n| n.effect.as_ref())
            .and_then(|e| e.on_error.clone());
        match handler {
            Some(handler) => untrack(|| self.with_owner(scope, || handler(err))),
            None => Err(err),
        }
    }

    /// Store the outcome of an evaluation and propagate if it changed.
    fn commit(&self, id: NodeId, result: Result<Value>) {
        let (old, old_error, equals) = {
            let graph = self.graph.borrow();
            let Some(node) = graph.get(id) else {
                return;
            };
            (node.value.clone(), node.error.clone(), node.equals.clone())
        };

        let changed = match (&result, &old_error) {
            (Ok(new), None) => match (&old, &equals) {
                (Some(old), Some(equals)) => !untrack(|| equals(&**old, &**new)),
                _ => true,
            },
            (Ok(_), Some(_)) => true,
            (Err(err), Some(previous)) => !(err.is_not_ready() && previous.is_not_ready()),
            (Err(_), None) => true,
        };
        let error = result.as_ref().err().cloned();

        let (effects, is_effect) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(id) else {
                return;
            };
            match result {
                Ok(value) => {
                    node.value = Some(value);
                    node.error = None;
                }
                Err(err) => node.error = Some(err),
            }
            let is_effect = node.is_effect();
            if changed {
                node.updated_at = clock();
                if error.is_none() {
                    if let Some(effect) = node.effect.as_mut() {
                        effect.pending = true;
                    }
                }
            }
            let effects = if changed {
                graph.mark_observers_stale(id)
            } else {
                Vec::new()
            };
            (effects, is_effect)
        };

        self.enqueue_all(effects);

        if is_effect {
            match error {
                Some(err) => self.report(id, err, changed),
                None => self.release(id),
            }
            self.enqueue_if_pending(id);
        }
    }

    // ---------------------------------------------------------------------
    // Boundaries
    // ---------------------------------------------------------------------

    /// Hand an effect's failure to the nearest boundary that collects it.
    fn report(&self, id: NodeId, err: ReactiveError, fresh: bool) {
        let slot = self
            .graph
            .borrow()
            .get(id)
            .and_then(|n| n.effect.as_ref())
            .map(|e| (e.queue, e.reported));
        let Some((queue, reported)) = slot else {
            return;
        };

        let status = CollectStatus::of(&err);
        let collector = self.queues.borrow().find_collector(queue, status);
        if reported.is_some() && reported != collector {
            self.release(id);
        }

        match collector {
            Some(target) => {
                let revision = self.queues.borrow_mut().collect(target, id, err);
                if let Some(effect) = self.graph.borrow_mut().get_mut(id).and_then(|n| n.effect.as_mut()) {
                    effect.reported = Some(target);
                }
                self.bump(revision);
            }
            None if status == CollectStatus::Pending => {
                trace!(node = %id, "effect waiting on a value that is not ready");
            }
            None => {
                if fresh {
                    error!(node = %id, error = %err, "unhandled error in effect");
                    self.unhandled.borrow_mut().push(err);
                }
            }
        }
    }

    /// Drop an effect from the boundary its failure was collected in.
    fn release(&self, id: NodeId) {
        let reported = self
            .graph
            .borrow_mut()
            .get_mut(id)
            .and_then(|n| n.effect.as_mut())
            .and_then(|e| e.reported.take());
        if let Some(queue) = reported {
            let revision = self.queues.borrow_mut().release(queue, id);
            self.bump(revision);
        }
    }

    /// Advance a collection's revision signal so boundaries re-derive.
    fn bump(&self, revision: Option<NodeId>) {
        let Some(revision) = revision else {
            return;
        };
        let next = {
            let graph = self.graph.borrow();
            graph
                .get(revision)
                .and_then(|n| n.value.as_ref())
                .and_then(|v| v.downcast_ref::<u64>())
                .map_or(0, |n| n + 1)
        };
        let _ = self.write(revision, Rc::new(next));
    }

    /// Give `owner` a queue of its own, nested in the one it inherited.
    pub(crate) fn create_boundary_queue(&self, owner: OwnerId, kind: QueueKind) -> QueueId {
        let parent = self
            .owners
            .borrow()
            .get(owner)
            .map_or_else(|| self.queues.borrow().root(), |o| o.queue);
        let queue = self.queues.borrow_mut().create(parent, kind);
        if let Some(data) = self.owners.borrow_mut().get_mut(owner) {
            data.queue = queue;
            data.boundary = Some(queue);
        }
        debug!(owner = %owner, queue = %queue, "boundary queue created");
        queue
    }

    pub(crate) fn first_collected(&self, queue: QueueId) -> Option<ReactiveError> {
        self.queues.borrow().first_collected(queue)
    }

    pub(crate) fn has_collected(&self, queue: QueueId) -> bool {
        !self.queues.borrow().collected(queue).is_empty()
    }

    /// Forget every failure a boundary collected.
    pub(crate) fn clear_collected(&self, queue: QueueId) {
        let nodes = self.queues.borrow().collected(queue);
        {
            let mut graph = self.graph.borrow_mut();
            for node in nodes {
                if let Some(effect) = graph.get_mut(node).and_then(|n| n.effect.as_mut()) {
                    effect.reported = None;
                }
            }
        }
        let revision = self.queues.borrow_mut().clear_collected(queue);
        self.bump(revision);
    }

    /// Hold a boundary's queue while its own content is not ready.
    ///
    /// The caller is the boundary's result computed, which re-derives on its
    /// own, so the revision signal is left alone.
    pub(crate) fn hold_content(&self, queue: QueueId, content: NodeId, waiting: bool) {
        let mut queues = self.queues.borrow_mut();
        if waiting {
            queues.collect(queue, content, ReactiveError::NotReady);
        } else {
            queues.release(queue, content);
        }
    }

    /// Re-evaluate conditional gates and re-pull collected nodes.
    ///
    /// Collected effects sit in gated queues, so nothing would otherwise
    /// pull them once their inputs resolve.
    fn refresh_gates(&self) {
        let queues = self.queues.borrow().walk();
        for queue in queues {
            let condition = self.queues.borrow().condition(queue);
            if let Some(condition) = condition {
                let hidden = match self.read(condition, false) {
                    Ok(value) => value.downcast_ref::<bool>().is_some_and(|hidden| *hidden),
                    Err(err) => err.is_not_ready(),
                };
                self.queues.borrow_mut().set_hidden(queue, hidden);
            }

            let collected = self.queues.borrow().collected(queue);
            for node in collected {
                let _ = self.update_if_necessary(node);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    fn enqueue_all(&self, effects: Vec<NodeId>) {
        let mut reaches_root = false;
        for id in effects {
            reaches_root |= self.enqueue(id);
        }
        if reaches_root {
            self.schedule();
        }
    }

    fn enqueue_if_pending(&self, id: NodeId) {
        let pending = self
            .graph
            .borrow()
            .get(id)
            .and_then(|n| n.effect.as_ref())
            .is_some_and(|e| e.pending);
        if pending && self.enqueue(id) {
            self.schedule();
        }
    }

    fn enqueue(&self, id: NodeId) -> bool {
        let target = {
            let graph = self.graph.borrow();
            graph
                .get(id)
                .and_then(|n| n.effect.as_ref().map(|e| (e.queue, e.phase, n.height)))
        };
        match target {
            Some((queue, phase, height)) => self.queues.borrow_mut().enqueue(queue, phase, id, height),
            None => false,
        }
    }

    /// Ask the host for a flush, at most once until it runs.
    fn schedule(&self) {
        if self.flushing.get() || self.scheduled.get() {
            return;
        }
        if self.config.borrow().flush_mode != FlushMode::Deferred {
            return;
        }
        self.scheduled.set(true);
        self.host().queue_task(Box::new(|| {
            if let Err(err) = with_runtime(|rt| rt.flush()) {
                error!(error = %err, "deferred flush failed");
            }
        }));
    }

    pub(crate) fn host(&self) -> Rc<dyn HostScheduler> {
        self.host
            .borrow_mut()
            .get_or_insert_with(default_host)
            .clone()
    }

    /// Run effects until the queue tree settles.
    ///
    /// Returns the first error no boundary handled. A flush started while
    /// one is already running does nothing.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.flushing.get() {
            return Ok(());
        }
        self.flushing.set(true);
        self.scheduled.set(false);
        let _guard = FlushGuard(self);
        let _untracked = ReactiveContext::untracked();

        let limit = self.config.borrow().max_flush_iterations;
        let root = self.queues.borrow().root();
        let mut iterations = 0;

        loop {
            self.refresh_gates();
            if !self.queues.borrow().has_pending(root) {
                break;
            }
            if iterations >= limit {
                self.abandon_flush(limit);
                return Err(ReactiveError::RunawayFlush(limit));
            }
            iterations += 1;
            for phase in Phase::ALL {
                self.run_queue(root, phase);
            }
        }

        if iterations > 0 {
            let tick = CLOCK.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(iterations, tick, "flush settled");
        }

        let mut unhandled = std::mem::take(&mut *self.unhandled.borrow_mut());
        if unhandled.is_empty() {
            Ok(())
        } else {
            Err(unhandled.swap_remove(0))
        }
    }

    /// Drop all queued work after a flush failed to settle.
    fn abandon_flush(&self, limit: usize) {
        warn!(limit, "flush did not settle; dropping queued effects");
        let dropped = self.queues.borrow_mut().drain_all();
        let mut graph = self.graph.borrow_mut();
        for id in dropped {
            if let Some(node) = graph.get_mut(id) {
                node.mark_clean();
                if let Some(effect) = node.effect.as_mut() {
                    effect.pending = false;
                }
            }
        }
        self.unhandled.borrow_mut().clear();
    }

    fn run_queue(&self, queue: QueueId, phase: Phase) {
        loop {
            let next = self.queues.borrow_mut().pop(queue, phase);
            match next {
                Some(id) => self.run_effect(id),
                None => break,
            }
        }
        let children = self.queues.borrow().children(queue);
        for child in children {
            self.run_queue(child, phase);
        }
    }

    /// Bring an effect up to date and, if its value changed, run its side
    /// effect with the new and previous values.
    fn run_effect(&self, id: NodeId) {
        if self.update_if_necessary(id).is_err() {
            return;
        }

        let job = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(id) else {
                return;
            };
            let failed = node.error.is_some();
            let value = node.value.clone();
            let scope = node.scope;
            let Some(effect) = node.effect.as_mut() else {
                return;
            };
            if !effect.pending || failed {
                return;
            }
            effect.pending = false;
            let Some(value) = value else {
                return;
            };
            if effect.skip_next {
                effect.skip_next = false;
                effect.previous = Some(value);
                return;
            }
            effect.runs += 1;
            let previous = effect.previous.replace(value.clone());
            (effect.run.clone(), effect.cleanup.take(), previous, value, scope, effect.queue)
        };
        let (run, cleanup, previous, value, scope, queue) = job;

        // Recomputing may have queued it again.
        self.queues.borrow_mut().dequeue(queue, id);

        if let Some(cleanup) = cleanup {
            run_guarded(cleanup);
        }
        trace!(node = %id, "running effect");
        let next = untrack(|| self.with_owner(scope, || run(&*value, previous.as_deref())));

        let orphan = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(id).and_then(|n| n.effect.as_mut()) {
                Some(effect) => {
                    effect.cleanup = next;
                    None
                }
                None => next,
            }
        };
        // The effect disposed itself while running.
        if let Some(cleanup) = orphan {
            run_guarded(cleanup);
        }
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    fn snapshot(&self) -> GraphSnapshot {
        let graph = self.graph.borrow();
        let mut nodes: Vec<NodeSnapshot> = graph
            .iter()
            .map(|node| NodeSnapshot {
                id: node.id,
                kind: node.kind,
                state: node.state,
                height: node.height,
                name: node.name.clone(),
                sources: node.sources.to_vec(),
                observers: node.observers.iter().copied().collect(),
                updated_at: node.updated_at,
            })
            .collect();
        nodes.sort_by_key(|n| n.id);

        GraphSnapshot {
            clock: clock(),
            owners: self.owners.borrow().len(),
            queued: self.queues.borrow().queued(self.queues.borrow().root()),
            nodes,
        }
    }
}

/// Process-level controls for the reactive runtime of the current thread.
pub struct Runtime;

impl Runtime {
    /// Replace the runtime configuration.
    pub fn configure(config: RuntimeConfig) -> std::result::Result<(), ConfigError> {
        config.validate()?;
        debug!(?config, "runtime configured");
        with_runtime(|rt| *rt.config.borrow_mut() = config);
        Ok(())
    }

    pub fn config() -> RuntimeConfig {
        with_runtime(|rt| rt.config.borrow().clone())
    }

    /// Install the host that deferred flushes and async work go through.
    ///
    /// Without one, [`TokioHost`] is used on first need.
    pub fn set_host(host: Rc<dyn HostScheduler>) {
        with_runtime(|rt| *rt.host.borrow_mut() = Some(host));
    }

    /// Run queued effects until nothing is left to run.
    pub fn flush() -> Result<()> {
        with_runtime(|rt| rt.flush())
    }

    /// Number of completed flushes.
    pub fn clock() -> u64 {
        clock()
    }

    /// Whether reads are being recorded right now.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Live nodes in this thread's graph.
    pub fn node_count() -> usize {
        with_runtime(|rt| rt.graph_len())
    }

    /// Live owner scopes.
    pub fn owner_count() -> usize {
        with_runtime(|rt| rt.owners.borrow().len())
    }

    /// Effects waiting in any queue, including ones held by a boundary.
    pub fn pending_effects() -> usize {
        with_runtime(|rt| {
            let queues = rt.queues.borrow();
            queues.queued(queues.root())
        })
    }

    /// A serializable picture of the graph, for debugging.
    pub fn snapshot() -> GraphSnapshot {
        with_runtime(|rt| rt.snapshot())
    }
}

/// Run queued effects until nothing is left to run.
pub fn flush() -> Result<()> {
    Runtime::flush()
}
