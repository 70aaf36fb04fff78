//! Dependency Tracking
//!
//! Each evaluation of a computed or effect installs a tracking frame. While
//! the frame is on top of the stack, every node that gets read is recorded
//! in it. When the evaluation finishes the frame is handed back to the code
//! that installed it, which rebuilds the node's source edges from it.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Nested evaluations (a computed
//! that reads another computed) push their own frame, so reads never leak
//! into the outer evaluation. `untrack` pushes a frame that records nothing.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The computation being evaluated, if any.
    observer: Option<NodeId>,
    tracking: bool,
    /// Sources read so far, in first-read order.
    sources: SmallVec<[NodeId; 4]>,
}

/// Guard for a tracking frame.
///
/// The frame is popped when the guard is dropped, so the stack stays
/// balanced even if the computation panics. [`ReactiveContext::exit`] pops it
/// early and returns what was collected.
#[derive(Debug)]
pub struct ReactiveContext {
    depth: usize,
    observer: Option<NodeId>,
    exited: bool,
}

impl ReactiveContext {
    fn push(observer: Option<NodeId>, tracking: bool) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                observer,
                tracking,
                sources: SmallVec::new(),
            });
            stack.len()
        });

        Self {
            depth,
            observer,
            exited: false,
        }
    }

    /// Enter a tracking frame for `observer`.
    pub(crate) fn enter(observer: NodeId) -> Self {
        Self::push(Some(observer), true)
    }

    /// Enter a frame that records nothing.
    pub(crate) fn untracked() -> Self {
        Self::push(None, false)
    }

    /// Whether reads are currently being recorded.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().last().is_some_and(|frame| frame.tracking))
    }

    /// The computation whose evaluation is running, if reads are tracked.
    pub fn current_observer() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .filter(|frame| frame.tracking)
                .and_then(|frame| frame.observer)
        })
    }

    /// Record a read of `source` in the innermost frame.
    pub(crate) fn track(source: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if frame.tracking && frame.observer != Some(source) && !frame.sources.contains(&source) {
                    frame.sources.push(source);
                }
            }
        });
    }

    /// Pop the frame and return the sources it collected.
    pub(crate) fn exit(mut self) -> SmallVec<[NodeId; 4]> {
        self.exited = true;
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() < self.depth {
                return SmallVec::new();
            }
            let popped = stack.drain(self.depth - 1..).next();
            match popped {
                Some(frame) => {
                    debug_assert_eq!(
                        frame.observer, self.observer,
                        "ReactiveContext mismatch: expected {:?}, got {:?}",
                        self.observer, frame.observer
                    );
                    frame.sources
                }
                None => SmallVec::new(),
            }
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() >= self.depth {
                stack.truncate(self.depth - 1);
            }
        });
    }
}

/// Run `f` without recording any reads in the current evaluation.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_observer() {
        let id = NodeId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_observer().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_observer(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_observer().is_none());
    }

    #[test]
    fn exit_returns_deduplicated_sources() {
        let id = NodeId::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let ctx = ReactiveContext::enter(id);

        ReactiveContext::track(a);
        ReactiveContext::track(b);
        ReactiveContext::track(a);
        ReactiveContext::track(id);

        assert_eq!(ctx.exit().as_slice(), &[a, b]);
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn nested_contexts_keep_reads_apart() {
        let outer = NodeId::new();
        let inner = NodeId::new();
        let (a, b) = (NodeId::new(), NodeId::new());

        let outer_ctx = ReactiveContext::enter(outer);
        ReactiveContext::track(a);
        {
            let inner_ctx = ReactiveContext::enter(inner);
            ReactiveContext::track(b);
            assert_eq!(inner_ctx.exit().as_slice(), &[b]);
        }
        assert_eq!(ReactiveContext::current_observer(), Some(outer));
        assert_eq!(outer_ctx.exit().as_slice(), &[a]);
    }

    #[test]
    fn untrack_hides_reads() {
        let id = NodeId::new();
        let hidden = NodeId::new();
        let ctx = ReactiveContext::enter(id);

        untrack(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track(hidden);
        });

        assert!(ReactiveContext::is_active());
        assert!(ctx.exit().is_empty());
    }
}
