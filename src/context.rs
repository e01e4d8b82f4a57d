//! Call-chain context carrying accumulated log fields.
//!
//! A [`Context`] is an immutable chain of nodes. Deriving a context adds a
//! node in front of the parent's chain; the parent and its other children are
//! unaffected, so branches can run in parallel without coordination.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::fields::Fields;

struct Node {
    parent: Option<Arc<Node>>,
    value: Box<dyn Any + Send + Sync>,
}

/// Handle to an immutable, parent-linked context chain.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

/// Field set bound to a node. Private, so no caller value can shadow it.
struct BoundFields(Fields);

static GUARD_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Entered contexts, innermost last, tagged with the id of their guard.
    static CURRENT: RefCell<Vec<(u64, Context)>> = const { RefCell::new(Vec::new()) };
}

impl Context {
    /// Empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child carrying `value`.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Node {
                parent: self.head.clone(),
                value: Box::new(value),
            })),
        }
    }

    /// Nearest value of type `T` on the chain, starting from this node.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            if let Some(value) = current.value.downcast_ref::<T>() {
                return Some(value);
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Number of nodes between this context and the root.
    pub fn depth(&self) -> usize {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref()).count()
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Derives a child whose fields are `fields` layered over this chain's.
    ///
    /// Empty `fields` return `self` without adding a node.
    pub fn inject(&self, fields: impl Into<Fields>) -> Self {
        let fields = fields.into();
        if fields.is_empty() {
            return self.clone();
        }

        let bound = match self.value::<BoundFields>() {
            Some(BoundFields(existing)) => existing.with(&fields),
            None => fields,
        };
        tracing::trace!(len = bound.len(), depth = self.depth() + 1, "injected fields");
        self.with_value(BoundFields(bound))
    }

    /// Fields bound nearest to this node, or an empty set.
    pub fn fields(&self) -> Fields {
        self.value::<BoundFields>()
            .map(|BoundFields(fields)| fields.clone())
            .unwrap_or_default()
    }

    /// Innermost context entered on this thread, or the background context.
    pub fn current() -> Self {
        CURRENT.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|(_, ctx)| ctx.clone())
                .unwrap_or_default()
        })
    }

    /// Makes this the thread's current context until the guard drops.
    ///
    /// Dropping a guard removes only its own entry, so guards may be dropped
    /// in any order; the innermost live entry stays current.
    pub fn enter(&self) -> ContextGuard {
        let id = GUARD_ID.fetch_add(1, Ordering::Relaxed);
        CURRENT.with(|stack| stack.borrow_mut().push((id, self.clone())));
        ContextGuard {
            id,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with this as the thread's current context.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth())
            .field("fields", &self.fields())
            .finish()
    }
}

/// Leaves the entered context on drop.
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|(id, _)| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

/// Layers `fields` over those already bound to `ctx`.
pub fn inject_fields(ctx: &Context, fields: impl Into<Fields>) -> Context {
    ctx.inject(fields)
}

/// Merged fields visible from `ctx`; empty when nothing was injected.
pub fn extract_fields(ctx: &Context) -> Fields {
    ctx.fields()
}
