//! Scoped logging context.
//!
//! A [`ScopeStack`] holds frames of key/value pairs. Every record built
//! while frames are active carries their merged context (outer to inner,
//! inner keys win). Stacks are strictly LIFO: only the top frame can be
//! popped.
//!
//! The ambient API ([`begin`], [`current_context`], [`ScopeGuard`]) works on
//! the stack of the current execution context: a task-local stack inside
//! [`scoped`], otherwise a thread-local one. Stacks are never shared between
//! contexts.

use crate::format::FormatterRegistry;
use crate::template::MessageTemplate;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_STACK: RefCell<ScopeStack> = RefCell::new(ScopeStack::new());
}

tokio::task_local! {
    static TASK_STACK: RefCell<ScopeStack>;
}

/// Stacks of tokio tasks not running inside [`scoped`]. A task migrates
/// between worker threads and shares them with other tasks, so the
/// thread-local stack cannot serve it.
static TASK_ID_STACKS: OnceLock<Mutex<HashMap<tokio::task::Id, ScopeStack>>> = OnceLock::new();

/// Scope discipline violations. These indicate a caller bug and are never
/// swallowed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope frame {frame} popped from an empty stack")]
    Empty { frame: u64 },

    #[error("scope frame {frame} popped out of order; top of stack is frame {top}")]
    OutOfOrder { frame: u64, top: u64 },
}

/// One level of scope context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFrame {
    properties: Vec<(String, Value)>,
    message: Option<String>,
}

impl ScopeFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property; a later value for the same key replaces the earlier.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((key, value)),
        }
        self
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        pairs.into_iter().fold(Self::new(), |frame, (k, v)| frame.with(k, v))
    }

    /// Template form, e.g. `ScopeFrame::from_template("UserId:{UserId}", &[123.into()])`.
    ///
    /// Bound placeholders become properties and the rendered text is kept as
    /// the frame message.
    pub fn from_template(template: &str, args: &[Value]) -> Self {
        Self::from_template_with(template, args, FormatterRegistry::shared_standard())
    }

    pub fn from_template_with(template: &str, args: &[Value], formatters: &FormatterRegistry) -> Self {
        let rendered = MessageTemplate::parse(template).render(args, formatters);
        let frame = rendered
            .fields
            .into_iter()
            .fold(Self::new(), |frame, field| frame.with(field.name, field.value));
        Self {
            message: Some(rendered.text),
            ..frame
        }
    }

    pub fn properties(&self) -> &[(String, Value)] {
        &self.properties
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Identifies one pushed frame. Consumed by [`ScopeStack::pop`].
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle {
    id: u64,
}

impl FrameHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Merged view of a stack at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeSnapshot {
    pub properties: BTreeMap<String, Value>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<(u64, ScopeFrame)>,
    /// Template messages of the context this stack was forked from.
    inherited_messages: Vec<String>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new stack whose single base frame is the current context's merged
    /// properties, keeping its template messages ahead of the stack's own.
    /// Used to hand a parent's context to a child task.
    pub fn fork_current() -> Self {
        let snapshot = snapshot();
        let mut stack = Self {
            frames: Vec::new(),
            inherited_messages: snapshot.messages,
        };
        if !snapshot.properties.is_empty() {
            stack.push(ScopeFrame::from_pairs(snapshot.properties));
        }
        stack
    }

    pub fn push(&mut self, frame: ScopeFrame) -> FrameHandle {
        let id = NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed);
        self.frames.push((id, frame));
        FrameHandle { id }
    }

    /// Pop the frame identified by `handle`, which must be the top frame.
    /// On error the stack is left untouched.
    pub fn pop(&mut self, handle: FrameHandle) -> Result<ScopeFrame, ScopeError> {
        match self.frames.last() {
            None => Err(ScopeError::Empty { frame: handle.id }),
            Some((top, _)) if *top != handle.id => Err(ScopeError::OutOfOrder {
                frame: handle.id,
                top: *top,
            }),
            Some(_) => Ok(self.frames.pop().map(|(_, frame)| frame).unwrap_or_default()),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Fold all frames outer to inner; inner keys override outer ones.
    pub fn current_context(&self) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for (_, frame) in &self.frames {
            for (key, value) in &frame.properties {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Messages of template-form frames, outer to inner.
    pub fn messages(&self) -> Vec<String> {
        self.inherited_messages
            .iter()
            .cloned()
            .chain(self.frames.iter().filter_map(|(_, frame)| frame.message.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            properties: self.current_context(),
            messages: self.messages(),
        }
    }
}

/// Run `f` against the active stack of the current execution context: the
/// task-local stack inside [`scoped`], else the stack of the running tokio
/// task, else the thread-local one.
fn with_active<R>(f: impl FnOnce(&mut ScopeStack) -> R) -> R {
    if TASK_STACK.try_with(|_| ()).is_ok() {
        return TASK_STACK.with(|cell| f(&mut cell.borrow_mut()));
    }
    match tokio::task::try_id() {
        Some(id) => {
            let mut stacks = TASK_ID_STACKS
                .get_or_init(Default::default)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let stack = stacks.entry(id).or_default();
            let out = f(stack);
            // Task ids are reused once a task is gone; never keep an empty entry.
            if stack.is_empty() && stack.inherited_messages.is_empty() {
                stacks.remove(&id);
            }
            out
        }
        None => THREAD_STACK.with(|cell| f(&mut cell.borrow_mut())),
    }
}

/// Pops its frame when dropped or explicitly closed.
///
/// Dropping a guard out of order is a programming error and panics, unless
/// the thread is already unwinding, in which case the violation is logged.
#[must_use = "the scope ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    handle: Option<FrameHandle>,
}

impl ScopeGuard {
    pub fn frame_id(&self) -> Option<u64> {
        self.handle.as_ref().map(FrameHandle::id)
    }

    /// End the scope now and report a discipline violation as an error.
    pub fn close(mut self) -> Result<(), ScopeError> {
        match self.handle.take() {
            Some(handle) => with_active(|stack| stack.pop(handle)).map(drop),
            None => Ok(()),
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(err) = with_active(|stack| stack.pop(handle)) {
            if std::thread::panicking() {
                tracing::error!(error = %err, "scope discipline violated while unwinding");
            } else {
                panic!("scope discipline violated: {err}");
            }
        }
    }
}

/// Push `frame` onto the current context's stack.
///
/// Inside a tokio task that is not wrapped in [`scoped`], the frame goes on
/// a stack owned by that task and starts empty. Wrap the future in
/// [`scoped_with`]`(`[`ScopeStack::fork_current`]`(), ..)` to inherit the
/// spawner's context.
pub fn begin(frame: ScopeFrame) -> ScopeGuard {
    let handle = with_active(|stack| stack.push(frame));
    ScopeGuard { handle: Some(handle) }
}

/// Shorthand for [`begin`] with a template-form frame.
pub fn begin_template(template: &str, args: &[Value]) -> ScopeGuard {
    begin(ScopeFrame::from_template(template, args))
}

/// Merged properties of the current context's stack.
pub fn current_context() -> BTreeMap<String, Value> {
    with_active(|stack| stack.current_context())
}

pub fn snapshot() -> ScopeSnapshot {
    with_active(|stack| stack.snapshot())
}

pub fn depth() -> usize {
    with_active(|stack| stack.depth())
}

/// Run `fut` with its own, initially empty, task-local stack.
pub async fn scoped<F: Future>(fut: F) -> F::Output {
    scoped_with(ScopeStack::new(), fut).await
}

/// Run `fut` with `stack` as its task-local stack, e.g. one produced by
/// [`ScopeStack::fork_current`].
pub async fn scoped_with<F: Future>(stack: ScopeStack, fut: F) -> F::Output {
    TASK_STACK.scope(RefCell::new(stack), fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_outer_to_inner() {
        let mut stack = ScopeStack::new();
        let outer = stack.push(ScopeFrame::new().with("OrderId", "ORD1").with("Stage", "outer"));
        let inner = stack.push(ScopeFrame::new().with("UserId", "U1").with("Stage", "inner"));

        let ctx = stack.current_context();
        assert_eq!(ctx.get("OrderId"), Some(&Value::from("ORD1")));
        assert_eq!(ctx.get("UserId"), Some(&Value::from("U1")));
        assert_eq!(ctx.get("Stage"), Some(&Value::from("inner")));

        stack.pop(inner).unwrap();
        assert_eq!(stack.current_context().get("Stage"), Some(&Value::from("outer")));
        stack.pop(outer).unwrap();
        assert!(stack.current_context().is_empty());
    }

    #[test]
    fn pop_restores_previous_context_at_every_depth() {
        let mut stack = ScopeStack::new();
        let mut handles = Vec::new();
        let mut history = vec![stack.current_context()];
        for depth in 0..8 {
            handles.push(stack.push(ScopeFrame::new().with(format!("k{}", depth % 3), depth)));
            history.push(stack.current_context());
        }
        while let Some(handle) = handles.pop() {
            history.pop();
            stack.pop(handle).unwrap();
            assert_eq!(Some(&stack.current_context()), history.last());
        }
    }

    #[test]
    fn out_of_order_pop_is_rejected_and_leaves_stack_intact() {
        let mut stack = ScopeStack::new();
        let first = stack.push(ScopeFrame::new().with("a", 1));
        let second = stack.push(ScopeFrame::new().with("b", 2));
        let first_id = first.id();
        let second_id = second.id();

        let err = stack.pop(first).unwrap_err();
        assert_eq!(err, ScopeError::OutOfOrder { frame: first_id, top: second_id });
        assert_eq!(stack.depth(), 2);
        stack.pop(second).unwrap();
    }

    #[test]
    fn pop_on_empty_stack_is_rejected() {
        let mut other = ScopeStack::new();
        let handle = other.push(ScopeFrame::new());
        let mut empty = ScopeStack::new();
        assert!(matches!(empty.pop(handle), Err(ScopeError::Empty { .. })));
    }

    #[test]
    fn template_frame_binds_property_and_message() {
        let frame = ScopeFrame::from_template("UserId:{UserId}", &[123.into()]);
        assert_eq!(frame.properties(), &[("UserId".to_string(), Value::Integer(123))]);
        assert_eq!(frame.message(), Some("UserId:123"));
    }

    #[test]
    fn guards_pop_on_drop_including_early_return() {
        fn early(fail: bool) -> Result<usize, ()> {
            let _guard = begin(ScopeFrame::new().with("Attempt", 1));
            if fail {
                return Err(());
            }
            Ok(depth())
        }

        assert_eq!(depth(), 0);
        assert_eq!(early(false), Ok(1));
        assert_eq!(early(true), Err(()));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn guard_pops_during_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = begin(ScopeFrame::new().with("Doomed", true));
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn close_reports_out_of_order_release() {
        let outer = begin(ScopeFrame::new().with("a", 1));
        let inner = begin(ScopeFrame::new().with("b", 2));
        assert!(matches!(outer.close(), Err(ScopeError::OutOfOrder { .. })));
        inner.close().unwrap();
        // The rejected outer frame is still on the stack.
        assert_eq!(depth(), 1);
        THREAD_STACK.with(|cell| cell.borrow_mut().frames.clear());
    }

    #[test]
    #[should_panic(expected = "scope discipline violated")]
    fn dropping_guard_out_of_order_panics() {
        let outer = begin(ScopeFrame::new().with("a", 1));
        let _inner = begin(ScopeFrame::new().with("b", 2));
        drop(outer);
    }

    #[test]
    fn threads_have_independent_stacks() {
        let _guard = begin(ScopeFrame::new().with("Main", true));
        let seen = std::thread::spawn(|| current_context().contains_key("Main"))
            .join()
            .unwrap();
        assert!(!seen);
        assert!(current_context().contains_key("Main"));
    }

    #[tokio::test]
    async fn tasks_get_their_own_stack() {
        let _outer = begin(ScopeFrame::new().with("Thread", "main"));

        let child = tokio::spawn(scoped(async {
            let _g = begin(ScopeFrame::new().with("Task", 1));
            tokio::task::yield_now().await;
            current_context()
        }))
        .await
        .unwrap();

        assert!(child.contains_key("Task"));
        assert!(!child.contains_key("Thread"));
        assert!(!current_context().contains_key("Task"));
    }

    #[tokio::test]
    async fn unscoped_tasks_on_one_thread_do_not_share_frames() {
        let (a_started, b_waits) = tokio::sync::oneshot::channel::<()>();
        let (b_checked, a_waits) = tokio::sync::oneshot::channel::<bool>();

        let a = tokio::spawn(async move {
            let _g = begin(ScopeFrame::new().with("TaskA", 1));
            a_started.send(()).unwrap();
            let b_saw_a = a_waits.await.unwrap();
            let ctx = current_context();
            (b_saw_a, ctx.contains_key("TaskA"), ctx.contains_key("TaskB"))
        });
        let b = tokio::spawn(async move {
            b_waits.await.unwrap();
            let _g = begin(ScopeFrame::new().with("TaskB", 2));
            b_checked.send(current_context().contains_key("TaskA")).unwrap();
            tokio::task::yield_now().await;
            depth()
        });

        let (b_saw_a, a_sees_own, a_saw_b) = a.await.unwrap();
        assert_eq!(b.await.unwrap(), 1);
        assert!(!b_saw_a);
        assert!(a_sees_own);
        assert!(!a_saw_b);
        assert_eq!(depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unscoped_task_keeps_its_frames_across_awaits() {
        let seen = tokio::spawn(async {
            let _g = begin(ScopeFrame::new().with("RequestId", "REQ-7"));
            for _ in 0..10 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            current_context()
        })
        .await
        .unwrap();
        assert_eq!(seen.get("RequestId"), Some(&Value::from("REQ-7")));
    }

    #[tokio::test]
    async fn forked_stack_keeps_template_messages() {
        let _outer = begin_template("UserId:{UserId}", &[Value::from(123)]);
        let inherited = scoped_with(ScopeStack::fork_current(), async {
            let _g = begin_template("Step:{Step}", &[Value::from("Save")]);
            snapshot()
        })
        .await;
        assert_eq!(inherited.messages, ["UserId:123", "Step:Save"]);
        assert_eq!(inherited.properties.get("UserId"), Some(&Value::Integer(123)));
    }

    #[tokio::test]
    async fn forked_stack_inherits_parent_context() {
        let _outer = begin(ScopeFrame::new().with("RequestId", "REQ-1"));
        let inherited = scoped_with(ScopeStack::fork_current(), async {
            let _g = begin(ScopeFrame::new().with("SubOp", "Validation"));
            current_context()
        })
        .await;
        assert_eq!(inherited.get("RequestId"), Some(&Value::from("REQ-1")));
        assert_eq!(inherited.get("SubOp"), Some(&Value::from("Validation")));
        assert_eq!(depth(), 1);
    }
}
