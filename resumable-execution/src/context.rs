use tracing::debug;

use resumable_utils::{arena_id, Arena};

use crate::stack::ContinuationStack;
use crate::value::Value;
use crate::{EResult, ExecError};

arena_id! {
    pub struct ContextId;
}

/// Label value of a context that has no pending resumption.
pub const NO_LABEL: i32 = -1;

#[derive(Clone, Debug, PartialEq)]
pub struct CapturedContext {
    /// Context this one was cloned from when it was resumed.
    pub parent: Option<ContextId>,
    pub label: i32,
    pub local_vars: ContinuationStack,
    pub local_stack: ContinuationStack,
    pub call_answer: Option<Value>,
    pub registered: bool,
}

impl CapturedContext {
    fn fresh(parent: Option<ContextId>) -> Self {
        CapturedContext {
            parent,
            label: NO_LABEL,
            local_vars: ContinuationStack::new(),
            local_stack: ContinuationStack::new(),
            call_answer: None,
            registered: false,
        }
    }
}

/// Owns every live context. A resumed context is never run in place: it is
/// cloned under a new id, so the original stays available for step-back.
#[derive(Default)]
pub struct ContextManager {
    contexts: Arena<ContextId, CapturedContext>,
    pending: Option<ContextId>,
    current: Option<ContextId>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the prologue of every rewritten method. Hands out the
    /// context queued by `resume`, or a fresh one.
    pub fn create_or_reset(&mut self) -> ContextId {
        let id = match self.pending.take() {
            Some(id) if self.contexts.contains(id) => id,
            _ => self.contexts.append(CapturedContext::fresh(None)),
        };
        self.current = Some(id);
        id
    }

    /// Clones `id` and queues the clone for the next `create_or_reset`.
    pub fn resume(&mut self, id: ContextId) -> EResult<ContextId> {
        let mut clone = self.get(id)?.clone();
        clone.parent = Some(id);
        clone.registered = false;
        let new = self.contexts.append(clone);
        debug!(from = id.0, to = new.0, "resuming context");
        self.pending = Some(new);
        Ok(new)
    }

    /// Queues a clone of `id` that hands `value` to the pending call site.
    pub fn answer(&mut self, id: ContextId, value: Value) -> EResult<ContextId> {
        let new = self.resume(id)?;
        self.get_mut(new)?.call_answer = Some(value);
        Ok(new)
    }

    /// Forgets any queued resumption.
    pub fn reset(&mut self) {
        self.pending = None;
        self.current = None;
    }

    pub fn register(&mut self, id: ContextId) -> EResult<()> {
        self.get_mut(id)?.registered = true;
        Ok(())
    }

    pub fn deactivate(&mut self, id: ContextId) -> Option<CapturedContext> {
        debug!(context = id.0, "deactivating context");
        self.contexts.remove(id)
    }

    /// Context most recently handed out by `create_or_reset`. It may have
    /// been deactivated since.
    pub fn current(&self) -> Option<ContextId> {
        self.current
    }

    pub fn get(&self, id: ContextId) -> EResult<&CapturedContext> {
        self.contexts.get(id).ok_or(ExecError::UnknownContext(id))
    }

    pub fn get_mut(&mut self, id: ContextId) -> EResult<&mut CapturedContext> {
        self.contexts.get_mut(id).ok_or(ExecError::UnknownContext(id))
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains(id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_clones_with_parent() {
        let mut m = ContextManager::new();
        let a = m.create_or_reset();
        m.get_mut(a).unwrap().label = 1;
        m.get_mut(a).unwrap().local_vars.store_int(1, 5);

        let b = m.resume(a).unwrap();
        assert_ne!(a, b);
        assert_eq!(m.create_or_reset(), b);
        let ctx = m.get(b).unwrap();
        assert_eq!(ctx.parent, Some(a));
        assert_eq!(ctx.label, 1);
        assert_eq!(ctx.local_vars.get_int(1), 5);

        // the queue is consumed
        let c = m.create_or_reset();
        assert_ne!(c, b);
        assert_eq!(m.get(c).unwrap().label, NO_LABEL);
    }

    #[test]
    fn deactivate_removes() {
        let mut m = ContextManager::new();
        let a = m.create_or_reset();
        assert_eq!(m.current(), Some(a));
        assert!(m.deactivate(a).is_some());
        assert!(!m.contains(a));
        assert_eq!(m.current(), Some(a));
        assert_eq!(m.resume(a), Err(ExecError::UnknownContext(a)));
    }

    #[test]
    fn answer_is_stored_on_the_clone() {
        let mut m = ContextManager::new();
        let a = m.create_or_reset();
        let b = m.answer(a, Value::Int(7)).unwrap();
        assert_eq!(m.get(a).unwrap().call_answer, None);
        assert_eq!(m.get(b).unwrap().call_answer, Some(Value::Int(7)));
    }
}
