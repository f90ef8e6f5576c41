use std::collections::HashMap;

use resumable_structure::contract::{CONTEXT_CLASS, STACK_CLASS};
use resumable_structure::types::{CLASS_CLASS, STRING_CLASS};
use resumable_utils::Arena;

use crate::context::ContextId;
use crate::value::{ObjRef, Value};
use crate::{EResult, ExecError};

#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Instance { class: String, fields: HashMap<String, Value> },
    /// `descriptor` is the array type itself, e.g. `[I`.
    Array { descriptor: String, elems: Vec<Value> },
    Str(String),
    Class(String),
    Context(ContextId),
    LocalVars(ContextId),
    LocalStack(ContextId),
}

impl Object {
    pub fn instance<S: Into<String>>(class: S) -> Self {
        Object::Instance { class: class.into(), fields: HashMap::new() }
    }

    pub fn class_name(&self) -> &str {
        match self {
            Object::Instance { class, .. } => class,
            Object::Array { descriptor, .. } => descriptor,
            Object::Str(_) => STRING_CLASS,
            Object::Class(_) => CLASS_CLASS,
            Object::Context(_) => CONTEXT_CLASS,
            Object::LocalVars(_) | Object::LocalStack(_) => STACK_CLASS,
        }
    }
}

/// Objects are never collected.
#[derive(Default)]
pub struct Heap {
    objects: Arena<ObjRef, Object>,
    strings: HashMap<String, ObjRef>,
    views: HashMap<(ContextId, ContextView), ObjRef>,
}

/// Which face of a context a handle exposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextView {
    Context,
    LocalVars,
    LocalStack,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, obj: Object) -> ObjRef {
        self.objects.append(obj)
    }

    pub fn get(&self, r: ObjRef) -> EResult<&Object> {
        self.objects.get(r).ok_or(ExecError::DanglingRef(r))
    }

    pub fn get_mut(&mut self, r: ObjRef) -> EResult<&mut Object> {
        self.objects.get_mut(r).ok_or(ExecError::DanglingRef(r))
    }

    pub fn class_of(&self, r: ObjRef) -> EResult<&str> {
        Ok(self.get(r)?.class_name())
    }

    /// String constants with equal contents share one object.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(&r) = self.strings.get(s) {
            return r;
        }
        let r = self.alloc(Object::Str(s.to_string()));
        self.strings.insert(s.to_string(), r);
        r
    }

    pub fn string(&self, r: ObjRef) -> Option<&str> {
        match self.objects.get(r) {
            Some(Object::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// The single handle for `view` of context `id`.
    pub fn context_handle(&mut self, id: ContextId, view: ContextView) -> ObjRef {
        if let Some(&r) = self.views.get(&(id, view)) {
            return r;
        }
        let r = self.alloc(match view {
            ContextView::Context => Object::Context(id),
            ContextView::LocalVars => Object::LocalVars(id),
            ContextView::LocalStack => Object::LocalStack(id),
        });
        self.views.insert((id, view), r);
        r
    }

    pub fn field(&self, r: ObjRef, name: &str) -> Option<Value> {
        match self.objects.get(r) {
            Some(Object::Instance { fields, .. }) => fields.get(name).copied(),
            _ => None,
        }
    }

    pub fn set_field(&mut self, r: ObjRef, name: &str, v: Value) -> EResult<()> {
        match self.get_mut(r)? {
            Object::Instance { fields, .. } => {
                fields.insert(name.to_string(), v);
                Ok(())
            }
            _ => Err(ExecError::TypeMismatch { expected: "instance", found: Value::from(r) }),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
