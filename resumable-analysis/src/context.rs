//! Symbolic operand stack and local slots at one program point.

use std::collections::BTreeMap;
use std::rc::Rc;

use resumable_structure::classes::Method;
use resumable_structure::descriptors::DescriptorError;
use resumable_structure::types::{Slot, TypeTag, OBJECT_CLASS};

use crate::AnalysisError;

/// Failure of a single symbolic operation, before the analyzer attaches the
/// instruction position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    Underflow,
    Undefined(Slot),
    Split,
}

impl Fault {
    pub fn at(self, at: usize) -> AnalysisError {
        match self {
            Fault::Underflow => AnalysisError::StackUnderflow { at },
            Fault::Undefined(slot) => AnalysisError::UndefinedLocal { at, slot },
            Fault::Split => AnalysisError::WideValueSplit { at },
        }
    }
}

/// Locals are shared between a node and its fallthrough successor until one
/// side writes; operand stacks are always owned.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TypesContext {
    vars: Rc<BTreeMap<Slot, TypeTag>>,
    stack: Vec<TypeTag>,
}

fn words(t: &TypeTag) -> usize {
    if t.is_wide() { 2 } else { 1 }
}

/// Stores `ty` at `slot`, dropping whatever category-2 value it overlaps.
pub fn store_local(vars: &mut BTreeMap<Slot, TypeTag>, slot: Slot, ty: TypeTag) {
    if let Some(below) = slot.checked_sub(1) {
        if vars.get(&below).map_or(false, TypeTag::is_wide) {
            vars.remove(&below);
        }
    }
    if ty.is_wide() {
        if let Some(above) = slot.checked_add(1) {
            vars.remove(&above);
        }
    }
    vars.insert(slot, ty);
}

impl TypesContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry context of `method`: `this` for instance methods, then the
    /// declared parameters.
    pub fn root(class_name: &str, method: &Method) -> Result<Self, DescriptorError> {
        let signature = method.signature()?;
        let mut ctx = TypesContext::new();
        let mut slot: Slot = 0;
        if !method.is_static() {
            ctx.set_local(0, TypeTag::reference(class_name));
            slot = 1;
        }
        for param in signature.params {
            let width = words(&param) as Slot;
            ctx.set_local(slot, param);
            slot += width;
        }
        Ok(ctx)
    }

    /// Successor view that keeps sharing the local map.
    pub fn share(&self) -> Self {
        TypesContext {
            vars: Rc::clone(&self.vars),
            stack: self.stack.clone(),
        }
    }

    /// Successor view with a private copy of the locals.
    pub fn isolate(&self) -> Self {
        TypesContext {
            vars: Rc::new((*self.vars).clone()),
            stack: self.stack.clone(),
        }
    }

    pub fn shares_locals_with(&self, other: &TypesContext) -> bool {
        Rc::ptr_eq(&self.vars, &other.vars)
    }

    pub fn stack(&self) -> &[TypeTag] {
        &self.stack
    }

    pub fn locals(&self) -> &BTreeMap<Slot, TypeTag> {
        &self.vars
    }

    pub fn push(&mut self, t: TypeTag) {
        self.stack.push(t);
    }

    /// Pops one value of either width.
    pub fn pop(&mut self) -> Result<TypeTag, Fault> {
        self.stack.pop().ok_or(Fault::Underflow)
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Pops values totalling exactly `n` words, returned bottom first.
    pub fn pop_words(&mut self, n: usize) -> Result<Vec<TypeTag>, Fault> {
        let mut taken = Vec::new();
        let mut w = 0;
        while w < n {
            let t = self.pop()?;
            w += words(&t);
            taken.push(t);
        }
        if w != n {
            return Err(Fault::Split);
        }
        taken.reverse();
        Ok(taken)
    }

    /// The JVM `dup` family: copies the top `n` words and inserts the copy
    /// beneath the next `under` words.
    pub fn dup(&mut self, n: usize, under: usize) -> Result<(), Fault> {
        let top = self.pop_words(n)?;
        let below = self.pop_words(under)?;
        self.stack.extend(top.iter().cloned());
        self.stack.extend(below);
        self.stack.extend(top);
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), Fault> {
        let top = self.pop_words(1)?;
        let below = self.pop_words(1)?;
        self.stack.extend(top);
        self.stack.extend(below);
        Ok(())
    }

    pub fn local(&self, slot: Slot) -> Result<&TypeTag, Fault> {
        self.vars.get(&slot).ok_or(Fault::Undefined(slot))
    }

    pub fn set_local(&mut self, slot: Slot, ty: TypeTag) {
        store_local(Rc::make_mut(&mut self.vars), slot, ty);
    }

    /// Relaxes a class-typed local to `java/lang/Object`. Anything else is
    /// left as it is.
    pub fn widen_local(&mut self, slot: Slot) {
        if self.vars.get(&slot).map_or(false, is_narrow_reference) {
            Rc::make_mut(&mut self.vars).insert(slot, TypeTag::object());
        }
    }

    /// As `widen_local`, for the stack entry at `index`, bottom first.
    pub fn widen_stack(&mut self, index: usize) {
        if let Some(t) = self.stack.get_mut(index) {
            if is_narrow_reference(t) {
                *t = TypeTag::object();
            }
        }
    }
}

fn is_narrow_reference(t: &TypeTag) -> bool {
    matches!(t, TypeTag::Reference(name) if name != OBJECT_CLASS)
}

/// Whether a join where `entry` was recorded and `incoming` arrives needs
/// the entry relaxed, so a restore never casts to the wrong class.
pub fn needs_widening(entry: &TypeTag, incoming: &TypeTag) -> bool {
    is_narrow_reference(entry) && matches!(incoming, TypeTag::Reference(_)) && entry != incoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumable_structure::classes::{access, Code};

    fn method(access: u16, descriptor: &str) -> Method {
        Method {
            access,
            name: "m".into(),
            descriptor: descriptor.into(),
            max_locals: 0,
            code: Code::default(),
        }
    }

    #[test]
    fn root_lays_out_parameters() {
        let ctx = TypesContext::root("a/B", &method(access::PUBLIC, "(JILjava/lang/String;)V")).unwrap();
        assert_eq!(ctx.local(0), Ok(&TypeTag::reference("a/B")));
        assert_eq!(ctx.local(1), Ok(&TypeTag::Long));
        assert_eq!(ctx.local(2), Err(Fault::Undefined(2)));
        assert_eq!(ctx.local(3), Ok(&TypeTag::Int));
        assert_eq!(ctx.local(4), Ok(&TypeTag::reference("java/lang/String")));

        let ctx = TypesContext::root("a/B", &method(access::STATIC, "(D)V")).unwrap();
        assert_eq!(ctx.local(0), Ok(&TypeTag::Double));
    }

    #[test]
    fn widening_only_touches_class_types() {
        let mut a = TypesContext::new();
        a.set_local(1, TypeTag::reference("java/lang/String"));
        a.set_local(2, TypeTag::Int);
        a.set_local(3, TypeTag::Null);
        a.push(TypeTag::reference("[I"));
        a.push(TypeTag::Long);
        let b = a.share();
        for slot in 1..4 {
            a.widen_local(slot);
        }
        a.widen_stack(0);
        a.widen_stack(1);
        assert_eq!(a.local(1), Ok(&TypeTag::object()));
        assert_eq!(a.local(2), Ok(&TypeTag::Int));
        assert_eq!(a.local(3), Ok(&TypeTag::Null));
        assert_eq!(a.stack(), &[TypeTag::object(), TypeTag::Long]);
        assert_eq!(b.local(1), Ok(&TypeTag::reference("java/lang/String")));

        assert!(needs_widening(&TypeTag::reference("a/A"), &TypeTag::reference("a/B")));
        assert!(!needs_widening(&TypeTag::reference("a/A"), &TypeTag::Null));
        assert!(!needs_widening(&TypeTag::Null, &TypeTag::reference("a/B")));
        assert!(!needs_widening(&TypeTag::object(), &TypeTag::reference("a/B")));
    }

    #[test]
    fn shared_locals_copy_on_write() {
        let mut a = TypesContext::new();
        a.set_local(1, TypeTag::Int);
        let mut b = a.share();
        assert!(b.shares_locals_with(&a));
        b.set_local(1, TypeTag::Float);
        assert!(!b.shares_locals_with(&a));
        assert_eq!(a.local(1), Ok(&TypeTag::Int));
        assert_eq!(b.local(1), Ok(&TypeTag::Float));
        assert!(!a.isolate().shares_locals_with(&a));
    }

    #[test]
    fn wide_stores_clobber_neighbours() {
        let mut ctx = TypesContext::new();
        ctx.set_local(1, TypeTag::Int);
        ctx.set_local(2, TypeTag::Int);
        ctx.set_local(1, TypeTag::Long);
        assert_eq!(ctx.local(2), Err(Fault::Undefined(2)));
        ctx.set_local(2, TypeTag::Float);
        assert_eq!(ctx.local(1), Err(Fault::Undefined(1)));
        assert_eq!(ctx.local(2), Ok(&TypeTag::Float));
    }

    #[test]
    fn dup_forms_respect_widths() {
        let mut ctx = TypesContext::new();
        ctx.push(TypeTag::Long);
        ctx.push(TypeTag::Int);
        // dup_x2 form 2: int over a long
        ctx.dup(1, 2).unwrap();
        assert_eq!(ctx.stack(), &[TypeTag::Int, TypeTag::Long, TypeTag::Int][..]);

        let mut ctx = TypesContext::new();
        ctx.push(TypeTag::Double);
        ctx.dup(2, 0).unwrap();
        assert_eq!(ctx.stack(), &[TypeTag::Double, TypeTag::Double][..]);

        let mut ctx = TypesContext::new();
        ctx.push(TypeTag::Int);
        ctx.push(TypeTag::Float);
        ctx.push(TypeTag::Null);
        ctx.dup(2, 1).unwrap();
        assert_eq!(
            ctx.stack(),
            &[TypeTag::Float, TypeTag::Null, TypeTag::Int, TypeTag::Float, TypeTag::Null][..]
        );
    }

    #[test]
    fn splitting_a_wide_value_fails() {
        let mut ctx = TypesContext::new();
        ctx.push(TypeTag::Long);
        assert_eq!(ctx.clone().dup(1, 0), Err(Fault::Split));
        assert_eq!(ctx.clone().swap(), Err(Fault::Split));
        assert_eq!(ctx.pop_words(1), Err(Fault::Split));
        assert_eq!(TypesContext::new().pop(), Err(Fault::Underflow));
    }
}
