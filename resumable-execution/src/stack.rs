use std::collections::BTreeMap;

use crate::value::{ObjRef, Value};

/// Storage behind a context's local and operand-stack views: an indexed
/// slot map plus a LIFO stack. Reads of a missing or differently typed
/// entry yield the zero of the requested type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContinuationStack {
    slots: BTreeMap<i32, Value>,
    entries: Vec<Value>,
}

macro_rules! typed_access {
    ($($store:ident, $get:ident, $push:ident, $pop:ident: $t:ty = $variant:ident, $zero:expr;)*) => {
        $(
            pub fn $store(&mut self, index: i32, v: $t) {
                self.slots.insert(index, Value::$variant(v));
            }

            pub fn $get(&self, index: i32) -> $t {
                match self.slots.get(&index) {
                    Some(Value::$variant(v)) => *v,
                    _ => $zero,
                }
            }

            pub fn $push(&mut self, v: $t) {
                self.entries.push(Value::$variant(v));
            }

            pub fn $pop(&mut self) -> $t {
                match self.entries.pop() {
                    Some(Value::$variant(v)) => v,
                    _ => $zero,
                }
            }
        )*
    }
}

impl ContinuationStack {
    pub fn new() -> Self {
        Self::default()
    }

    typed_access! {
        store_int, get_int, push_int, pop_int: i32 = Int, 0;
        store_long, get_long, push_long, pop_long: i64 = Long, 0;
        store_float, get_float, push_float, pop_float: f32 = Float, 0.0;
        store_double, get_double, push_double, pop_double: f64 = Double, 0.0;
        store_reference, get_reference, push_reference, pop_reference: Option<ObjRef> = Ref, None;
    }

    /// Untyped store. Reference stores go through here so a subroutine
    /// return address kept in a reference slot is accepted as is.
    pub fn store_value(&mut self, index: i32, v: Value) {
        self.slots.insert(index, v);
    }

    pub fn push_value(&mut self, v: Value) {
        self.entries.push(v);
    }

    pub fn increment_int(&mut self, index: i32, by: i32) {
        let v = self.get_int(index);
        self.store_int(index, v.wrapping_add(by));
    }

    pub fn slot(&self, index: i32) -> Option<Value> {
        self.slots.get(&index).copied()
    }

    pub fn slots(&self) -> impl Iterator<Item = (i32, Value)> + '_ {
        self.slots.iter().map(|(&i, &v)| (i, v))
    }

    /// Stack entries, bottom first.
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    pub fn height(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mistyped_reads_default() {
        let mut s = ContinuationStack::new();
        s.store_long(3, 1 << 40);
        assert_eq!(s.get_long(3), 1 << 40);
        assert_eq!(s.get_int(3), 0);
        assert_eq!(s.get_reference(9), None);

        s.push_float(1.5);
        assert_eq!(s.pop_double(), 0.0);
        assert_eq!(s.height(), 0);
        assert_eq!(s.pop_int(), 0);
    }

    #[test]
    fn increment_starts_from_zero() {
        let mut s = ContinuationStack::new();
        s.increment_int(1, 4);
        s.increment_int(1, -1);
        assert_eq!(s.get_int(1), 3);
        s.store_int(2, i32::MAX);
        s.increment_int(2, 1);
        assert_eq!(s.get_int(2), i32::MIN);
    }

    #[test]
    fn stack_is_lifo() {
        let mut s = ContinuationStack::new();
        s.push_int(1);
        s.push_long(2);
        s.push_reference(None);
        assert_eq!(s.entries(), &[Value::Int(1), Value::Long(2), Value::NULL]);
        assert_eq!(s.pop_reference(), None);
        assert_eq!(s.pop_long(), 2);
        assert_eq!(s.pop_int(), 1);
    }
}
