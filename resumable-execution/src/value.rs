use resumable_structure::types::{SlotKind, TypeTag};
use resumable_utils::arena_id;

use crate::{EResult, ExecError};

arena_id! {
    /// Handle of a heap object.
    pub struct ObjRef;
}

/// One operand stack entry or local. Category-2 values are a single entry.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Option<ObjRef>),
    ReturnAddress(usize),
}

impl Value {
    pub const NULL: Value = Value::Ref(None);

    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Value::Int(_) => SlotKind::Int,
            Value::Long(_) => SlotKind::Long,
            Value::Float(_) => SlotKind::Float,
            Value::Double(_) => SlotKind::Double,
            Value::Ref(_) => SlotKind::Reference,
            Value::ReturnAddress(_) => SlotKind::ReturnAddress,
        }
    }

    /// Zero value of a field or array element of type `ty`.
    pub fn default_for(ty: &TypeTag) -> Value {
        match ty.kind() {
            SlotKind::Int => Value::Int(0),
            SlotKind::Long => Value::Long(0),
            SlotKind::Float => Value::Float(0.0),
            SlotKind::Double => Value::Double(0.0),
            SlotKind::Reference | SlotKind::ReturnAddress => Value::NULL,
        }
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Ref(Some(r))
    }
}

pub trait ValCast: Sized {
    const NAME: &'static str;

    fn from_val(val: Value) -> EResult<Self>;
    fn to_val(self) -> Value;
}

macro_rules! val_cast {
    ($($t:ty => $variant:ident, $name:literal;)*) => {
        $(impl ValCast for $t {
            const NAME: &'static str = $name;

            #[inline(always)]
            fn from_val(val: Value) -> EResult<Self> {
                if let Value::$variant(v) = val {
                    Ok(v)
                } else {
                    Err(ExecError::TypeMismatch { expected: $name, found: val })
                }
            }
            #[inline(always)]
            fn to_val(self) -> Value { Value::$variant(self) }
        })*
    }
}

val_cast! {
    i32 => Int, "int";
    i64 => Long, "long";
    f32 => Float, "float";
    f64 => Double, "double";
    Option<ObjRef> => Ref, "reference";
}
