use std::fmt;

use crate::descriptors::parse_field_type;

pub type Slot = u16;

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";
pub const STRING_CLASS: &str = "java/lang/String";
pub const CLASS_CLASS: &str = "java/lang/Class";

/// Width of a value on the operand stack or in the local slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    One,
    Two,
}

/// Storage class of a value.
///
/// This is what decides which typed entry point of the context stores a
/// value goes through, and which values may meet at a control-flow join.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    ReturnAddress,
}

/// Symbolic type of one stack entry or local slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Pushed by `jsr`, consumed by `ret`.
    ReturnAddress,
    Null,
    /// Internal class name (`java/lang/String`) or array descriptor (`[I`).
    Reference(String),
}

impl TypeTag {
    pub fn reference<S: Into<String>>(name: S) -> Self {
        TypeTag::Reference(name.into())
    }

    pub fn object() -> Self {
        TypeTag::reference(OBJECT_CLASS)
    }

    pub fn category(&self) -> Category {
        match self {
            TypeTag::Long | TypeTag::Double => Category::Two,
            _ => Category::One,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.category() == Category::Two
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            TypeTag::Boolean
            | TypeTag::Char
            | TypeTag::Byte
            | TypeTag::Short
            | TypeTag::Int => SlotKind::Int,
            TypeTag::Float => SlotKind::Float,
            TypeTag::Long => SlotKind::Long,
            TypeTag::Double => SlotKind::Double,
            TypeTag::ReturnAddress => SlotKind::ReturnAddress,
            TypeTag::Null | TypeTag::Reference(_) => SlotKind::Reference,
        }
    }

    /// Element type, if this is an array descriptor.
    pub fn component(&self) -> Option<TypeTag> {
        match self {
            TypeTag::Reference(name) if name.starts_with('[') => parse_field_type(&name[1..]).ok(),
            _ => None,
        }
    }

    /// Class name to `checkcast` against when restoring a value of this type.
    pub fn cast_target(&self) -> Option<&str> {
        match self {
            TypeTag::Reference(name) if name != OBJECT_CLASS => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeTag::Boolean => f.write_str("Z"),
            TypeTag::Char => f.write_str("C"),
            TypeTag::Byte => f.write_str("B"),
            TypeTag::Short => f.write_str("S"),
            TypeTag::Int => f.write_str("I"),
            TypeTag::Float => f.write_str("F"),
            TypeTag::Long => f.write_str("J"),
            TypeTag::Double => f.write_str("D"),
            TypeTag::ReturnAddress => f.write_str("<address>"),
            TypeTag::Null => f.write_str("null"),
            TypeTag::Reference(name) => f.write_str(name),
        }
    }
}

/// Element type of a `newarray`, numbered as in the JVM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrayKind {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl ArrayKind {
    pub fn code(self) -> u8 {
        match self {
            ArrayKind::Boolean => 4,
            ArrayKind::Char => 5,
            ArrayKind::Float => 6,
            ArrayKind::Double => 7,
            ArrayKind::Byte => 8,
            ArrayKind::Short => 9,
            ArrayKind::Int => 10,
            ArrayKind::Long => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            4 => ArrayKind::Boolean,
            5 => ArrayKind::Char,
            6 => ArrayKind::Float,
            7 => ArrayKind::Double,
            8 => ArrayKind::Byte,
            9 => ArrayKind::Short,
            10 => ArrayKind::Int,
            11 => ArrayKind::Long,
            _ => return None,
        })
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            ArrayKind::Boolean => "[Z",
            ArrayKind::Char => "[C",
            ArrayKind::Float => "[F",
            ArrayKind::Double => "[D",
            ArrayKind::Byte => "[B",
            ArrayKind::Short => "[S",
            ArrayKind::Int => "[I",
            ArrayKind::Long => "[J",
        }
    }
}

/// Turns a binary name (`a.b.C`) into internal form (`a/b/C`).
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Descriptor of an array whose elements are of class or array type `element`.
pub fn array_of(element: &str) -> String {
    if element.starts_with('[') {
        format!("[{}", element)
    } else {
        format!("[L{};", element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(TypeTag::Long.category(), Category::Two);
        assert_eq!(TypeTag::Double.category(), Category::Two);
        assert_eq!(TypeTag::Byte.category(), Category::One);
        assert_eq!(TypeTag::Null.kind(), SlotKind::Reference);
        assert_eq!(TypeTag::Short.kind(), SlotKind::Int);
    }

    #[test]
    fn array_components() {
        assert_eq!(TypeTag::reference("[I").component(), Some(TypeTag::Int));
        assert_eq!(TypeTag::reference("[[J").component(), Some(TypeTag::reference("[J")));
        assert_eq!(
            TypeTag::reference("[Ljava/lang/String;").component(),
            Some(TypeTag::reference("java/lang/String"))
        );
        assert_eq!(TypeTag::reference("java/lang/String").component(), None);
        assert_eq!(array_of("java/lang/String"), "[Ljava/lang/String;");
        assert_eq!(array_of("[I"), "[[I");
    }

    #[test]
    fn names() {
        assert_eq!(internal_name("com.example.Flow"), "com/example/Flow");
        assert_eq!(TypeTag::object().cast_target(), None);
        assert_eq!(TypeTag::reference("a/B").cast_target(), Some("a/B"));
    }
}
