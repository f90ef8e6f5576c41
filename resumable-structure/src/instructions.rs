use crate::types::{ArrayKind, Category, Slot, SlotKind};

/// Symbolic jump target. Defined by an `Instr::Label` in the same method.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Label(pub u32);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new<A: Into<String>, B: Into<String>, C: Into<String>>(owner: A, name: B, descriptor: C) -> Self {
        MethodRef {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        self != InvokeKind::Static
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    // constants
    Nop,
    AConstNull,
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    BiPush(i8),
    SiPush(i16),
    Ldc(Constant),

    // local variable instructions
    ILoad(Slot),
    LLoad(Slot),
    FLoad(Slot),
    DLoad(Slot),
    ALoad(Slot),
    IStore(Slot),
    LStore(Slot),
    FStore(Slot),
    DStore(Slot),
    AStore(Slot),
    IInc(Slot, i16),

    // array instructions
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    NewArray(ArrayKind),
    ANewArray(String),
    MultiANewArray(String, u8),
    ArrayLength,

    // stack instructions
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,

    // numeric instructions
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    IShl,
    LShl,
    IShr,
    LShr,
    IUShr,
    LUShr,
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,

    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,

    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,

    // control instructions
    IfEq(Label),
    IfNe(Label),
    IfLt(Label),
    IfGe(Label),
    IfGt(Label),
    IfLe(Label),
    IfICmpEq(Label),
    IfICmpNe(Label),
    IfICmpLt(Label),
    IfICmpGe(Label),
    IfICmpGt(Label),
    IfICmpLe(Label),
    IfACmpEq(Label),
    IfACmpNe(Label),
    IfNull(Label),
    IfNonNull(Label),
    Goto(Label),
    Jsr(Label),
    Ret(Slot),
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,

    // object instructions
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    InvokeVirtual(MethodRef),
    InvokeSpecial(MethodRef),
    InvokeStatic(MethodRef),
    InvokeInterface(MethodRef),
    InvokeDynamic {
        name: String,
        descriptor: String,
    },
    New(String),
    AThrow,
    CheckCast(String),
    InstanceOf(String),
    MonitorEnter,
    MonitorExit,

    // pseudo instructions
    Label(Label),
}

impl Instr {
    /// Every label this instruction may transfer control to, fallthrough excluded.
    pub fn branch_targets(&self) -> Vec<Label> {
        use self::Instr::*;
        match self {
            IfEq(l) | IfNe(l) | IfLt(l) | IfGe(l) | IfGt(l) | IfLe(l)
            | IfICmpEq(l) | IfICmpNe(l) | IfICmpLt(l) | IfICmpGe(l) | IfICmpGt(l) | IfICmpLe(l)
            | IfACmpEq(l) | IfACmpNe(l) | IfNull(l) | IfNonNull(l)
            | Goto(l) | Jsr(l) => vec![*l],
            TableSwitch { default, targets, .. } => {
                let mut v = targets.clone();
                v.push(*default);
                v
            }
            LookupSwitch { default, pairs } => {
                let mut v = pairs.iter().map(|&(_, l)| l).collect::<Vec<_>>();
                v.push(*default);
                v
            }
            _ => vec![],
        }
    }

    /// Whether execution may continue with the next instruction in the stream.
    pub fn falls_through(&self) -> bool {
        use self::Instr::*;
        !matches!(
            self,
            Goto(_) | Ret(_) | TableSwitch { .. } | LookupSwitch { .. } | AThrow
                | IReturn | LReturn | FReturn | DReturn | AReturn | Return
        )
    }

    /// Whether this instruction terminates a basic block.
    pub fn ends_block(&self) -> bool {
        !self.falls_through() || !self.branch_targets().is_empty()
    }

    pub fn is_return(&self) -> bool {
        use self::Instr::*;
        matches!(self, IReturn | LReturn | FReturn | DReturn | AReturn | Return)
    }

    /// Slot and storage kind written by a local store.
    pub fn stored_slot(&self) -> Option<(Slot, SlotKind)> {
        use self::Instr::*;
        match *self {
            IStore(s) => Some((s, SlotKind::Int)),
            LStore(s) => Some((s, SlotKind::Long)),
            FStore(s) => Some((s, SlotKind::Float)),
            DStore(s) => Some((s, SlotKind::Double)),
            AStore(s) => Some((s, SlotKind::Reference)),
            _ => None,
        }
    }

    /// Any local slot read or written, with the width of the access.
    pub fn local_access(&self) -> Option<(Slot, Category)> {
        use self::Instr::*;
        match *self {
            ILoad(s) | FLoad(s) | ALoad(s) | IStore(s) | FStore(s) | AStore(s) | IInc(s, _)
            | Ret(s) => Some((s, Category::One)),
            LLoad(s) | DLoad(s) | LStore(s) | DStore(s) => Some((s, Category::Two)),
            _ => None,
        }
    }

    pub fn invocation(&self) -> Option<(InvokeKind, &MethodRef)> {
        use self::Instr::*;
        match self {
            InvokeVirtual(m) => Some((InvokeKind::Virtual, m)),
            InvokeSpecial(m) => Some((InvokeKind::Special, m)),
            InvokeStatic(m) => Some((InvokeKind::Static, m)),
            InvokeInterface(m) => Some((InvokeKind::Interface, m)),
            _ => None,
        }
    }

    pub fn invoke(kind: InvokeKind, m: MethodRef) -> Instr {
        match kind {
            InvokeKind::Virtual => Instr::InvokeVirtual(m),
            InvokeKind::Special => Instr::InvokeSpecial(m),
            InvokeKind::Static => Instr::InvokeStatic(m),
            InvokeKind::Interface => Instr::InvokeInterface(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_boundaries() {
        assert!(Instr::IfEq(Label(1)).ends_block());
        assert!(Instr::IfEq(Label(1)).falls_through());
        assert!(Instr::Goto(Label(1)).ends_block());
        assert!(!Instr::Goto(Label(1)).falls_through());
        assert!(Instr::AThrow.ends_block());
        assert!(Instr::Jsr(Label(2)).falls_through());
        assert!(!Instr::IAdd.ends_block());
        assert!(!Instr::Label(Label(3)).ends_block());
    }

    #[test]
    fn switch_targets_include_default() {
        let s = Instr::LookupSwitch { default: Label(9), pairs: vec![(1, Label(1)), (7, Label(2))] };
        assert_eq!(s.branch_targets(), vec![Label(1), Label(2), Label(9)]);
        let t = Instr::TableSwitch { low: 0, high: 1, default: Label(0), targets: vec![Label(4), Label(5)] };
        assert_eq!(t.branch_targets(), vec![Label(4), Label(5), Label(0)]);
    }

    #[test]
    fn local_access_widths() {
        assert_eq!(Instr::DStore(3).local_access(), Some((3, Category::Two)));
        assert_eq!(Instr::IInc(1, 4).local_access(), Some((1, Category::One)));
        assert_eq!(Instr::AStore(2).stored_slot(), Some((2, SlotKind::Reference)));
        assert_eq!(Instr::ILoad(2).stored_slot(), None);
    }
}
