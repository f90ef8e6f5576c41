//! Opcode table for instructions whose operand is a single slot, label,
//! member reference or class name. Shared by the decoder and the encoder so
//! the two directions cannot drift apart.

use resumable_structure::instructions::Instr;

use crate::emit::Emitter;
use crate::opcodes;
use crate::{parse_field_ref, parse_label, parse_method_ref, parse_name, parse_slot, Inp, PResult};

macro_rules! opcode_table {
    (
        plain { $($p_op:ident => $p_ins:ident,)* }
        slot { $($s_op:ident => $s_ins:ident,)* }
        jump { $($j_op:ident => $j_ins:ident,)* }
        field { $($f_op:ident => $f_ins:ident,)* }
        invoke { $($m_op:ident => $m_ins:ident,)* }
        class { $($c_op:ident => $c_ins:ident,)* }
    ) => {
        pub(crate) fn parse_tabled(input: Inp, op: u8) -> Option<PResult<Instr>> {
            Some(match op {
                $(opcodes::$p_op => Ok((input, Instr::$p_ins)),)*
                $(opcodes::$s_op => parse_slot(input).map(|(i, s)| (i, Instr::$s_ins(s))),)*
                $(opcodes::$j_op => parse_label(input).map(|(i, l)| (i, Instr::$j_ins(l))),)*
                $(opcodes::$f_op => parse_field_ref(input).map(|(i, f)| (i, Instr::$f_ins(f))),)*
                $(opcodes::$m_op => parse_method_ref(input).map(|(i, m)| (i, Instr::$m_ins(m))),)*
                $(opcodes::$c_op => parse_name(input).map(|(i, c)| (i, Instr::$c_ins(c))),)*
                _ => return None,
            })
        }

        /// Returns `false` if `instr` has no table entry.
        pub(crate) fn emit_tabled(e: &mut Emitter, instr: &Instr) -> bool {
            match instr {
                $(Instr::$p_ins => e.byte(opcodes::$p_op),)*
                $(Instr::$s_ins(s) => {
                    e.byte(opcodes::$s_op);
                    e.u32(u32::from(*s));
                })*
                $(Instr::$j_ins(l) => {
                    e.byte(opcodes::$j_op);
                    e.label(*l);
                })*
                $(Instr::$f_ins(f) => {
                    e.byte(opcodes::$f_op);
                    e.field_ref(f);
                })*
                $(Instr::$m_ins(m) => {
                    e.byte(opcodes::$m_op);
                    e.method_ref(m);
                })*
                $(Instr::$c_ins(c) => {
                    e.byte(opcodes::$c_op);
                    e.name(c);
                })*
                _ => return false,
            }
            true
        }
    }
}

opcode_table! {
    plain {
        NOP => Nop,
        ACONST_NULL => AConstNull,

        IALOAD => IALoad,
        LALOAD => LALoad,
        FALOAD => FALoad,
        DALOAD => DALoad,
        AALOAD => AALoad,
        BALOAD => BALoad,
        CALOAD => CALoad,
        SALOAD => SALoad,
        IASTORE => IAStore,
        LASTORE => LAStore,
        FASTORE => FAStore,
        DASTORE => DAStore,
        AASTORE => AAStore,
        BASTORE => BAStore,
        CASTORE => CAStore,
        SASTORE => SAStore,
        ARRAYLENGTH => ArrayLength,

        POP => Pop,
        POP2 => Pop2,
        DUP => Dup,
        DUP_X1 => DupX1,
        DUP_X2 => DupX2,
        DUP2 => Dup2,
        DUP2_X1 => Dup2X1,
        DUP2_X2 => Dup2X2,
        SWAP => Swap,

        IADD => IAdd,
        LADD => LAdd,
        FADD => FAdd,
        DADD => DAdd,
        ISUB => ISub,
        LSUB => LSub,
        FSUB => FSub,
        DSUB => DSub,
        IMUL => IMul,
        LMUL => LMul,
        FMUL => FMul,
        DMUL => DMul,
        IDIV => IDiv,
        LDIV => LDiv,
        FDIV => FDiv,
        DDIV => DDiv,
        IREM => IRem,
        LREM => LRem,
        FREM => FRem,
        DREM => DRem,
        INEG => INeg,
        LNEG => LNeg,
        FNEG => FNeg,
        DNEG => DNeg,
        ISHL => IShl,
        LSHL => LShl,
        ISHR => IShr,
        LSHR => LShr,
        IUSHR => IUShr,
        LUSHR => LUShr,
        IAND => IAnd,
        LAND => LAnd,
        IOR => IOr,
        LOR => LOr,
        IXOR => IXor,
        LXOR => LXor,

        I2L => I2L,
        I2F => I2F,
        I2D => I2D,
        L2I => L2I,
        L2F => L2F,
        L2D => L2D,
        F2I => F2I,
        F2L => F2L,
        F2D => F2D,
        D2I => D2I,
        D2L => D2L,
        D2F => D2F,
        I2B => I2B,
        I2C => I2C,
        I2S => I2S,

        LCMP => LCmp,
        FCMPL => FCmpL,
        FCMPG => FCmpG,
        DCMPL => DCmpL,
        DCMPG => DCmpG,

        IRETURN => IReturn,
        LRETURN => LReturn,
        FRETURN => FReturn,
        DRETURN => DReturn,
        ARETURN => AReturn,
        RETURN => Return,

        ATHROW => AThrow,
        MONITORENTER => MonitorEnter,
        MONITOREXIT => MonitorExit,
    }
    slot {
        ILOAD => ILoad,
        LLOAD => LLoad,
        FLOAD => FLoad,
        DLOAD => DLoad,
        ALOAD => ALoad,
        ISTORE => IStore,
        LSTORE => LStore,
        FSTORE => FStore,
        DSTORE => DStore,
        ASTORE => AStore,
        RET => Ret,
    }
    jump {
        IFEQ => IfEq,
        IFNE => IfNe,
        IFLT => IfLt,
        IFGE => IfGe,
        IFGT => IfGt,
        IFLE => IfLe,
        IF_ICMPEQ => IfICmpEq,
        IF_ICMPNE => IfICmpNe,
        IF_ICMPLT => IfICmpLt,
        IF_ICMPGE => IfICmpGe,
        IF_ICMPGT => IfICmpGt,
        IF_ICMPLE => IfICmpLe,
        IF_ACMPEQ => IfACmpEq,
        IF_ACMPNE => IfACmpNe,
        IFNULL => IfNull,
        IFNONNULL => IfNonNull,
        GOTO => Goto,
        JSR => Jsr,
    }
    field {
        GETSTATIC => GetStatic,
        PUTSTATIC => PutStatic,
        GETFIELD => GetField,
        PUTFIELD => PutField,
    }
    invoke {
        INVOKEVIRTUAL => InvokeVirtual,
        INVOKESPECIAL => InvokeSpecial,
        INVOKESTATIC => InvokeStatic,
        INVOKEINTERFACE => InvokeInterface,
    }
    class {
        NEW => New,
        ANEWARRAY => ANewArray,
        CHECKCAST => CheckCast,
        INSTANCEOF => InstanceOf,
    }
}
