use resumable_structure::classes::{Class, Code, Method, TryCatchBlock};
use resumable_structure::instructions::{Constant, FieldRef, Instr, Label, MethodRef};

use crate::opcodes;
use crate::table::emit_tabled;
use crate::{MAGIC, VERSION};

/// Encodes a class in canonical form: minimal LEB128 integers and the short
/// constant opcodes wherever one applies.
pub fn encode_class(class: &Class) -> Vec<u8> {
    let mut e = Emitter::default();
    e.class(class);
    e.into_bytes()
}

#[derive(Default)]
pub(crate) struct Emitter {
    out: Vec<u8>,
}

impl Emitter {
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub(crate) fn byte(&mut self, b: u8) {
        self.out.push(b);
    }

    pub(crate) fn u32(&mut self, mut n: u32) {
        loop {
            let b = (n & 0x7f) as u8;
            n >>= 7;
            if n == 0 {
                self.byte(b);
                break;
            }
            self.byte(b | 0x80);
        }
    }

    pub(crate) fn s64(&mut self, mut n: i64) {
        loop {
            let b = (n & 0x7f) as u8;
            n >>= 7;
            let done = (n == 0 && b & 0x40 == 0) || (n == -1 && b & 0x40 != 0);
            if done {
                self.byte(b);
                break;
            }
            self.byte(b | 0x80);
        }
    }

    pub(crate) fn name(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.out.extend_from_slice(s.as_bytes());
    }

    fn opt_name(&mut self, s: &Option<String>) {
        match s {
            None => self.byte(0x00),
            Some(s) => {
                self.byte(0x01);
                self.name(s);
            }
        }
    }

    pub(crate) fn label(&mut self, Label(n): Label) {
        self.u32(n);
    }

    pub(crate) fn field_ref(&mut self, f: &FieldRef) {
        self.name(&f.owner);
        self.name(&f.name);
        self.name(&f.descriptor);
    }

    pub(crate) fn method_ref(&mut self, m: &MethodRef) {
        self.name(&m.owner);
        self.name(&m.name);
        self.name(&m.descriptor);
    }

    fn constant(&mut self, c: &Constant) {
        match c {
            Constant::Int(v) => {
                self.byte(opcodes::TAG_INT);
                self.s64(i64::from(*v));
            }
            Constant::Float(v) => {
                self.byte(opcodes::TAG_FLOAT);
                self.out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Constant::Long(v) => {
                self.byte(opcodes::TAG_LONG);
                self.s64(*v);
            }
            Constant::Double(v) => {
                self.byte(opcodes::TAG_DOUBLE);
                self.out.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Constant::String(s) => {
                self.byte(opcodes::TAG_STRING);
                self.name(s);
            }
            Constant::Class(s) => {
                self.byte(opcodes::TAG_CLASS);
                self.name(s);
            }
        }
    }

    pub(crate) fn instr(&mut self, instr: &Instr) {
        if emit_tabled(self, instr) {
            return;
        }
        match instr {
            Instr::IConst(v) if (-1..=5).contains(v) => {
                self.byte((i32::from(opcodes::ICONST_M1) + v + 1) as u8);
            }
            Instr::IConst(v) => {
                self.byte(opcodes::ICONST_W);
                self.s64(i64::from(*v));
            }
            Instr::LConst(0) => self.byte(opcodes::LCONST_0),
            Instr::LConst(1) => self.byte(opcodes::LCONST_1),
            Instr::LConst(v) => {
                self.byte(opcodes::LCONST_W);
                self.s64(*v);
            }
            Instr::FConst(v) => match v.to_bits() {
                b if b == 0f32.to_bits() => self.byte(opcodes::FCONST_0),
                b if b == 1f32.to_bits() => self.byte(opcodes::FCONST_1),
                b if b == 2f32.to_bits() => self.byte(opcodes::FCONST_2),
                b => {
                    self.byte(opcodes::FCONST_W);
                    self.out.extend_from_slice(&b.to_le_bytes());
                }
            },
            Instr::DConst(v) => match v.to_bits() {
                b if b == 0f64.to_bits() => self.byte(opcodes::DCONST_0),
                b if b == 1f64.to_bits() => self.byte(opcodes::DCONST_1),
                b => {
                    self.byte(opcodes::DCONST_W);
                    self.out.extend_from_slice(&b.to_le_bytes());
                }
            },
            Instr::BiPush(v) => {
                self.byte(opcodes::BIPUSH);
                self.byte(*v as u8);
            }
            Instr::SiPush(v) => {
                self.byte(opcodes::SIPUSH);
                self.s64(i64::from(*v));
            }
            Instr::Ldc(c) => {
                self.byte(opcodes::LDC);
                self.constant(c);
            }
            Instr::IInc(slot, by) => {
                self.byte(opcodes::IINC);
                self.u32(u32::from(*slot));
                self.s64(i64::from(*by));
            }
            Instr::NewArray(kind) => {
                self.byte(opcodes::NEWARRAY);
                self.byte(kind.code());
            }
            Instr::MultiANewArray(desc, dims) => {
                self.byte(opcodes::MULTIANEWARRAY);
                self.name(desc);
                self.byte(*dims);
            }
            Instr::TableSwitch { low, high, default, targets } => {
                self.byte(opcodes::TABLESWITCH);
                self.s64(i64::from(*low));
                self.s64(i64::from(*high));
                self.label(*default);
                self.u32(targets.len() as u32);
                for l in targets {
                    self.label(*l);
                }
            }
            Instr::LookupSwitch { default, pairs } => {
                self.byte(opcodes::LOOKUPSWITCH);
                self.label(*default);
                self.u32(pairs.len() as u32);
                for (key, l) in pairs {
                    self.s64(i64::from(*key));
                    self.label(*l);
                }
            }
            Instr::InvokeDynamic { name, descriptor } => {
                self.byte(opcodes::INVOKEDYNAMIC);
                self.name(name);
                self.name(descriptor);
            }
            Instr::Label(l) => {
                self.byte(opcodes::LABEL);
                self.label(*l);
            }
            // every remaining instruction is covered by the opcode table
            _ => unreachable!("no encoding for {:?}", instr),
        }
    }

    fn try_catch(&mut self, t: &TryCatchBlock) {
        self.label(t.start);
        self.label(t.end);
        self.label(t.handler);
        self.opt_name(&t.catch_type);
    }

    fn code(&mut self, code: &Code) {
        self.u32(code.instrs.len() as u32);
        for i in &code.instrs {
            self.instr(i);
        }
        self.u32(code.try_catch.len() as u32);
        for t in &code.try_catch {
            self.try_catch(t);
        }
    }

    fn method(&mut self, m: &Method) {
        self.u32(u32::from(m.access));
        self.name(&m.name);
        self.name(&m.descriptor);
        self.u32(u32::from(m.max_locals));

        let mut body = Emitter::default();
        body.code(&m.code);
        self.u32(body.out.len() as u32);
        self.out.extend_from_slice(&body.out);
    }

    fn class(&mut self, c: &Class) {
        self.out.extend_from_slice(MAGIC);
        self.out.extend_from_slice(VERSION);
        self.u32(u32::from(c.access));
        self.name(&c.name);
        self.opt_name(&c.super_name);
        self.u32(c.interfaces.len() as u32);
        for i in &c.interfaces {
            self.name(i);
        }
        self.u32(c.methods.len() as u32);
        for m in &c.methods {
            self.method(m);
        }
    }
}
