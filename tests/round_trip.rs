//! Whatever locals and operand stack a pause sees, the resumed flow must
//! observe exactly what an uninterrupted run observes.

mod support;

use proptest::collection::vec;
use proptest::prelude::*;

use resumable::structure::instructions::{Constant, Instr};

use support::*;

#[derive(Clone, Debug)]
enum Lit {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Lit {
    fn push(&self) -> Instr {
        Instr::Ldc(match self {
            Lit::Int(v) => Constant::Int(*v),
            Lit::Long(v) => Constant::Long(*v),
            Lit::Float(v) => Constant::Float(*v),
            Lit::Double(v) => Constant::Double(*v),
            Lit::Str(s) => Constant::String(s.clone()),
        })
    }

    fn store(&self, slot: u16) -> Instr {
        match self {
            Lit::Int(_) => Instr::IStore(slot),
            Lit::Long(_) => Instr::LStore(slot),
            Lit::Float(_) => Instr::FStore(slot),
            Lit::Double(_) => Instr::DStore(slot),
            Lit::Str(_) => Instr::AStore(slot),
        }
    }

    fn load(&self, slot: u16) -> Instr {
        match self {
            Lit::Int(_) => Instr::ILoad(slot),
            Lit::Long(_) => Instr::LLoad(slot),
            Lit::Float(_) => Instr::FLoad(slot),
            Lit::Double(_) => Instr::DLoad(slot),
            Lit::Str(_) => Instr::ALoad(slot),
        }
    }

    fn descriptor(&self) -> &'static str {
        match self {
            Lit::Int(_) => "I",
            Lit::Long(_) => "J",
            Lit::Float(_) => "F",
            Lit::Double(_) => "D",
            Lit::Str(_) => "Ljava/lang/String;",
        }
    }

    fn width(&self) -> u16 {
        match self {
            Lit::Long(_) | Lit::Double(_) => 2,
            _ => 1,
        }
    }
}

fn lit() -> impl Strategy<Value = Lit> {
    prop_oneof![
        any::<i32>().prop_map(Lit::Int),
        any::<i64>().prop_map(Lit::Long),
        (-1.0e6f32..1.0e6f32).prop_map(Lit::Float),
        (-1.0e12f64..1.0e12f64).prop_map(Lit::Double),
        "[a-z]{0,8}".prop_map(Lit::Str),
    ]
}

fn flow(locals: &[Lit], stack: &[Lit]) -> Vec<Instr> {
    let mut instrs = Vec::new();
    let mut slots = Vec::new();
    let mut next = 1;
    for l in locals {
        instrs.push(l.push());
        instrs.push(l.store(next));
        slots.push(next);
        next += l.width();
    }
    instrs.extend(stack.iter().map(Lit::push));

    instrs.extend(pause());

    for l in stack.iter().rev() {
        instrs.push(record(l.descriptor()));
    }
    for (l, &slot) in locals.iter().zip(&slots) {
        instrs.push(l.load(slot));
        instrs.push(record(l.descriptor()));
    }
    instrs.push(Instr::Return);
    instrs
}

fn max_locals(locals: &[Lit]) -> u16 {
    1 + locals.iter().map(Lit::width).sum::<u16>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pause_preserves_frame(locals in vec(lit(), 0..6), stack in vec(lit(), 0..4)) {
        let original = class(vec![entry(max_locals(&locals), flow(&locals, &stack), vec![])]);
        let expected = straight_line(&original);
        prop_assert_eq!(expected.len(), locals.len() + stack.len());

        let (seen, outcomes, _) = drive(transform(&original));
        prop_assert_eq!(outcomes.len(), 2);
        prop_assert!(seen == expected, "{}", diff_print(&seen, &expected));
    }

    #[test]
    fn every_pause_of_a_chain_resumes(locals in vec(lit(), 1..4), pauses in 1usize..5) {
        let mut instrs = flow(&locals, &[]);
        // extra pauses ahead of the one that precedes the reads
        let at = instrs.len() - 1 - 2 * locals.len() - 2;
        for _ in 1..pauses {
            let tail = instrs.split_off(at);
            instrs.extend(pause());
            instrs.extend(tail);
        }
        let original = class(vec![entry(max_locals(&locals), instrs, vec![])]);
        let expected = straight_line(&original);

        let (seen, outcomes, _) = drive(transform(&original));
        prop_assert_eq!(outcomes.len(), pauses + 1);
        prop_assert_eq!(seen, expected);
    }
}
