mod support;

use resumable::execution::{RunOutcome, Value};
use resumable::structure::classes::TryCatchBlock;
use resumable::structure::instructions::{Constant, Instr, Label};
use resumable::structure::types::THROWABLE_CLASS;

use support::*;

/// counter = 0; do { pause; counter++; pause; record(counter) } while (counter < 10)
fn counting_loop() -> Vec<Instr> {
    let mut instrs = vec![
        Instr::IConst(-1),
        record("I"),
        Instr::IConst(0),
        Instr::IStore(1),
        Instr::Label(Label(0)),
    ];
    instrs.extend(pause());
    instrs.push(Instr::IInc(1, 1));
    instrs.extend(pause());
    instrs.extend(vec![
        Instr::ILoad(1),
        record("I"),
        Instr::ILoad(1),
        Instr::BiPush(10),
        Instr::IfICmpLt(Label(0)),
        Instr::Return,
    ]);
    instrs
}

#[test]
fn resumed_loop_matches_straight_line_run() {
    let original = class(vec![entry(2, counting_loop(), vec![])]);
    let expected = straight_line(&original);
    assert_eq!(expected.len(), 11);

    let (seen, outcomes, _) = drive(transform(&original));
    assert!(seen == expected, "{}", diff_print(&seen, &expected));
    // two pauses per iteration, then completion
    assert_eq!(outcomes.len(), 21);
    assert_eq!(outcomes.last(), Some(&RunOutcome::Completed(None)));
}

#[test]
fn counter_survives_between_two_points() {
    let mut probe = Probe::default();
    let mut runner = resumable::execution::ContinuableRunner::new(
        transform(&class(vec![entry(2, counting_loop(), vec![])])),
        &config(),
    );

    // run to the first point of the iteration that starts with counter = 5
    let mut outcome = runner.start(&mut probe).unwrap();
    for _ in 0..10 {
        let id = match outcome {
            RunOutcome::Paused(id) => id,
            other => panic!("{:?}", other),
        };
        outcome = runner.resume(id, &mut probe).unwrap();
    }
    let at_first = match outcome {
        RunOutcome::Paused(id) => id,
        other => panic!("{:?}", other),
    };
    let ctx = runner.machine().contexts.get(at_first).unwrap();
    assert_eq!(ctx.label, 0);
    assert_eq!(ctx.local_vars.get_int(1), 5);

    let at_second = match runner.resume(at_first, &mut probe).unwrap() {
        RunOutcome::Paused(id) => id,
        other => panic!("{:?}", other),
    };
    let ctx = runner.machine().contexts.get(at_second).unwrap();
    assert_eq!(ctx.label, 1);
    assert_eq!(ctx.local_vars.get_int(1), 6);
    assert_eq!(ctx.parent, Some(at_first));

    // restored state is what the straight-line run records after the point
    probe.seen.clear();
    runner.resume(at_second, &mut probe).unwrap();
    assert_eq!(probe.seen, vec![Seen::Int(6)]);
}

#[test]
fn resume_skips_the_entry_path() {
    let original = class(vec![entry(2, counting_loop(), vec![])]);
    let (seen, _, _) = drive(transform(&original));
    // the record(-1) before the loop runs exactly once
    assert_eq!(seen.iter().filter(|s| **s == Seen::Int(-1)).count(), 1);
}

#[test]
fn broad_handler_does_not_swallow_signals() {
    let mut instrs = vec![Instr::Label(Label(0))];
    instrs.extend(pause());
    instrs.extend(vec![
        Instr::IConst(1),
        record("I"),
        Instr::Return,
        Instr::Label(Label(1)),
        Instr::Label(Label(2)),
        Instr::AStore(1),
        Instr::IConst(-99),
        record("I"),
        Instr::Return,
    ]);
    let handler = TryCatchBlock {
        start: Label(0),
        end: Label(1),
        handler: Label(2),
        catch_type: Some(THROWABLE_CLASS.to_string()),
    };
    let original = class(vec![entry(2, instrs, vec![handler])]);

    let (seen, outcomes, _) = drive(transform(&original));
    assert!(matches!(outcomes[0], RunOutcome::Paused(_)));
    assert_eq!(seen, vec![Seen::Int(1)]);
    assert_eq!(seen, straight_line(&original));
}

#[test]
fn handler_still_sees_domain_exceptions() {
    let mut instrs = vec![Instr::Label(Label(0))];
    instrs.extend(pause());
    instrs.extend(vec![
        Instr::IConst(1),
        Instr::IConst(0),
        Instr::IDiv,
        Instr::Pop,
        Instr::Return,
        Instr::Label(Label(1)),
        Instr::Label(Label(2)),
        Instr::AStore(1),
        Instr::IConst(-99),
        record("I"),
        Instr::Return,
    ]);
    let handler = TryCatchBlock {
        start: Label(0),
        end: Label(1),
        handler: Label(2),
        catch_type: None,
    };
    let (seen, outcomes, _) = drive(transform(&class(vec![entry(2, instrs, vec![handler])])));
    assert_eq!(outcomes.len(), 2);
    assert_eq!(seen, vec![Seen::Int(-99)]);
}

/// Slot 1 and the stack top get a string or a `java/lang/Class`, depending
/// on `taken`, before both paths meet at the pause.
fn mixed_references(taken: bool) -> Vec<Instr> {
    let mut instrs = vec![
        Instr::Ldc(Constant::Class("x/Y".to_string())),
        Instr::AStore(1),
        Instr::IConst(if taken { 0 } else { 1 }),
        Instr::IfEq(Label(1)),
        Instr::Ldc(Constant::String("s".to_string())),
        Instr::AStore(1),
        Instr::Label(Label(1)),
        Instr::ALoad(1),
    ];
    instrs.extend(pause());
    instrs.extend(vec![
        record("Ljava/lang/Object;"),
        Instr::ALoad(1),
        record("Ljava/lang/Object;"),
        Instr::Return,
    ]);
    instrs
}

#[test]
fn joined_reference_classes_restore_either_path() {
    for taken in [true, false] {
        let original = class(vec![entry(2, mixed_references(taken), vec![])]);
        let expected = straight_line(&original);
        let held = if taken { Seen::Object("java/lang/Class".to_string()) } else { Seen::Str("s".to_string()) };
        assert_eq!(expected, vec![held.clone(), held]);

        let (seen, outcomes, _) = drive(transform(&original));
        assert_eq!(outcomes.last(), Some(&RunOutcome::Completed(None)), "taken = {}", taken);
        assert!(seen == expected, "{}", diff_print(&seen, &expected));
    }
}

#[test]
fn call_site_receives_the_answer() {
    let mut instrs = vec![Instr::Ldc(Constant::String("target".to_string()))];
    instrs.extend(call());
    instrs.extend(vec![record("Ljava/lang/Object;"), Instr::Return]);
    let transformed = transform(&class(vec![entry(1, instrs, vec![])]));

    let mut probe = Probe::default();
    let mut runner = resumable::execution::ContinuableRunner::new(transformed, &config());
    let (context, target) = match runner.start(&mut probe).unwrap() {
        RunOutcome::Called { context, target } => (context, target),
        other => panic!("{:?}", other),
    };
    let target = match target {
        Value::Ref(Some(r)) => runner.machine().heap.string(r).map(str::to_string),
        _ => None,
    };
    assert_eq!(target.as_deref(), Some("target"));
    assert!(probe.seen.is_empty());

    let reply = runner.machine_mut().heap.intern("reply");
    assert_eq!(runner.answer(context, Value::from(reply), &mut probe).unwrap(), RunOutcome::Completed(None));
    assert_eq!(probe.seen, vec![Seen::Str("reply".to_string())]);
}

#[test]
fn answer_hands_back_a_value() {
    let mut instrs = vec![Instr::Ldc(Constant::String("done".to_string()))];
    instrs.extend(answer());
    instrs.push(Instr::Return);
    let transformed = transform(&class(vec![entry(1, instrs, vec![])]));

    let mut runner = resumable::execution::ContinuableRunner::new(transformed, &config());
    match runner.start(&mut Probe::default()).unwrap() {
        RunOutcome::Answered { value: Value::Ref(Some(r)), .. } => {
            assert_eq!(runner.machine().heap.string(r), Some("done"))
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn step_back_reports_the_previous_context() {
    let mut instrs = pause();
    instrs.extend(step_back());
    instrs.push(Instr::Return);
    let transformed = transform(&class(vec![entry(1, instrs, vec![])]));

    let mut probe = Probe::default();
    let mut runner = resumable::execution::ContinuableRunner::new(transformed, &config());
    let first = match runner.start(&mut probe).unwrap() {
        RunOutcome::Paused(id) => id,
        other => panic!("{:?}", other),
    };
    match runner.resume(first, &mut probe).unwrap() {
        RunOutcome::SteppedBack { context, previous } => {
            assert_ne!(context, first);
            assert_eq!(previous, Some(first));
        }
        other => panic!("{:?}", other),
    }
    // stepping back means running the previous context again
    assert!(matches!(runner.resume(first, &mut probe).unwrap(), RunOutcome::SteppedBack { .. }));
}

#[test]
fn completed_context_is_removed() {
    let original = class(vec![entry(2, counting_loop(), vec![])]);
    let (_, _, runner) = drive(transform(&original));
    let last = runner.last_context().unwrap();
    assert!(!runner.machine().contexts.contains(last));
    // every paused ancestor is still there, the finished clone is not
    assert_eq!(runner.machine().contexts.len(), 20);
}
