mod support;

use std::borrow::Cow;
use std::error::Error;

use resumable::analysis::AnalysisError;
use resumable::binary_format::encode_class;
use resumable::structure::config::{InstrumentConfig, JoinPolicy};
use resumable::structure::instructions::{Instr, Label, MethodRef};
use resumable::{transform_class, TransformError, Transformed};

use support::*;

fn plain() -> Vec<Instr> {
    vec![Instr::IConst(3), record("I"), Instr::Return]
}

#[test]
fn class_without_sites_is_unchanged() {
    let bytes = encode_class(&class(vec![entry(1, plain(), vec![])]));
    let out = transform_class(&bytes, CLASS, &config()).unwrap();
    assert!(out.is_unchanged());
    match out.into_bytes(&bytes) {
        Cow::Borrowed(b) => assert_eq!(b, &bytes[..]),
        Cow::Owned(_) => panic!("unchanged class was copied"),
    }
}

#[test]
fn binary_class_names_are_accepted() {
    let mut instrs = pause();
    instrs.push(Instr::Return);
    let bytes = encode_class(&class(vec![entry(1, instrs, vec![])]));
    let out = transform_class(&bytes, "app.Counter", &config()).unwrap();
    assert!(!out.is_unchanged());
}

#[test]
fn missing_marker_leaves_class_alone() {
    let mut instrs = pause();
    instrs.push(Instr::Return);
    let bytes = encode_class(&class(vec![entry(1, instrs, vec![])]));
    let config = InstrumentConfig {
        continuable_marker: Some("resumable.Continuable".to_string()),
        ..config()
    };
    assert_eq!(transform_class(&bytes, CLASS, &config).unwrap(), Transformed::Unchanged);

    let mut marked = class(vec![entry(1, pause(), vec![])]);
    marked.methods[0].code.instrs.push(Instr::Return);
    marked.interfaces.push("resumable/Continuable".to_string());
    let out = transform_class(&encode_class(&marked), CLASS, &config).unwrap();
    assert!(!out.is_unchanged());
}

#[test]
fn lookalike_calls_pass_through() {
    let instrs = vec![
        Instr::ALoad(0),
        Instr::IConst(1),
        Instr::InvokeVirtual(MethodRef::new(CLASS, "pause", "(I)V")),
        Instr::ALoad(0),
        Instr::InvokeVirtual(MethodRef::new("other/Owner", "pause", "()V")),
        Instr::Return,
    ];
    let bytes = encode_class(&class(vec![entry(1, instrs, vec![])]));
    assert!(transform_class(&bytes, CLASS, &config()).unwrap().is_unchanged());
}

#[test]
fn only_the_entry_method_is_rewritten() {
    let mut helper = entry(1, pause(), vec![]);
    helper.name = "helper".to_string();
    helper.code.instrs.push(Instr::Return);
    let mut instrs = pause();
    instrs.push(Instr::Return);
    let original = class(vec![helper.clone(), entry(1, instrs, vec![])]);

    let transformed = transform(&original);
    assert_eq!(transformed.methods[0], helper);
    assert_ne!(transformed.methods[1], original.methods[1]);
}

#[test]
fn class_name_must_match() {
    let bytes = encode_class(&class(vec![entry(1, plain(), vec![])]));
    match transform_class(&bytes, "app/Other", &config()) {
        Err(TransformError::ClassNameMismatch { expected, found }) => {
            assert_eq!(expected, "app/Other");
            assert_eq!(found, CLASS);
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn garbage_input_reports_decode_error() {
    let err = transform_class(b"\0rcf\x01", CLASS, &config()).unwrap_err();
    assert!(matches!(err, TransformError::Decode { .. }));
    assert!(err.source().is_some());
    assert!(err.to_string().contains(CLASS));
}

fn divergent() -> Vec<Instr> {
    let mut instrs = vec![
        Instr::IConst(0),
        Instr::IStore(1),
        Instr::ILoad(1),
        Instr::IfEq(Label(1)),
        Instr::FConst(1.0),
        Instr::FStore(1),
        Instr::Label(Label(1)),
        Instr::ILoad(1),
        Instr::Pop,
    ];
    instrs.extend(pause());
    instrs.push(Instr::Return);
    instrs
}

#[test]
fn divergent_local_aborts_the_method() {
    let bytes = encode_class(&class(vec![entry(2, divergent(), vec![])]));
    let err = transform_class(&bytes, CLASS, &config()).unwrap_err();
    match &err {
        TransformError::Analysis { class, method, source } => {
            assert_eq!(class, CLASS);
            assert_eq!(method, "execute()V");
            assert!(matches!(source, AnalysisError::DivergentLocal { slot: 1, .. }));
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn first_predecessor_policy_accepts_divergence() {
    let bytes = encode_class(&class(vec![entry(2, divergent(), vec![])]));
    let config = InstrumentConfig {
        join_policy: JoinPolicy::FirstPredecessor,
        ..config()
    };
    assert!(!transform_class(&bytes, CLASS, &config).unwrap().is_unchanged());
}

#[test]
fn configuration_from_toml() {
    let config: InstrumentConfig = toml::from_str(
        r#"
            continuable-marker = "resumable/Continuable"
            pause-method = "yield"
            step-back-method = "back"
            join-policy = "first-predecessor"
        "#,
    )
    .unwrap();
    assert_eq!(config.pause_method.as_deref(), Some("yield"));
    assert_eq!(config.entry_method_name, "execute");
    assert_eq!(config.join_policy, JoinPolicy::FirstPredecessor);

    let mut flow = class(vec![entry(
        1,
        vec![
            Instr::ALoad(0),
            Instr::InvokeVirtual(MethodRef::new(CLASS, "yield", "()V")),
            Instr::Return,
        ],
        vec![],
    )]);
    flow.interfaces.push("resumable/Continuable".to_string());
    let bytes = encode_class(&flow);
    assert!(!transform_class(&bytes, CLASS, &config).unwrap().is_unchanged());
    assert!(transform_class(&bytes, CLASS, &support::config()).unwrap().is_unchanged());
}

#[test]
fn configuration_round_trips_through_json() {
    let config = InstrumentConfig {
        answer_method: None,
        ..config()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"answer-method\":null"));
    assert_eq!(serde_json::from_str::<InstrumentConfig>(&json).unwrap(), config);
}
