//! Instrumentation configuration: which classes and methods take part, and
//! which call signatures act as suspension points.

use serde::{Deserialize, Serialize};

use crate::descriptors::{DescriptorError, MethodDescriptor};
use crate::instructions::MethodRef;
use crate::types::internal_name;

pub const PAUSE_DESCRIPTOR: &str = "()V";
pub const ANSWER_DESCRIPTORS: [&str; 2] = ["()V", "(Ljava/lang/Object;)V"];

/// What happens at a call site that matches one of the configured signatures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    Pause,
    StepBack,
    /// Suspends and hands a target to the framework; resumes with its answer.
    Call,
    /// Hands a value back to the caller of this flow. Never resumed.
    Answer,
}

impl CallKind {
    pub fn suspends(self) -> bool {
        self != CallKind::Answer
    }
}

/// How the shape analyzer treats a live local whose value kind differs
/// between two predecessors of a join.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Abort the transform of the method.
    #[default]
    Reject,
    /// Keep the view of the first-registered predecessor and log a warning.
    FirstPredecessor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstrumentConfig {
    /// Marker interface a class must implement to be transformed at all.
    pub continuable_marker: Option<String>,
    /// Owner of the pause/step-back/call/answer methods. Calls on the class
    /// being transformed itself are accepted too.
    pub support_class: String,
    pub entry_method_name: String,
    pub entry_method_descriptor: String,
    pub pause_method: Option<String>,
    pub step_back_method: Option<String>,
    pub call_method: Option<String>,
    pub call_method_descriptor: String,
    pub answer_method: Option<String>,
    pub join_policy: JoinPolicy,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            continuable_marker: None,
            support_class: "resumable/ContinuableSupport".to_string(),
            entry_method_name: "execute".to_string(),
            entry_method_descriptor: "()V".to_string(),
            pause_method: Some("pause".to_string()),
            step_back_method: Some("stepBack".to_string()),
            call_method: Some("call".to_string()),
            call_method_descriptor: "(Ljava/lang/Object;)Ljava/lang/Object;".to_string(),
            answer_method: Some("answer".to_string()),
            join_policy: JoinPolicy::Reject,
        }
    }
}

impl InstrumentConfig {
    pub fn is_entry(&self, name: &str, descriptor: &str) -> bool {
        self.entry_method_name == name && self.entry_method_descriptor == descriptor
    }

    pub fn call_descriptor(&self) -> Result<MethodDescriptor, DescriptorError> {
        MethodDescriptor::parse(&self.call_method_descriptor)
    }

    /// Classifies a call made from a method of `class_name`.
    ///
    /// Returns `None` for ordinary calls, which pass through untouched.
    pub fn classify(&self, class_name: &str, method: &MethodRef) -> Option<CallKind> {
        let owner = internal_name(&method.owner);
        if owner != internal_name(&self.support_class) && owner != internal_name(class_name) {
            return None;
        }

        let named = |configured: &Option<String>| configured.as_deref() == Some(method.name.as_str());
        let desc = method.descriptor.as_str();

        if named(&self.pause_method) && desc == PAUSE_DESCRIPTOR {
            Some(CallKind::Pause)
        } else if named(&self.step_back_method) && desc == PAUSE_DESCRIPTOR {
            Some(CallKind::StepBack)
        } else if named(&self.call_method) && desc == self.call_method_descriptor {
            Some(CallKind::Call)
        } else if named(&self.answer_method) && ANSWER_DESCRIPTORS.contains(&desc) {
            Some(CallKind::Answer)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(owner: &str, name: &str, desc: &str) -> MethodRef {
        MethodRef::new(owner, name, desc)
    }

    #[test]
    fn classify_configured_signatures() {
        let config = InstrumentConfig::default();
        let c = "app/Flow";
        assert_eq!(config.classify(c, &call("resumable/ContinuableSupport", "pause", "()V")), Some(CallKind::Pause));
        assert_eq!(config.classify(c, &call("app/Flow", "stepBack", "()V")), Some(CallKind::StepBack));
        assert_eq!(
            config.classify(c, &call("app.Flow", "call", "(Ljava/lang/Object;)Ljava/lang/Object;")),
            Some(CallKind::Call)
        );
        assert_eq!(config.classify(c, &call(c, "answer", "()V")), Some(CallKind::Answer));
        assert_eq!(config.classify(c, &call(c, "answer", "(Ljava/lang/Object;)V")), Some(CallKind::Answer));
    }

    #[test]
    fn non_matching_signatures_are_ordinary() {
        let config = InstrumentConfig::default();
        let c = "app/Flow";
        assert_eq!(config.classify(c, &call("other/Owner", "pause", "()V")), None);
        assert_eq!(config.classify(c, &call(c, "pause", "(I)V")), None);
        assert_eq!(config.classify(c, &call(c, "call", "()Ljava/lang/Object;")), None);
        assert_eq!(config.classify(c, &call(c, "answer", "(I)V")), None);
    }

    #[test]
    fn disabled_kinds_never_match() {
        let config = InstrumentConfig { pause_method: None, ..InstrumentConfig::default() };
        assert_eq!(config.classify("app/Flow", &call("app/Flow", "pause", "()V")), None);
    }

    #[test]
    fn deserialize_from_toml() {
        let config: InstrumentConfig = toml::from_str(r#"
            support-class = "com.example.Support"
            entry-method-name = "run"
            call-method-descriptor = "(Ljava/lang/String;)Ljava/lang/String;"
            join-policy = "first-predecessor"
        "#).unwrap();
        assert_eq!(config.support_class, "com.example.Support");
        assert_eq!(config.entry_method_name, "run");
        assert_eq!(config.entry_method_descriptor, "()V");
        assert_eq!(config.pause_method.as_deref(), Some("pause"));
        assert_eq!(config.join_policy, JoinPolicy::FirstPredecessor);
        assert!(config.classify("a/B", &call("com/example/Support", "pause", "()V")).is_some());
    }

    #[test]
    fn json_round_trip() {
        let config = InstrumentConfig { continuable_marker: Some("app/Continuable".into()), ..Default::default() };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"continuable-marker\":\"app/Continuable\""));
        let back: InstrumentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
