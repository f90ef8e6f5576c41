//! Single linear pass deciding whether a method needs the transform.

use tracing::debug;

use resumable_structure::classes::Method;
use resumable_structure::config::InstrumentConfig;
use resumable_structure::instructions::Label;
use resumable_structure::types::{Category, THROWABLE_CLASS};

use crate::AResult;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Metrics {
    /// Pause, step-back and call sites.
    pub suspension_count: usize,
    pub answer_count: usize,
    /// One past the highest local slot the method addresses, parameters
    /// included.
    pub max_locals: u16,
    /// Caught type of every handler label, in order of first appearance in
    /// the try-catch table.
    pub exception_types: Vec<(Label, String)>,
}

impl Metrics {
    pub fn needs_transform(&self) -> bool {
        self.suspension_count > 0 || self.answer_count > 0
    }

    pub fn exception_type(&self, handler: Label) -> Option<&str> {
        self.exception_types
            .iter()
            .find(|(l, _)| *l == handler)
            .map(|(_, t)| t.as_str())
    }
}

pub fn analyze_metrics(class_name: &str, method: &Method, config: &InstrumentConfig) -> AResult<Metrics> {
    let signature = method.signature()?;
    let mut metrics = Metrics {
        max_locals: signature.param_slots() + if method.is_static() { 0 } else { 1 },
        ..Metrics::default()
    };

    for instr in &method.code.instrs {
        if let Some((slot, width)) = instr.local_access() {
            let end = slot.saturating_add(if width == Category::Two { 2 } else { 1 });
            metrics.max_locals = metrics.max_locals.max(end);
        }
        if let Some((_, m)) = instr.invocation() {
            match config.classify(class_name, m) {
                Some(call) if call.suspends() => metrics.suspension_count += 1,
                Some(_) => metrics.answer_count += 1,
                None => {}
            }
        }
    }

    for block in &method.code.try_catch {
        let caught = block.catch_type.as_deref().unwrap_or(THROWABLE_CLASS);
        match metrics.exception_types.iter_mut().find(|(l, _)| *l == block.handler) {
            // a handler shared by several catch types sees their common root
            Some((_, t)) if t != caught => *t = THROWABLE_CLASS.to_string(),
            Some(_) => {}
            None => metrics.exception_types.push((block.handler, caught.to_string())),
        }
    }

    debug!(
        class = class_name,
        method = %method.name,
        suspensions = metrics.suspension_count,
        answers = metrics.answer_count,
        max_locals = metrics.max_locals,
        "collected method metrics"
    );
    Ok(metrics)
}
