//! Rewrites the entry method of continuable classes so execution can be
//! suspended at pause, step-back and call sites and resumed later from a
//! captured context.
//!
//! The per-method pipeline is
//!
//! 1. `analysis::analyze_metrics`, which decides whether anything is to be done,
//! 2. `analysis::analyze_shape` for the type of every local and stack entry at each site,
//! 3. `rewrite::rewrite_method` to splice in capture and restore code.
//!
//! A method without any site is returned untouched, and so is a class
//! without a transformed method: `transform_class` then reports
//! `Transformed::Unchanged` and the caller keeps its original bytes.

use std::borrow::Cow;

use thiserror::Error;
use tracing::debug;

pub use resumable_analysis as analysis;
pub use resumable_binary_format as binary_format;
pub use resumable_execution as execution;
pub use resumable_rewrite as rewrite;
pub use resumable_structure as structure;

use crate::analysis::{analyze_metrics, analyze_shape, AnalysisError};
use crate::binary_format::{decode_class, encode_class, DecodeError};
use crate::rewrite::{rewrite_method, RewriteError};
use crate::structure::classes::Method;
use crate::structure::config::InstrumentConfig;
use crate::structure::types::internal_name;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transformed {
    /// Nothing to transform. The input bytes stay valid as they are.
    Unchanged,
    Rewritten(Vec<u8>),
}

impl Transformed {
    pub fn is_unchanged(&self) -> bool {
        *self == Transformed::Unchanged
    }

    /// The class bytes to load, borrowing `original` when nothing changed.
    pub fn into_bytes(self, original: &[u8]) -> Cow<'_, [u8]> {
        match self {
            Transformed::Unchanged => Cow::Borrowed(original),
            Transformed::Rewritten(bytes) => Cow::Owned(bytes),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("cannot decode class {class}")]
    Decode {
        class: String,
        #[source]
        source: DecodeError,
    },
    #[error("cannot analyze {class}.{method}")]
    Analysis {
        class: String,
        method: String,
        #[source]
        source: AnalysisError,
    },
    #[error("cannot rewrite {class}.{method}")]
    Rewrite {
        class: String,
        method: String,
        #[source]
        source: RewriteError,
    },
    #[error("expected class {expected}, but the input defines {found}")]
    ClassNameMismatch { expected: String, found: String },
}

impl TransformError {
    fn analysis(class_name: &str, method: &Method, source: AnalysisError) -> Self {
        TransformError::Analysis {
            class: class_name.to_string(),
            method: format!("{}{}", method.name, method.descriptor),
            source,
        }
    }

    fn rewrite(class_name: &str, method: &Method, source: RewriteError) -> Self {
        TransformError::Rewrite {
            class: class_name.to_string(),
            method: format!("{}{}", method.name, method.descriptor),
            source,
        }
    }
}

/// Transforms one method of `class_name`. `None` means the method has no
/// suspension or answer site and is to be kept as it is.
pub fn transform_method(
    class_name: &str,
    method: &Method,
    config: &InstrumentConfig,
) -> Result<Option<Method>, TransformError> {
    let metrics =
        analyze_metrics(class_name, method, config).map_err(|e| TransformError::analysis(class_name, method, e))?;
    if !metrics.needs_transform() {
        debug!(class = class_name, method = %method.name, "no suspension sites, method left unchanged");
        return Ok(None);
    }
    let shape = analyze_shape(class_name, method, config, &metrics)
        .map_err(|e| TransformError::analysis(class_name, method, e))?;
    let rewritten = rewrite_method(class_name, method, config, &metrics, &shape)
        .map_err(|e| TransformError::rewrite(class_name, method, e))?;
    Ok(Some(rewritten))
}

/// Transforms the encoded class `bytes`, which must define `class_name`
/// (binary or internal form).
pub fn transform_class(
    bytes: &[u8],
    class_name: &str,
    config: &InstrumentConfig,
) -> Result<Transformed, TransformError> {
    let expected = internal_name(class_name);
    let mut class = decode_class(bytes).map_err(|source| TransformError::Decode {
        class: expected.clone(),
        source,
    })?;
    if class.name != expected {
        return Err(TransformError::ClassNameMismatch { expected, found: class.name });
    }
    if let Some(marker) = &config.continuable_marker {
        if !class.implements(marker) {
            debug!(class = %class.name, marker = %marker, "not continuable");
            return Ok(Transformed::Unchanged);
        }
    }

    let mut changed = false;
    for i in 0..class.methods.len() {
        let method = &class.methods[i];
        if !config.is_entry(&method.name, &method.descriptor) {
            continue;
        }
        if let Some(rewritten) = transform_method(&class.name, method, config)? {
            class.methods[i] = rewritten;
            changed = true;
        }
    }

    if !changed {
        return Ok(Transformed::Unchanged);
    }
    debug!(class = %class.name, "class transformed");
    Ok(Transformed::Rewritten(encode_class(&class)))
}
