use thiserror::Error;

/// One operation name with the score it reached, carried by matcher errors so a
/// human can see what was considered.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredName {
    pub name:  String,
    pub score: f64,
}

#[derive(Error, Debug)]
pub enum FillError {
    #[error("Malformed interface description: {0}")]
    MalformedInterface(String),

    #[error("Cyclic dependency between operations: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Malformed example: {0}")]
    MalformedExample(String),

    #[error("No operation matches the example (threshold {threshold:.3}); scores: {}", fmt_scores(.candidates))]
    NoMatch {
        threshold:  f64,
        candidates: Vec<ScoredName>,
    },

    #[error("Example matches several operations equally well ({score:.3}): {}", .tied.join(", "))]
    AmbiguousMatch { tied: Vec<String>, score: f64 },

    #[error("Operation '{operation}' has no invocation in the draft script (invoked: {})", fmt_list(.invoked))]
    OperationNotInScript {
        operation: String,
        invoked:   Vec<String>,
    },

    #[error("Operation '{operation}' is invoked {count} times with placeholder data (blocks at lines {}); cannot choose one", fmt_lines(.lines))]
    MultiplePlaceholders {
        operation: String,
        count:     usize,
        lines:     Vec<usize>,
    },

    #[error("Operation '{operation}' is invoked {count} times but none holds placeholder data or the example's data")]
    NoPlaceholder { operation: String, count: usize },

    #[error("Script invokes '{operation}' at line {line}, which the interface does not declare")]
    UnknownOperation { operation: String, line: usize },

    #[error("Invocation of '{operation}' at line {line} has no request or expected-response literal for the example's data")]
    NoDataSlot { operation: String, line: usize },

    #[error("Patching '{operation}' produced invalid script syntax:\n{}", .errors.join("\n"))]
    PatchSyntax {
        operation: String,
        errors:    Vec<String>,
    },

    #[error("Inference request timed out after {secs}s")]
    InferenceTimeout { secs: u64 },

    #[error("Inference request failed: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, FillError>;

impl FillError {
    /// Stable kind label used by the CLI diagnostic line.
    pub fn kind(&self) -> &'static str {
        match self {
            FillError::MalformedInterface(_)          => "MalformedInterfaceError",
            FillError::CyclicDependency { .. }        => "CyclicDependencyError",
            FillError::MalformedExample(_)            => "MalformedExampleError",
            FillError::NoMatch { .. }                 => "NoMatchError",
            FillError::AmbiguousMatch { .. }          => "AmbiguousMatchError",
            FillError::OperationNotInScript { .. }    => "OperationNotInScriptError",
            FillError::MultiplePlaceholders { .. }    => "MultiplePlaceholdersError",
            FillError::NoPlaceholder { .. }           => "NoPlaceholderError",
            FillError::UnknownOperation { .. }        => "UnknownOperationError",
            FillError::NoDataSlot { .. }              => "NoDataSlotError",
            FillError::PatchSyntax { .. }             => "PatchSyntaxError",
            FillError::InferenceTimeout { .. }        => "InferenceTimeoutError",
            FillError::Inference(_)                   => "InferenceError",
        }
    }
}

fn fmt_scores(scores: &[ScoredName]) -> String {
    if scores.is_empty() {
        return "(no operations)".to_string();
    }
    scores
        .iter()
        .map(|s| format!("{}={:.3}", s.name, s.score))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn fmt_lines(lines: &[usize]) -> String {
    lines.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(", ")
}
