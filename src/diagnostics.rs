//! Unified diagnostics for the yantra compiler.
//!
//! Every failure mode in the pipeline is represented by [`YantraError`] and
//! must be constructed through the `err_msg!` or `err_ctx!` macros; manual
//! struct construction outside this module is forbidden. Each variant carries
//! a message plus an [`ErrorContext`] (optional source text, span, and help),
//! and renders through `miette` with a stable diagnostic code.
//!
//! The compiler never recovers from one of these errors: they abort the
//! current compilation and propagate to the file driver, which reports them
//! and moves on.
//!
//! # Error Construction
//!
//! - `err_msg!(Analyze, "recur arity mismatch: expected {}, got {}", a, b)`
//!   for message-only errors.
//! - `err_ctx!(Io, "failed to read source", src, span)` when source context
//!   is available (driver-level errors mostly).

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

/// Byte span into a source file, used by driver-level diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Optional diagnostic context attached to every error variant.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Source text for error highlighting, when known.
    pub src: Option<Arc<String>>,
    /// Span within the source for precise location.
    pub span: Option<Span>,
    /// Help message for user guidance.
    pub help: Option<String>,
}

impl ErrorContext {
    /// An empty context (no source, span, or help).
    pub fn none() -> Self {
        Self::default()
    }

    /// Context with both source and span.
    pub fn with_src_and_span(src: Arc<String>, span: Span) -> Self {
        Self {
            src: Some(src),
            span: Some(span),
            help: None,
        }
    }
}

/// Unified error type for all compiler failure modes.
///
/// The variants follow the pipeline stages: expansion, analysis, symbol and
/// type resolution, emission, driver I/O, and internal invariant violations.
#[derive(Debug, Error, Diagnostic)]
pub enum YantraError {
    #[error("Expansion error: {message}")]
    #[diagnostic(code(yantra::expand))]
    Expand { message: String, ctx: ErrorContext },

    #[error("Analysis error: {message}")]
    #[diagnostic(code(yantra::analyze))]
    Analyze { message: String, ctx: ErrorContext },

    #[error("Resolution error: {message}")]
    #[diagnostic(code(yantra::resolve))]
    Resolve { message: String, ctx: ErrorContext },

    #[error("Emission error: {message}")]
    #[diagnostic(code(yantra::emit))]
    Emit { message: String, ctx: ErrorContext },

    #[error("Driver error: {message}")]
    #[diagnostic(code(yantra::io))]
    Io { message: String, ctx: ErrorContext },

    #[error("Internal error: {message}")]
    #[diagnostic(code(yantra::internal))]
    Internal { message: String, ctx: ErrorContext },
}

impl YantraError {
    /// The message without the variant prefix, for test assertions.
    pub fn message(&self) -> &str {
        match self {
            Self::Expand { message, .. }
            | Self::Analyze { message, .. }
            | Self::Resolve { message, .. }
            | Self::Emit { message, .. }
            | Self::Io { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

/// Trait for extracting source text from various owners for error context.
pub trait AsErrorSource {
    fn as_error_source(&self) -> String;
}

impl AsErrorSource for String {
    fn as_error_source(&self) -> String {
        self.clone()
    }
}

impl AsErrorSource for &str {
    fn as_error_source(&self) -> String {
        (*self).to_string()
    }
}

impl AsErrorSource for Arc<String> {
    fn as_error_source(&self) -> String {
        self.as_ref().clone()
    }
}

/// Converts any [`AsErrorSource`] into the `Arc<String>` stored in a context.
pub fn to_error_src<S: AsErrorSource>(src: S) -> Arc<String> {
    Arc::new(src.as_error_source())
}

/// Constructs a [`YantraError`] variant with a formatted message and no context.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $msg:expr, $($arg:expr),+) => {
        $crate::YantraError::$variant {
            message: format!($msg, $($arg),+),
            ctx: $crate::diagnostics::ErrorContext::none(),
        }
    };
    ($variant:ident, $msg:expr) => {
        $crate::YantraError::$variant {
            message: format!("{}", $msg),
            ctx: $crate::diagnostics::ErrorContext::none(),
        }
    };
}

/// Constructs a [`YantraError`] variant with diagnostic context.
#[macro_export]
macro_rules! err_ctx {
    ($variant:ident, $msg:expr, $src:expr, $span:expr, $help:expr) => {
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx: $crate::diagnostics::ErrorContext {
                src: Some($crate::diagnostics::to_error_src($src)),
                span: Some($span),
                help: Some(format!("{}", $help)),
            },
        }
    };
    ($variant:ident, $msg:expr, $src:expr, $span:expr) => {
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx: $crate::diagnostics::ErrorContext {
                src: Some($crate::diagnostics::to_error_src($src)),
                span: Some($span),
                help: None,
            },
        }
    };
    ($variant:ident, $msg:expr, $src:expr) => {
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx: $crate::diagnostics::ErrorContext {
                src: Some($crate::diagnostics::to_error_src($src)),
                span: None,
                help: None,
            },
        }
    };
}

/// Prints a [`YantraError`] with full miette diagnostics.
///
/// Use this for user-facing error display at the driver boundary.
pub fn print_error(error: YantraError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
