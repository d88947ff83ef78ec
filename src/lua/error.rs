//! Error types for the Lua engine
//!
//! Compile-time problems are [`SyntaxError`]s, everything raised while a
//! program runs is a [`RuntimeError`]. Both travel inside [`LuaError`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::lua::lexer::SourceSpan;
use crate::lua::value::Value;

/// Result type used throughout the engine
pub type LuaResult<T> = Result<T, LuaError>;

/// Top-level error type
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// Lexing, parsing or code generation failed
    #[error("{0}")]
    Syntax(#[from] SyntaxError),

    /// Execution failed
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// A source file could not be read
    #[error("cannot open {path}: {message}")]
    Io { path: String, message: String },
}

impl LuaError {
    /// Build a runtime error carrying a string message
    pub fn runtime(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        LuaError::Runtime(RuntimeError::new(kind, message))
    }

    /// The runtime error kind, if this is a runtime error
    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            LuaError::Runtime(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The value a protected call hands back to the script
    pub fn to_value(&self) -> Value {
        match self {
            LuaError::Runtime(e) => e.value.clone(),
            other => Value::from(other.to_string()),
        }
    }
}

/// Kinds of compile-time errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxErrorKind {
    #[error("unexpected end of file {context}")]
    UnexpectedEof { context: String },

    #[error("unfinished string")]
    UnfinishedString,

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("invalid long string delimiter")]
    InvalidLongDelimiter,

    #[error("malformed number near '{0}'")]
    MalformedNumber(String),

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(String),

    /// `expected` is empty when any other token would have been fine
    #[error("{}", unexpected_message(.expected, .found))]
    UnexpectedSymbol { expected: String, found: String },

    #[error("ambiguous syntax (function call x new statement)")]
    AmbiguousSyntax,

    #[error("break outside a loop")]
    BreakOutsideLoop,

    #[error("no visible label '{0}' for goto")]
    UndefinedLabel(String),

    #[error("label '{0}' already defined")]
    DuplicateLabel(String),

    #[error("<goto {label}> jumps into the scope of local '{local}'")]
    JumpIntoLocalScope { label: String, local: String },

    #[error("cannot use '...' outside a vararg function")]
    VarargOutsideVararg,
}

fn unexpected_message(expected: &str, found: &str) -> String {
    if expected.is_empty() {
        format!("unexpected symbol near '{}'", found)
    } else {
        format!("'{}' expected near '{}'", expected, found)
    }
}

/// A compile-time error with its position
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{chunk}:{line}:{column}: {kind}")]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub chunk: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, span: &SourceSpan) -> Self {
        SyntaxError {
            kind,
            chunk: Arc::clone(&span.chunk),
            line: span.line,
            column: span.column,
        }
    }
}

/// Kinds of run-time errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Arithmetic,
    Comparison,
    Concatenation,
    Length,
    Coercion,
    NotCallable,
    Index,
    InvalidKey,
    ForLoop,
    InvalidNumber,
    BadArgument,
    User,
    StackOverflow,
    Interrupted,
    Timeout,
}

impl RuntimeErrorKind {
    /// Whether a protected call may catch errors of this kind
    pub fn is_catchable(self) -> bool {
        !matches!(self, RuntimeErrorKind::Interrupted | RuntimeErrorKind::Timeout)
    }
}

/// One entry of a reconstructed call stack
#[derive(Debug, Clone, PartialEq)]
pub enum TraceFrame {
    /// A native function, by registered name
    Native(String),

    /// A scripted function, by its definition site
    Scripted { name: Option<String>, span: SourceSpan },
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFrame::Native(name) => write!(f, "[native]: in function '{}'", name),
            TraceFrame::Scripted { name: Some(name), span } => {
                write!(f, "{}: in function '{}'", span, name)
            }
            TraceFrame::Scripted { name: None, span } => {
                write!(f, "{}: in function <{}>", span, span)
            }
        }
    }
}

/// A run-time error
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,

    /// The script-visible error object
    pub value: Value,

    /// Span of the first node that observed the error
    pub location: Option<SourceSpan>,

    /// Call stack at that point, innermost first
    pub traceback: Vec<TraceFrame>,

    /// Whether a string value gets a `chunk:line:` prefix when located
    positioned: bool,
}

impl RuntimeError {
    /// Create an error with a string message that will be positioned
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            value: Value::from(message.into()),
            location: None,
            traceback: Vec::new(),
            positioned: true,
        }
    }

    /// An error raised by script code with an arbitrary value
    pub fn user(value: Value, positioned: bool) -> Self {
        RuntimeError {
            kind: RuntimeErrorKind::User,
            value,
            location: None,
            traceback: Vec::new(),
            positioned,
        }
    }

    /// Attach a location and call stack, once.
    pub(crate) fn locate(&mut self, span: &SourceSpan, traceback: Vec<TraceFrame>) {
        if self.location.is_some() {
            return;
        }
        if self.positioned {
            if let Value::String(message) = &self.value {
                let mut prefixed = format!("{}:{}: ", span.chunk, span.line).into_bytes();
                prefixed.extend_from_slice(message.as_bytes());
                self.value = Value::String(prefixed.into());
            }
        }
        self.location = Some(span.clone());
        self.traceback = traceback;
    }

    /// The error message as text
    pub fn message(&self) -> String {
        match &self.value {
            Value::String(s) => s.to_str_lossy().into_owned(),
            Value::Number(_) => self.value.to_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        }
    }

    /// Message followed by the call stack
    pub fn report(&self) -> String {
        let mut out = self.message();
        if !self.traceback.is_empty() {
            out.push_str("\nstack traceback:");
            for frame in &self.traceback {
                out.push_str("\n\t");
                out.push_str(&frame.to_string());
            }
        }
        out
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: u32) -> SourceSpan {
        SourceSpan::new(Arc::from("test.lua"), line, 3)
    }

    #[test]
    fn test_syntax_error_display() {
        let err = SyntaxError::new(SyntaxErrorKind::MalformedNumber("3x".to_string()), &span(4));
        assert_eq!(err.to_string(), "test.lua:4:3: malformed number near '3x'");

        let err = SyntaxError::new(
            SyntaxErrorKind::UnexpectedSymbol {
                expected: "end".to_string(),
                found: "<eof>".to_string(),
            },
            &span(1),
        );
        assert_eq!(err.to_string(), "test.lua:1:3: 'end' expected near '<eof>'");
    }

    #[test]
    fn test_locate_prefixes_once() {
        let mut err = RuntimeError::new(RuntimeErrorKind::Arithmetic, "boom");
        err.locate(&span(7), Vec::new());
        err.locate(&span(9), Vec::new());
        assert_eq!(err.message(), "test.lua:7: boom");
        assert_eq!(err.location.as_ref().map(|s| s.line), Some(7));
    }

    #[test]
    fn test_unpositioned_user_error() {
        let mut err = RuntimeError::user(Value::from("plain"), false);
        err.locate(&span(2), Vec::new());
        assert_eq!(err.message(), "plain");
        assert!(err.location.is_some());
    }

    #[test]
    fn test_non_string_error_value() {
        let mut err = RuntimeError::user(Value::Boolean(true), true);
        err.locate(&span(2), Vec::new());
        assert_eq!(err.message(), "(error object is a boolean value)");
    }

    #[test]
    fn test_report_includes_traceback() {
        let mut err = RuntimeError::new(RuntimeErrorKind::User, "oops");
        err.locate(
            &span(5),
            vec![
                TraceFrame::Native("error".to_string()),
                TraceFrame::Scripted {
                    name: Some("f".to_string()),
                    span: span(1),
                },
            ],
        );
        let report = err.report();
        assert!(report.starts_with("test.lua:5: oops\nstack traceback:"));
        assert!(report.contains("in function 'error'"));
        assert!(report.contains("test.lua:1: in function 'f'"));
    }
}
