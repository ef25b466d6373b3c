pub mod ansi;
pub mod json;
pub mod registry;
pub mod source_map;

pub use source_map::{SourceMap, Span};

use crate::ops::OPERATORS;
use crate::parser::ParseError;
use crate::vm::EvalError;

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

fn word_operators() -> String {
    let words: Vec<String> = OPERATORS.iter().filter_map(|op| op.word).map(|w| format!("?{w}")).collect();
    words.join(" ")
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            ParseError::UnexpectedToken { pos, found } => {
                let len = if found.starts_with('\'') { found.len() - 2 } else { 0 };
                let d = d.with_span(Span::at(*pos, len), "not expected here");
                match found.as_str() {
                    "'>'" | "'>='" => d.with_suggestion("in special syntax mode write ?gt / ?ge instead of > / >="),
                    "end of input" => d.with_note("the expression stops where an operand was expected"),
                    _ => d,
                }
            }
            ParseError::UnterminatedParenthesis { pos, end } => d
                .with_span(Span::at(*pos, 1), "opened here")
                .with_secondary_span(Span::at(*end, 0), "input ends before the matching ')'")
                .with_suggestion("add the missing ')'"),
            ParseError::UnknownOperator { pos, op } => {
                let d = d.with_span(Span::at(*pos, op.len()), "unknown operator");
                match op.as_str() {
                    "&" => d.with_suggestion("logical and is written &&"),
                    "|" => d.with_suggestion("logical or is written ||"),
                    "=" => d.with_suggestion("equality is written =="),
                    _ => d.with_note(format!("word operators are: {}", word_operators())),
                }
            }
            ParseError::MalformedLiteral { pos, text } => d
                .with_span(Span::at(*pos, text.len()), "malformed literal")
                .with_note("numbers take an optional F, D or L suffix; strings are quoted with '"),
            ParseError::RecursionLimit => d.with_suggestion("flatten the expression or split it into parts"),
        }
    }
}

impl From<&EvalError> for Diagnostic {
    fn from(e: &EvalError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            EvalError::DivideByZero => {
                d.with_suggestion("make one operand floating point (e.g. 1.0) for an IEEE result")
            }
            EvalError::PropagatedLookupFailure { .. } | EvalError::ResolverInvocationFailed { .. } => {
                d.with_note("failed lookups are only tolerated by &&, ||, ! and bool")
            }
            EvalError::ArgumentOutOfRange { .. } => d.with_note("arguments are numbered from $0"),
            EvalError::StackUnderflow { .. } | EvalError::MissingJumpTarget { .. } => {
                d.with_note("the program was not produced by the compiler")
            }
            _ => d,
        }
    }
}
