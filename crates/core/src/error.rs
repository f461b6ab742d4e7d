//! The structured diagnostic taxonomy shared by every compiler phase and by
//! the VM's runtime error objects.
//!
//! Pretty-printing a [`Diagnostic`] into `rustc`-style caret output is out of
//! scope here (`spec.md` §1 treats the pretty-printer as an external
//! collaborator) — this module only builds the structured value that such a
//! printer would consume, plus a minimal one-line [`fmt::Display`] good
//! enough for the CLI's stderr output.

use crate::span::Span;
use std::fmt;

/// The closed set of error codes named in `spec.md` §6, plus the
/// feature-categorized extended set it reserves for later codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E0001: parse error.
    ParseError,
    /// E0002: general / uncategorized compile error.
    General,
    /// E0061: function-call arity or argument-type mismatch.
    FunctionCall,
    /// E0308: type mismatch.
    TypeMismatch,
    /// E0425: reference to an undefined variable.
    UndefinedVariable,
    /// E0426: a name escapes its scope (e.g. used before its block).
    ScopeError,
    /// E0594: assignment to an immutable binding.
    ImmutableAssignment,
    /// E0604: access to a private module export.
    PrivateAccess,
    /// Feature-categorized extended codes, free-form beyond the numbered set.
    Variable(&'static str),
    Control(&'static str),
    Type(&'static str),
    Module(&'static str),
    Runtime(&'static str),
}

impl ErrorCode {
    /// The stable string a diagnostic renderer keys off, e.g. `"E0308"`.
    pub fn code_str(&self) -> String {
        match self {
            ErrorCode::ParseError => "E0001".to_string(),
            ErrorCode::General => "E0002".to_string(),
            ErrorCode::FunctionCall => "E0061".to_string(),
            ErrorCode::TypeMismatch => "E0308".to_string(),
            ErrorCode::UndefinedVariable => "E0425".to_string(),
            ErrorCode::ScopeError => "E0426".to_string(),
            ErrorCode::ImmutableAssignment => "E0594".to_string(),
            ErrorCode::PrivateAccess => "E0604".to_string(),
            ErrorCode::Variable(tag) => format!("E-VAR-{tag}"),
            ErrorCode::Control(tag) => format!("E-CTRL-{tag}"),
            ErrorCode::Type(tag) => format!("E-TYPE-{tag}"),
            ErrorCode::Module(tag) => format!("E-MOD-{tag}"),
            ErrorCode::Runtime(tag) => format!("E-RT-{tag}"),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_str())
    }
}

/// A secondary span attached to a diagnostic, e.g. "previous declaration
/// here" alongside a primary "duplicate declaration" span.
#[derive(Debug, Clone)]
pub struct SecondarySpan {
    pub span: Span,
    pub message: String,
}

/// A single structured diagnostic: one error code, one primary span, zero or
/// more secondary spans, and optional help/note text (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    pub primary: Span,
    pub secondary: Vec<SecondarySpan>,
    pub help: Option<String>,
    pub note: Option<String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>, primary: Span) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            primary,
            secondary: Vec::new(),
            help: None,
            note: None,
        }
    }

    pub fn with_secondary(mut self, span: Span, message: impl Into<String>) -> Self {
        self.secondary.push(SecondarySpan {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.primary, self.message)?;
        if let Some(help) = &self.help {
            write!(f, " (help: {help})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Collects diagnostics across a single compile phase.
///
/// `spec.md` §7: "the compiler aborts on the first fatal error per phase but
/// may report multiple non-fatal errors from a single phase." The sink
/// distinguishes the two by severity; callers decide when a `fatal` push
/// should stop the phase.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    fatal_count: usize,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn push_fatal(&mut self, diagnostic: Diagnostic) {
        self.fatal_count += 1;
        self.diagnostics.push(diagnostic);
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal_count > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    fn span() -> Span {
        Span::point("t.orus", Position::new(1, 1))
    }

    #[test]
    fn code_str_matches_spec_taxonomy() {
        assert_eq!(ErrorCode::TypeMismatch.code_str(), "E0308");
        assert_eq!(ErrorCode::ImmutableAssignment.code_str(), "E0594");
    }

    #[test]
    fn sink_tracks_fatal_separately() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::new(ErrorCode::General, "warn-ish", span()));
        assert!(!sink.has_fatal());
        sink.push_fatal(Diagnostic::new(ErrorCode::ParseError, "boom", span()));
        assert!(sink.has_fatal());
        assert_eq!(sink.iter().count(), 2);
    }

    #[test]
    fn display_includes_help() {
        let d = Diagnostic::new(ErrorCode::TypeMismatch, "expected i32, found string", span())
            .with_help("cast with `as i32`");
        let rendered = d.to_string();
        assert!(rendered.contains("E0308"));
        assert!(rendered.contains("help: cast with `as i32`"));
    }
}
