//! Diagnostics
//!
//! Every stage of the pipeline reports failure through [`Diagnostic`]: a kind,
//! an original source position, and a message. Stages either return their full
//! output or the first diagnostic; there is no partial-success mode.

use std::fmt;

/// Position in the original (pre-preprocessing) source.
///
/// Line and column are 1-based. The preprocessor's line map guarantees that
/// positions refer to the file the text actually came from, not the
/// concatenated translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourcePos {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Which stage produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    Preprocess,
    Lex,
    Parse,
    Runtime,
    Codegen,
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagKind::Preprocess => "preprocessing error",
            DiagKind::Lex => "lex error",
            DiagKind::Parse => "parse error",
            DiagKind::Runtime => "runtime error",
            DiagKind::Codegen => "codegen error",
        };
        f.write_str(name)
    }
}

/// A positioned error from any pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub pos: SourcePos,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagKind, pos: SourcePos, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            pos,
            message: message.into(),
        }
    }

    pub fn preprocess(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(DiagKind::Preprocess, pos, message)
    }

    pub fn lex(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(DiagKind::Lex, pos, message)
    }

    pub fn parse(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(DiagKind::Parse, pos, message)
    }

    pub fn runtime(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(DiagKind::Runtime, pos, message)
    }

    pub fn codegen(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::new(DiagKind::Codegen, pos, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.kind, self.pos, self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::parse(SourcePos::new("main.sc", 3, 14), "unexpected token ')'");
        assert_eq!(
            diag.to_string(),
            "parse error: main.sc:3:14: unexpected token ')'"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DiagKind::Preprocess.to_string(), "preprocessing error");
        assert_eq!(DiagKind::Runtime.to_string(), "runtime error");
    }
}
