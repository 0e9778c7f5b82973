//! Diagnostics reported while compiling
//!
//! The engine counts errors even when nobody listens, so the pipeline can stop
//! between stages without a sink installed.

use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational note
    Note,
    /// Warning
    Warning,
    /// Error, compilation will fail
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A 1-based source position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLoc {
    /// Line
    pub line: u32,
    /// Column
    pub column: u32,
}

impl SourceLoc {
    /// Create a location
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Is this a real position
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A range of source positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceRange {
    /// First position
    pub start: SourceLoc,
    /// Last position
    pub end: SourceLoc,
}

/// A single reported diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Where it applies
    pub range: SourceRange,
    /// Message
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.range.start, self.severity, self.message)
    }
}

/// Receiver of diagnostics
pub trait DiagnosticSink: Send {
    /// Handle one diagnostic
    fn report(&mut self, diagnostic: &Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.push(diagnostic.clone());
    }
}

/// Counts diagnostics and forwards them to an optional sink
#[derive(Default)]
pub struct DiagnosticEngine {
    sink: Option<Box<dyn DiagnosticSink>>,
    errors: usize,
    warnings: usize,
    first_error: Option<Diagnostic>,
}

impl fmt::Debug for DiagnosticEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticEngine")
            .field("has_sink", &self.sink.is_some())
            .field("errors", &self.errors)
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl DiagnosticEngine {
    /// Engine without a sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine forwarding to `sink`
    pub fn with_sink(sink: Box<dyn DiagnosticSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Report a diagnostic
    pub fn report(&mut self, severity: Severity, range: SourceRange, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            severity,
            range,
            message: message.into(),
        };
        match severity {
            Severity::Error => {
                self.errors += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(diagnostic.clone());
                }
            }
            Severity::Warning => self.warnings += 1,
            Severity::Note => {}
        }
        tracing::trace!(%diagnostic, "diagnostic");
        if let Some(sink) = self.sink.as_mut() {
            sink.report(&diagnostic);
        }
    }

    /// Report an error at a single position
    pub fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.report(
            Severity::Error,
            SourceRange {
                start: loc,
                end: loc,
            },
            message,
        );
    }

    /// Report a warning at a single position
    pub fn warning(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.report(
            Severity::Warning,
            SourceRange {
                start: loc,
                end: loc,
            },
            message,
        );
    }

    /// Errors reported so far
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Warnings reported so far
    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// Has any error been reported
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// The first error reported
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.first_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Shared(Arc<Mutex<Vec<Diagnostic>>>);

    impl DiagnosticSink for Shared {
        fn report(&mut self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    #[test]
    fn test_counts_without_sink() {
        let mut diag = DiagnosticEngine::new();
        diag.warning(SourceLoc::new(1, 1), "w");
        diag.error(SourceLoc::new(2, 3), "first");
        diag.error(SourceLoc::new(4, 1), "second");
        assert_eq!(diag.error_count(), 2);
        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.first_error().unwrap().message, "first");
    }

    #[test]
    fn test_forwards_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut diag = DiagnosticEngine::with_sink(Box::new(Shared(seen.clone())));
        diag.error(SourceLoc::new(1, 5), "bad");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to_string(), "1:5: error: bad");
    }
}
