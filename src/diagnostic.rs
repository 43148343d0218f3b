use crate::error::EngineError;
use crate::span::Span;

/// A source-level diagnostic (error or warning) from the expression front end.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn report<'a>(&self, filename: &'a str, color: bool) -> ariadne::Report<'a, (&'a str, std::ops::Range<usize>)> {
        use ariadne::{Color, Config, Label, Report, ReportKind};

        let (kind, tint) = match self.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_config(Config::default().with_color(color))
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.range()))
                    .with_message(&self.message)
                    .with_color(tint),
            );
        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }
        report.finish()
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        let _ = self
            .report(filename, true)
            .eprint((filename, ariadne::Source::from(source)));
    }

    /// Render without color, for logs and tests.
    pub fn render_to_string(&self, filename: &str, source: &str) -> String {
        let mut out = Vec::new();
        let _ = self
            .report(filename, false)
            .write((filename, ariadne::Source::from(source)), &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

/// Collapse front-end errors into one engine error.
pub fn into_engine_error(diagnostics: &[Diagnostic]) -> EngineError {
    let messages: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.message.as_str())
        .collect();
    EngineError::compile(if messages.is_empty() {
        "invalid source".to_string()
    } else {
        messages.join("; ")
    })
}
