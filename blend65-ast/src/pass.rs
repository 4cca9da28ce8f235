//! Pass plumbing: result envelope, diagnostic accumulation, shared limits.

use crate::diagnostic::{Diagnostic, DiagnosticCode, Severity};

/// Tunable limits shared by the analysis passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Upper bound on fixed-point iterations of any data-flow pass.
    /// Overruns indicate a monotonicity bug and surface as
    /// [`DiagnosticCode::IterationCapExceeded`].
    pub max_dataflow_iterations: usize,
    /// Upper bound on diagnostics retained per pass.
    pub diagnostic_cap: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_dataflow_iterations: 1000,
            diagnostic_cap: 256,
        }
    }
}

/// Outcome of one pass: its artifact plus everything it had to say.
#[derive(Debug, Clone)]
pub struct PassResult<T> {
    /// The artifact the pass produced. Populated even on failure so IDE
    /// callers can inspect partial results.
    pub data: T,
    /// Diagnostics in emission order.
    pub diagnostics: Vec<Diagnostic>,
    /// True iff no diagnostic has severity `Error`.
    pub success: bool,
}

impl<T> PassResult<T> {
    /// Wrap `data` with the diagnostics of `sink`.
    pub fn from_sink(data: T, sink: DiagnosticSink) -> Self {
        let success = sink.success();
        Self {
            data,
            diagnostics: sink.into_diagnostics(),
            success,
        }
    }

    /// Successful result with no diagnostics.
    pub fn ok(data: T) -> Self {
        Self {
            data,
            diagnostics: Vec::new(),
            success: true,
        }
    }

    /// Map the artifact, keeping diagnostics.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PassResult<U> {
        PassResult {
            data: f(self.data),
            diagnostics: self.diagnostics,
            success: self.success,
        }
    }
}

/// Capped accumulator for a single pass's diagnostics.
///
/// When the cap is hit, further diagnostics are counted and dropped;
/// `dropped()` exposes how many, so callers can report the truncation.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    cap: usize,
    dropped: usize,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::with_cap(AnalysisConfig::default().diagnostic_cap)
    }
}

impl DiagnosticSink {
    /// Sink retaining at most `cap` diagnostics.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            diagnostics: Vec::new(),
            cap,
            dropped: 0,
        }
    }

    /// Record a diagnostic, subject to the cap.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if self.diagnostics.len() < self.cap {
            self.diagnostics.push(diagnostic);
        } else {
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    /// Record an internal failure of the owning pass.
    pub fn internal_error(&mut self, pass: &str, detail: impl core::fmt::Display) {
        // Internal errors bypass the cap; losing them would hide bugs.
        self.diagnostics.push(Diagnostic::error(
            DiagnosticCode::InternalError,
            format!("{pass}: {detail}"),
        ));
    }

    /// True iff nothing of severity `Error` was recorded.
    pub fn success(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Number of diagnostics dropped by the cap.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Count of retained diagnostics with `severity`.
    pub fn count_of(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Consume the sink, yielding the retained diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Borrow the retained diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
