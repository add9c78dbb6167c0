//! Scripted interpreter for tests (feature: testing).

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    OutputSink,
    traits::{ExecutionFault, Interpreter, InterpreterError, InterpreterFactory},
};

/// Evaluation behavior: `(source, self_contained, out) -> more`.
pub type Script =
    Arc<dyn Fn(&str, bool, &mut OutputSink) -> Result<bool, ExecutionFault> + Send + Sync>;

/// One call made to a scripted interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub source: String,
    pub self_contained: bool,
}

/// Shared record of everything the scripted interpreters saw.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    submissions: Arc<Mutex<Vec<Submission>>>,
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Transcript {
    /// Submissions in call order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sources in call order.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        self.submissions().into_iter().map(|s| s.source).collect()
    }

    /// Number of interpreters created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of interpreters closed.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, source: &str, self_contained: bool) {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Submission {
                source: source.to_string(),
                self_contained,
            });
    }
}

/// Interpreter whose behavior is a closure.
pub struct ScriptedInterpreter {
    script: Script,
    transcript: Transcript,
    closed: bool,
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn parse_or_execute(
        &mut self,
        source: &str,
        self_contained: bool,
        out: &mut OutputSink,
    ) -> Result<bool, ExecutionFault> {
        self.transcript.record(source, self_contained);
        (self.script)(source, self_contained, out)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transcript.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory producing scripted interpreters that share one transcript.
#[derive(Clone)]
pub struct ScriptedFactory {
    script: Script,
    transcript: Transcript,
    fail_create: bool,
}

impl ScriptedFactory {
    /// Factory running `script` for every evaluation.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, bool, &mut OutputSink) -> Result<bool, ExecutionFault> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            transcript: Transcript::default(),
            fail_create: false,
        }
    }

    /// Factory running [`toy_script`].
    #[must_use]
    pub fn toy() -> Self {
        Self::new(toy_script)
    }

    /// Factory whose `create` always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::toy()
        }
    }

    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

#[async_trait]
impl InterpreterFactory for ScriptedFactory {
    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
        if self.fail_create {
            return Err(InterpreterError::SpawnFailed("scripted failure".to_string()));
        }
        self.transcript.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedInterpreter {
            script: Arc::clone(&self.script),
            transcript: self.transcript.clone(),
            closed: false,
        }))
    }
}

/// A tiny line language, enough to drive protocol tests.
///
/// - a unit whose last non-blank line ends with `:` needs more input
/// - `a+b` on integers prints the sum
/// - `print(x)` prints `x`
/// - `raise ...` faults
/// - anything else is accepted silently
///
/// # Errors
/// Returns a fault for `raise` lines.
pub fn toy_script(
    source: &str,
    _self_contained: bool,
    out: &mut OutputSink,
) -> Result<bool, ExecutionFault> {
    let last = source.lines().rev().find(|l| !l.trim().is_empty());
    if last.is_some_and(|l| l.trim_end().ends_with(':')) {
        return Ok(true);
    }

    for line in source.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(reason) = line.strip_prefix("raise") {
            out.write_str("Traceback (most recent call last):\n");
            return Err(ExecutionFault::Raised(reason.trim().to_string()));
        }
        if let Some(arg) = line.strip_prefix("print(").and_then(|l| l.strip_suffix(')')) {
            out.write_str(arg);
            out.write_str("\n");
        } else if let Some((a, b)) = line.split_once('+') {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
                out.write_str(&format!("{}\n", a + b));
            }
        }
    }
    Ok(false)
}
