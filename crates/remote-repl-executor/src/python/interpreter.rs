//! Python interpreter process.

use std::{path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use remote_repl_core::{
    Interpreter, InterpreterFactory, OutputSink,
    traits::{ExecutionFault, InterpreterError},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, ChildStdout, Command},
};

use super::{
    BOOTSTRAP,
    protocol::{EvalEvent, EvalRequest},
};
use crate::command::{CommandBuildError, CommandBuilder};

/// Grace period for the process to exit after stdin closes.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// One Python process with its own namespace.
///
/// The process lives in its own process group so that anything it spawns is
/// killed with it.
pub struct PythonInterpreter {
    child: AsyncGroupChild,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl PythonInterpreter {
    /// Spawn `program args... -u -c <bootstrap>`.
    ///
    /// # Errors
    /// Returns error if the process cannot be started.
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self, InterpreterError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .args(["-u", "-c", BOOTSTRAP])
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .group_spawn()
            .map_err(|e| InterpreterError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let stdin = child.inner().stdin.take();
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| InterpreterError::SpawnFailed("stdout not captured".to_string()))?;

        tracing::debug!(program = %program.display(), pid = ?child.id(), "Spawned interpreter");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    async fn send_request(&mut self, source: &str, multiline: bool) -> Result<(), ExecutionFault> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExecutionFault::Unavailable("interpreter closed".to_string()))?;

        let request = serde_json::to_string(&EvalRequest { source, multiline })
            .map_err(|e| ExecutionFault::Unavailable(e.to_string()))?;
        stdin.write_all(request.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    async fn parse_or_execute(
        &mut self,
        source: &str,
        self_contained: bool,
        out: &mut OutputSink,
    ) -> Result<bool, ExecutionFault> {
        self.send_request(source, self_contained).await?;

        loop {
            self.line.clear();
            if self.stdout.read_line(&mut self.line).await? == 0 {
                return Err(ExecutionFault::Unavailable("interpreter exited".to_string()));
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EvalEvent>(line) {
                Ok(EvalEvent::Output { text }) => out.write_str(&text),
                Ok(EvalEvent::Done { more }) => return Ok(more),
                Ok(EvalEvent::Error { message }) => return Err(ExecutionFault::Raised(message)),
                Err(e) => tracing::warn!("Unexpected interpreter output ({e}): {line}"),
            }
        }
    }

    async fn close(&mut self) {
        // Closing stdin ends the bootstrap's read loop.
        if self.stdin.take().is_none() {
            return;
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Interpreter exited"),
            Ok(Err(e)) => tracing::warn!("Failed to wait for interpreter: {e}"),
            Err(_) => {
                tracing::warn!("Interpreter did not exit, killing");
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!("Failed to kill interpreter: {e}");
                }
                let _ = self.child.wait().await;
            }
        }
    }
}

impl Drop for PythonInterpreter {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.child.start_kill();
        }
    }
}

/// Spawns one [`PythonInterpreter`] per session.
#[derive(Debug, Clone)]
pub struct PythonInterpreterFactory {
    command: CommandBuilder,
}

impl PythonInterpreterFactory {
    #[must_use]
    pub const fn new(command: CommandBuilder) -> Self {
        Self { command }
    }
}

impl Default for PythonInterpreterFactory {
    fn default() -> Self {
        Self::new(CommandBuilder::new("python3"))
    }
}

#[async_trait]
impl InterpreterFactory for PythonInterpreterFactory {
    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
        let (program, args) = self
            .command
            .build(&[])
            .map_err(|e| InterpreterError::SpawnFailed(e.to_string()))?
            .into_resolved()
            .await
            .map_err(|e| match e {
                CommandBuildError::NotFound(program) => InterpreterError::ExecutableNotFound(program),
                other => InterpreterError::SpawnFailed(other.to_string()),
            })?;

        let interpreter = PythonInterpreter::spawn(&program, &args)?;
        Ok(Box::new(interpreter))
    }
}
