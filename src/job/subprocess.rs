//! Worker Subprocess
//!
//! Wraps the external line-oriented worker program. The protocol is a strict
//! line-for-line contract: one line written to the child's stdin produces
//! exactly one line on its stdout, and the program must not buffer multiple
//! outputs before responding or the exchange deadlocks. Because the contract
//! is strict, a reply is awaited under a bounded timeout and a miss fails
//! the exchange instead of blocking the pipeline forever.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::types::JOB_DONE_SENTINEL;

pub struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    /// Spawns the worker program given as `[program, arg...]` with piped
    /// stdio. Stderr is inherited so worker diagnostics reach the node log.
    pub fn spawn(source: &[String]) -> Result<Self> {
        let (program, args) = source
            .split_first()
            .context("empty worker program invocation")?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // A runner that bails mid-job must not leave the child behind.
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning worker program {}", program))?;

        let stdin = child.stdin.take().context("worker stdin unavailable")?;
        let stdout = child.stdout.take().context("worker stdout unavailable")?;

        tracing::info!("Spawned worker subprocess {}", program);

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    /// Sends one input line and reads exactly one output line.
    pub async fn exchange(&mut self, line: &str, reply_timeout: Duration) -> Result<String> {
        let stdin = self.stdin.as_mut().context("worker stdin already closed")?;

        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;

        let mut reply = String::new();
        let read = tokio::time::timeout(reply_timeout, self.stdout.read_line(&mut reply))
            .await
            .map_err(|_| {
                anyhow::anyhow!("worker did not reply within {:?}", reply_timeout)
            })??;

        if read == 0 {
            return Err(anyhow::anyhow!("worker closed its output stream"));
        }

        while reply.ends_with('\n') || reply.ends_with('\r') {
            reply.pop();
        }

        Ok(reply)
    }

    /// Asks the worker to drain and exit: writes the end-of-job sentinel,
    /// closes stdin and reaps the child.
    pub async fn finish(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .write_all(format!("{}\n", JOB_DONE_SENTINEL).as_bytes())
                .await?;
            stdin.flush().await?;
            // Dropping stdin closes the pipe; programs that key off EOF
            // instead of the sentinel exit too.
        }

        let status = self.child.wait().await?;
        tracing::info!("Worker subprocess exited with {}", status);
        Ok(())
    }

    /// Hard teardown for abandoned jobs.
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill worker subprocess: {}", e);
        }
    }
}
