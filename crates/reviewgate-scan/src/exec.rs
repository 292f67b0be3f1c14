use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    /// Extra attempts after the first.
    pub retries: u32,
    pub delay: Duration,
}

impl RetryBudget {
    pub fn new(retries: u32, delay_ms: u64) -> Self {
        Self {
            retries,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// Runs a subprocess, treating only the given exit codes as success, and
/// retries with a fixed delay until the budget is spent. Both stdout and
/// stderr are captured on every attempt. An unexpected exit status after
/// exhaustion is a hard failure for this invocation only; callers keep the
/// rest of the scan going.
pub fn execute_with_retry(
    program: &str,
    args: &[String],
    cwd: &Path,
    expected_exit_codes: &[i32],
    budget: RetryBudget,
) -> Result<ExecOutput> {
    let attempts = budget.retries.saturating_add(1);
    let mut last_failure: Option<anyhow::Error> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            thread::sleep(budget.delay);
        }

        let output = match Command::new(program).args(args).current_dir(cwd).output() {
            Ok(output) => output,
            Err(err) => {
                last_failure = Some(
                    anyhow::Error::new(err).context(format!("failed to invoke `{program}`")),
                );
                continue;
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if expected_exit_codes.contains(&exit_code) {
            return Ok(ExecOutput {
                exit_code,
                stdout,
                stderr,
            });
        }

        last_failure = Some(anyhow!(
            "`{program}` exited with unexpected status {exit_code}: {}",
            stderr.trim()
        ));
    }

    Err(last_failure.unwrap_or_else(|| anyhow!("`{program}` was never invoked")))
        .with_context(|| format!("command failed after {attempts} attempt(s)"))
}
