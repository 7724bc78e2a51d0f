use super::judge_utils::{apply_harness, build_script_path, strip_sandbox};
use super::process::{ProcessOutcome, run_process};
use super::{CancelToken, CheckOutcome, Execution, RunLimits, Runner};
use crate::error::EvaluationInfrastructureError;
use crate::model::{Language, TestCase};
use log::debug;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

const CHECK_TIMEOUT_MS: u64 = 10_000;
const CHECK_OUTPUT_BYTES: usize = 64 * 1024;

// `-I` isolates from the user's environment, `-X utf8` pins the stdout encoding.
const ISOLATION_FLAGS: [&str; 4] = ["-I", "-B", "-X", "utf8"];

const HARNESS: &str = r#"{{USER_CODE}}


def __code_master_entry():
    import sys as __cm_sys
    __cm_result = ({{INPUT}})
    __cm_sys.stdout.flush()
    __cm_sys.stdout.write("\n{{MARKER}}\n" + repr(__cm_result) + "\n")
    __cm_sys.stdout.flush()


__code_master_entry()
"#;

/// Runs Python submissions with a local interpreter, one process per test.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    program: String,
}

impl PythonRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// First interpreter that answers `--version`, trying `preferred` alone when given.
    pub fn detect(preferred: Option<&str>) -> Option<Self> {
        let candidates = match preferred {
            Some(program) => vec![program],
            None => vec!["python3", "python"],
        };

        for candidate in candidates {
            let ok = Command::new(candidate)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if ok {
                debug!("using Python interpreter {candidate}");
                return Some(Self::new(candidate));
            }
        }
        None
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, sandbox: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(ISOLATION_FLAGS).current_dir(sandbox);
        cmd
    }
}

impl Runner for PythonRunner {
    fn language(&self) -> Language {
        Language::Python
    }

    fn check(&self, sandbox: &Path, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError> {
        let path = sandbox.join("solution.py");
        fs::write(&path, source).map_err(EvaluationInfrastructureError::Sandbox)?;

        let mut cmd = self.command(sandbox);
        cmd.arg("-m").arg("py_compile").arg(&path);
        let limits = RunLimits {
            timeout: Duration::from_millis(CHECK_TIMEOUT_MS),
            max_output_bytes: CHECK_OUTPUT_BYTES,
        };

        match run_process(&mut cmd, &limits, &CancelToken::new())? {
            ProcessOutcome::Exited(output) if output.success() => Ok(CheckOutcome::Ok),
            ProcessOutcome::Exited(output) => Ok(CheckOutcome::SyntaxError {
                diagnostics: strip_sandbox(&output.stderr, sandbox).trim().to_string(),
            }),
            other => Err(EvaluationInfrastructureError::Process(std::io::Error::other(format!(
                "py_compile did not finish: {other:?}"
            )))),
        }
    }

    fn run(
        &self,
        sandbox: &Path,
        source: &str,
        test: &TestCase,
        limits: &RunLimits,
        cancel: &CancelToken,
    ) -> Result<Execution, EvaluationInfrastructureError> {
        let script = apply_harness(HARNESS, source, &test.input);
        let path = build_script_path(sandbox, source, &test.input, "py");
        fs::write(&path, script).map_err(EvaluationInfrastructureError::Sandbox)?;

        let mut cmd = self.command(sandbox);
        cmd.arg(&path);
        let outcome = run_process(&mut cmd, limits, cancel)?;
        Ok(outcome.into_execution(limits, sandbox))
    }
}
