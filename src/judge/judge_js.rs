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

// JS values as literals the comparator understands: Set as `{a, b}`,
// Map and objects as `{k: v}`, BigInt with an `n` suffix.
const HARNESS: &str = r#"{{USER_CODE}}

;(function () {
  const __cmRepr = (value) => {
    if (value === undefined) return "undefined";
    if (value === null) return "null";
    switch (typeof value) {
      case "string":
        return JSON.stringify(value);
      case "number":
        if (Number.isNaN(value)) return "NaN";
        if (!Number.isFinite(value)) return value > 0 ? "Infinity" : "-Infinity";
        return String(value);
      case "bigint":
        return value.toString() + "n";
      case "boolean":
        return String(value);
      case "function":
        return JSON.stringify("[Function " + (value.name || "anonymous") + "]");
    }
    if (Array.isArray(value)) return "[" + value.map(__cmRepr).join(", ") + "]";
    if (value instanceof Set) {
      return value.size === 0 ? "set()" : "{" + [...value].map(__cmRepr).join(", ") + "}";
    }
    if (value instanceof Map) {
      return "{" + [...value].map(([k, v]) => __cmRepr(k) + ": " + __cmRepr(v)).join(", ") + "}";
    }
    return "{" + Object.keys(value).map((k) => JSON.stringify(k) + ": " + __cmRepr(value[k])).join(", ") + "}";
  };
  const __cmResult = ({{INPUT}});
  process.stdout.write("\n{{MARKER}}\n" + __cmRepr(__cmResult) + "\n");
})();
"#;

/// Runs JavaScript submissions with a local `node`, one process per test.
#[derive(Debug, Clone)]
pub struct NodeRunner {
    program: String,
}

impl NodeRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn detect(preferred: Option<&str>) -> Option<Self> {
        let candidate = preferred.unwrap_or("node");
        let ok = Command::new(candidate)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !ok {
            return None;
        }
        debug!("using node binary {candidate}");
        Some(Self::new(candidate))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Runner for NodeRunner {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn check(&self, sandbox: &Path, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError> {
        let path = sandbox.join("solution.js");
        fs::write(&path, source).map_err(EvaluationInfrastructureError::Sandbox)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--check").arg(&path).current_dir(sandbox);
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
                "node --check did not finish: {other:?}"
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
        let path = build_script_path(sandbox, source, &test.input, "js");
        fs::write(&path, script).map_err(EvaluationInfrastructureError::Sandbox)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&path).current_dir(sandbox);
        let outcome = run_process(&mut cmd, limits, cancel)?;
        Ok(outcome.into_execution(limits, sandbox))
    }
}
