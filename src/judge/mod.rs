//! Judge: runs a submission against every test case of its question and
//! turns the raw executions into a [`Verdict`].
//!
//! The execution environment sits behind the [`Runner`] trait. Local runners
//! spawn an interpreter per test; the remote runner delegates to the judge
//! server. Failures of the environment itself are returned as
//! [`EvaluationInfrastructureError`] and never folded into a verdict.

pub mod judge_js;
pub mod judge_python;
pub mod judge_remote;
pub mod judge_utils;
pub mod literal;
pub mod process;
pub mod verdict;
pub mod wire;

pub use verdict::{TestReport, Verdict};

use crate::config::JudgeConfig;
use crate::error::{EvaluationInfrastructureError, JudgeError};
use crate::model::{CompareMode, Language, Question, Submission, TestCase};
use judge_utils::{line_diff, normalize_stdout, stdout_matches};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Ok,
    SyntaxError { diagnostics: String },
}

/// What happened when one test case was executed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Execution {
    Returned {
        value: String,
        #[serde(default)]
        stdout: String,
    },
    Raised {
        message: String,
        #[serde(default)]
        stdout: String,
    },
    TimedOut {
        limit_ms: u64,
    },
    OutputLimitExceeded {
        limit_bytes: usize,
    },
    Cancelled,
}

pub trait Runner: Send + Sync {
    fn language(&self) -> Language;

    /// Static validation. A syntax error is an outcome, not an `Err`.
    fn check(&self, sandbox: &Path, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError>;

    fn run(
        &self,
        sandbox: &Path,
        source: &str,
        test: &TestCase,
        limits: &RunLimits,
        cancel: &CancelToken,
    ) -> Result<Execution, EvaluationInfrastructureError>;
}

pub struct Judge {
    runners: HashMap<Language, Arc<dyn Runner>>,
    config: JudgeConfig,
}

impl Judge {
    /// A judge without runners; add them with [`Judge::with_runner`].
    pub fn new(config: JudgeConfig) -> Self {
        Self {
            runners: HashMap::new(),
            config,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runners.insert(runner.language(), runner);
        self
    }

    /// Remote runners when an endpoint is configured, local interpreters otherwise.
    pub fn from_config(config: JudgeConfig) -> Self {
        let mut judge = Self::new(config.clone());

        if let Some(endpoint) = config.remote_endpoint.as_deref() {
            for language in Language::ALL {
                judge = judge.with_runner(Arc::new(judge_remote::RemoteRunner::new(endpoint, language)));
            }
            info!("judge delegating to remote endpoint {endpoint}");
            return judge;
        }

        match judge_python::PythonRunner::detect(config.python.as_deref()) {
            Some(runner) => judge = judge.with_runner(Arc::new(runner)),
            None => warn!("no Python interpreter found; python questions cannot be judged"),
        }
        match judge_js::NodeRunner::detect(config.node.as_deref()) {
            Some(runner) => judge = judge.with_runner(Arc::new(runner)),
            None => warn!("no node binary found; javascript questions cannot be judged"),
        }
        judge
    }

    pub fn supports(&self, language: Language) -> bool {
        self.runners.contains_key(&language)
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn runner(&self, language: Language) -> Result<&Arc<dyn Runner>, EvaluationInfrastructureError> {
        self.runners
            .get(&language)
            .ok_or(EvaluationInfrastructureError::RunnerUnavailable(language))
    }

    /// Static check alone, in a throwaway sandbox.
    pub fn check_source(&self, language: Language, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError> {
        let runner = self.runner(language)?;
        let sandbox = new_sandbox()?;
        runner.check(sandbox.path(), source)
    }

    /// One test execution, in a throwaway sandbox.
    pub fn run_test(
        &self,
        language: Language,
        source: &str,
        test: &TestCase,
        limits: &RunLimits,
    ) -> Result<Execution, EvaluationInfrastructureError> {
        let runner = self.runner(language)?;
        let sandbox = new_sandbox()?;
        runner.run(sandbox.path(), source, test, limits, &CancelToken::new())
    }

    pub fn evaluate(&self, submission: &Submission, question: &Question) -> Result<Verdict, EvaluationInfrastructureError> {
        match self.evaluate_with_cancel(submission, question, &CancelToken::new()) {
            Ok(verdict) => Ok(verdict),
            Err(JudgeError::Infrastructure(err)) => Err(err),
            // Nobody else holds the token.
            Err(JudgeError::Cancelled) => Err(EvaluationInfrastructureError::Process(
                std::io::Error::other("evaluation cancelled"),
            )),
        }
    }

    pub fn evaluate_with_cancel(
        &self,
        submission: &Submission,
        question: &Question,
        cancel: &CancelToken,
    ) -> Result<Verdict, JudgeError> {
        if submission.language != question.language {
            return Err(EvaluationInfrastructureError::LanguageMismatch {
                submitted: submission.language,
                expected: question.language,
            }
            .into());
        }
        if question.test_cases.is_empty() {
            return Err(EvaluationInfrastructureError::NoTests(question.id).into());
        }
        let runner = self.runner(question.language)?;
        let sandbox = new_sandbox()?;

        if cancel.is_cancelled() {
            return Err(JudgeError::Cancelled);
        }

        let source = submission.source_text.as_str();
        match runner.check(sandbox.path(), source).inspect_err(|err| {
            error!("static check failed for question {}: {err}", question.id)
        })? {
            CheckOutcome::Ok => {}
            CheckOutcome::SyntaxError { diagnostics } => {
                info!("question {}: submission rejected by static check", question.id);
                return Ok(Verdict::syntax_error(diagnostics));
            }
        }

        let started = Instant::now();
        let budget = self.config.submission_budget();
        let per_test = self.config.test_timeout(question.difficulty);
        let mut reports = Vec::with_capacity(question.test_cases.len());
        let mut incomplete = false;

        for (index, test) in question.test_cases.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JudgeError::Cancelled);
            }

            let remaining = budget.saturating_sub(started.elapsed());
            if incomplete || remaining.is_zero() {
                incomplete = true;
                reports.push(TestReport::not_run(index, test, question.is_public_test(index)));
                continue;
            }

            let limits = RunLimits {
                timeout: per_test.min(remaining),
                max_output_bytes: self.config.max_output_bytes,
            };
            let execution = runner
                .run(sandbox.path(), source, test, &limits, cancel)
                .inspect_err(|err| error!("question {} test {index}: {err}", question.id))?;
            debug!("question {} test {index}: {execution:?}", question.id);

            match execution {
                Execution::Cancelled => return Err(JudgeError::Cancelled),
                Execution::TimedOut { .. } if remaining < per_test => incomplete = true,
                _ => {}
            }
            reports.push(grade(question, index, test, &execution));
        }

        let verdict = Verdict::from_reports(reports, incomplete);
        let (passed, total) = verdict.summary();
        info!(
            "question {}: {passed}/{total} tests passed{}",
            question.id,
            if verdict.incomplete { " (incomplete)" } else { "" }
        );
        Ok(verdict)
    }
}

fn new_sandbox() -> Result<tempfile::TempDir, EvaluationInfrastructureError> {
    tempfile::Builder::new()
        .prefix("code_master-")
        .tempdir()
        .map_err(EvaluationInfrastructureError::Sandbox)
}

fn grade(question: &Question, index: usize, test: &TestCase, execution: &Execution) -> TestReport {
    let expected = &test.expected_output;
    let (passed, actual, error, diff) = match execution {
        Execution::Returned { value, stdout } => match question.compare {
            CompareMode::ReturnValue => (literal::values_match(value, expected), Some(value.clone()), None, None),
            CompareMode::Stdout => {
                let passed = stdout_matches(stdout, expected);
                let diff = (!passed).then(|| line_diff(expected, stdout));
                (passed, Some(normalize_stdout(stdout)), None, diff)
            }
        },
        Execution::Raised { message, .. } => (false, None, Some(message.clone()), None),
        Execution::TimedOut { limit_ms } => (false, None, Some(format!("timed out after {limit_ms} ms")), None),
        Execution::OutputLimitExceeded { limit_bytes } => {
            (false, None, Some(format!("output exceeded the {limit_bytes} byte limit")), None)
        }
        Execution::Cancelled => (false, None, Some("cancelled".to_string()), None),
    };

    if question.is_public_test(index) {
        TestReport::Public {
            index,
            input: test.input.clone(),
            expected: expected.clone(),
            actual,
            error,
            diff,
            passed,
        }
    } else {
        TestReport::Hidden { index, passed }
    }
}
