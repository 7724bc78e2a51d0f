use crate::model::TestCase;
use serde::{Deserialize, Serialize};

pub const NOT_RUN_MESSAGE: &str = "not run: submission time budget exhausted";

/// Result of one test case. Hidden tests only ever carry their outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "visibility", rename_all = "snake_case")]
pub enum TestReport {
    Public {
        index: usize,
        input: String,
        expected: String,
        actual: Option<String>,
        error: Option<String>,
        diff: Option<String>,
        passed: bool,
    },
    Hidden {
        index: usize,
        passed: bool,
    },
}

impl TestReport {
    pub fn passed(&self) -> bool {
        match self {
            TestReport::Public { passed, .. } | TestReport::Hidden { passed, .. } => *passed,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            TestReport::Public { index, .. } | TestReport::Hidden { index, .. } => *index,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, TestReport::Public { .. })
    }

    /// Report for a test skipped because the submission ran out of time.
    pub fn not_run(index: usize, test: &TestCase, public: bool) -> Self {
        if public {
            TestReport::Public {
                index,
                input: test.input.clone(),
                expected: test.expected_output.clone(),
                actual: None,
                error: Some(NOT_RUN_MESSAGE.to_string()),
                diff: None,
                passed: false,
            }
        } else {
            TestReport::Hidden {
                index,
                passed: false,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub overall_passed: bool,
    pub per_test_results: Vec<TestReport>,
    pub diagnostics: Option<String>,
    #[serde(default)]
    pub incomplete: bool,
}

impl Verdict {
    pub fn syntax_error(diagnostics: impl Into<String>) -> Self {
        Self {
            overall_passed: false,
            per_test_results: Vec::new(),
            diagnostics: Some(diagnostics.into()),
            incomplete: false,
        }
    }

    pub fn from_reports(per_test_results: Vec<TestReport>, incomplete: bool) -> Self {
        let overall_passed = !incomplete
            && !per_test_results.is_empty()
            && per_test_results.iter().all(TestReport::passed);
        Self {
            overall_passed,
            per_test_results,
            diagnostics: None,
            incomplete,
        }
    }

    /// (passed, total)
    pub fn summary(&self) -> (usize, usize) {
        let passed = self.per_test_results.iter().filter(|r| r.passed()).count();
        (passed, self.per_test_results.len())
    }

    pub fn pass_fail(&self) -> Vec<bool> {
        self.per_test_results.iter().map(TestReport::passed).collect()
    }
}
