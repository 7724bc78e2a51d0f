#![allow(dead_code)]

use code_master::config::JudgeConfig;
use code_master::data::Catalog;
use code_master::error::{EvaluationInfrastructureError, ProgressionStorageError};
use code_master::judge::{CancelToken, CheckOutcome, Execution, Judge, RunLimits, Runner};
use code_master::model::{Difficulty, Language, QuestionId, TestCase, UserId};
use code_master::progress::{MemoryBackend, ProgressBackend, ProgressionStore};
use code_master::session::{ProgressListener, SessionOrchestrator};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const CATALOG: &str = r#"
questions:
  - id: 1
    title: Add
    language: python
    difficulty: beginner
    starter_code: "def add(a, b):\n    pass\n"
    test_cases:
      - { input: "add(2, 3)", expected: "5" }
  - id: 2
    title: Add again
    language: python
    difficulty: beginner
    test_cases:
      - { input: "add(1, 1)", expected: "2" }
      - { input: "add(0, 0)", expected: "0" }
      - { input: "add(-4, 1)", expected: "-3" }
  - id: 3
    title: Add once more
    language: python
    difficulty: beginner
    test_cases:
      - { input: "add(10, 5)", expected: "15" }
  - id: 20
    title: Add in JS
    language: javascript
    difficulty: beginner
    test_cases:
      - { input: "add(2, 3)", expected: "5" }
"#;

pub const SYNTAX_ERROR: &str = "SyntaxError: invalid syntax";

/// Understands just enough "code" to judge `add(a, b)` calls:
/// `a + b` adds, `return 4` always answers 4, `a + b if a >= 0 else 0`
/// breaks on negative input, `raise` raises and `def add(:` is a syntax error.
pub fn fake_add(source: &str, test: &TestCase) -> Execution {
    let args: Vec<i64> = test
        .input
        .trim_start_matches("add(")
        .trim_end_matches(')')
        .split(',')
        .filter_map(|a| a.trim().parse().ok())
        .collect();
    let (a, b) = (args[0], args[1]);

    if source.contains("raise") {
        return Execution::Raised {
            message: "ValueError: nope".into(),
            stdout: String::new(),
        };
    }
    let value = if source.contains("return 4") {
        4
    } else if source.contains("if a >= 0 else 0") {
        if a >= 0 { a + b } else { 0 }
    } else {
        a + b
    };
    Execution::Returned {
        value: value.to_string(),
        stdout: String::new(),
    }
}

pub struct ScriptedRunner {
    language: Language,
    answer: fn(&str, &TestCase) -> Execution,
    /// While set, `run` blocks until cancelled or released.
    pub hold: AtomicBool,
    pub started: AtomicUsize,
    pub checks: AtomicUsize,
    pub broken: AtomicBool,
}

impl ScriptedRunner {
    pub fn new(language: Language, answer: fn(&str, &TestCase) -> Execution) -> Self {
        Self {
            language,
            answer,
            hold: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        }
    }

    pub fn wait_until_started(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.started.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "run never started");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Runner for ScriptedRunner {
    fn language(&self) -> Language {
        self.language
    }

    fn check(&self, _sandbox: &Path, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if source.contains("def add(:") {
            return Ok(CheckOutcome::SyntaxError {
                diagnostics: SYNTAX_ERROR.into(),
            });
        }
        Ok(CheckOutcome::Ok)
    }

    fn run(
        &self,
        _sandbox: &Path,
        source: &str,
        test: &TestCase,
        _limits: &RunLimits,
        cancel: &CancelToken,
    ) -> Result<Execution, EvaluationInfrastructureError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        while self.hold.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                return Ok(Execution::Cancelled);
            }
            thread::sleep(Duration::from_millis(5));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(EvaluationInfrastructureError::Spawn {
                program: "python3".into(),
                source: std::io::Error::other("sandbox crashed"),
            });
        }
        Ok((self.answer)(source, test))
    }
}

/// Memory storage whose reads or writes can be switched off.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyBackend {
    fn check_reads(&self) -> Result<(), ProgressionStorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ProgressionStorageError::Unavailable("storage down".into()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), ProgressionStorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProgressionStorageError::Unavailable("disk full".into()));
        }
        Ok(())
    }
}

impl ProgressBackend for FlakyBackend {
    fn load_solved(&self, user: &UserId, language: Language) -> Result<BTreeSet<QuestionId>, ProgressionStorageError> {
        self.check_reads()?;
        self.inner.load_solved(user, language)
    }

    fn store_solved(
        &self,
        user: &UserId,
        language: Language,
        solved: &BTreeSet<QuestionId>,
    ) -> Result<(), ProgressionStorageError> {
        self.check_writes()?;
        self.inner.store_solved(user, language, solved)
    }

    fn load_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
    ) -> Result<Option<String>, ProgressionStorageError> {
        self.check_reads()?;
        self.inner.load_source(user, language, question_id)
    }

    fn store_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
        source: &str,
    ) -> Result<(), ProgressionStorageError> {
        self.check_writes()?;
        self.inner.store_source(user, language, question_id, source)
    }

    fn clear(&self, user: &UserId, language: Language) -> Result<(), ProgressionStorageError> {
        self.check_writes()?;
        self.inner.clear(user, language)
    }

    fn users(&self, language: Language) -> Result<Vec<UserId>, ProgressionStorageError> {
        self.check_reads()?;
        self.inner.users(language)
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events").clone()
    }
}

impl ProgressListener for RecordingListener {
    fn question_solved(&self, user: &UserId, question_id: QuestionId) {
        self.events.lock().expect("events").push(format!("solved {user} {question_id}"));
    }

    fn question_unlocked(&self, user: &UserId, question_id: QuestionId) {
        self.events.lock().expect("events").push(format!("unlocked {user} {question_id}"));
    }

    fn group_completed(&self, user: &UserId, language: Language, difficulty: Difficulty) {
        self.events
            .lock()
            .expect("events")
            .push(format!("completed {user} {language} {difficulty}"));
    }
}

pub struct Harness {
    pub runner: Arc<ScriptedRunner>,
    pub backend: Arc<FlakyBackend>,
    pub listener: Arc<RecordingListener>,
    pub session: SessionOrchestrator,
}

/// Session over [`CATALOG`] with a scripted Python runner and no JavaScript runner.
pub fn harness() -> Harness {
    let backend = Arc::new(FlakyBackend::default());
    let (runner, listener, session) = session_over(backend.clone());
    Harness {
        runner,
        backend,
        listener,
        session,
    }
}

pub fn session_over(
    backend: Arc<dyn ProgressBackend>,
) -> (Arc<ScriptedRunner>, Arc<RecordingListener>, SessionOrchestrator) {
    let catalog = Arc::new(Catalog::from_yaml(CATALOG).expect("catalog"));
    let runner = Arc::new(ScriptedRunner::new(Language::Python, fake_add));
    let judge = Arc::new(Judge::new(JudgeConfig::default()).with_runner(runner.clone()));
    let progress = Arc::new(ProgressionStore::new(catalog.clone(), backend));
    let listener = Arc::new(RecordingListener::default());
    let session = SessionOrchestrator::new(catalog, judge, progress).with_listener(listener.clone());
    (runner, listener, session)
}

pub const CORRECT: &str = "def add(a, b):\n    return a + b\n";
pub const ALWAYS_FOUR: &str = "def add(a, b):\n    return 4\n";
pub const BROKEN_ON_NEGATIVES: &str = "def add(a, b):\n    return a + b if a >= 0 else 0\n";
pub const BAD_SYNTAX: &str = "def add(:\n    return a + b\n";
