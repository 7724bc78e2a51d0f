//! Run lifecycle for (user, question) pairs.
//!
//! `Idle -> Running -> Passed | Failed | InfrastructureError`, back to `Idle`
//! on the next edit or selection. While a pair is `Running` a second submit is
//! rejected; other pairs run concurrently.

use crate::data::Catalog;
use crate::error::{JudgeError, ProgressError, ProgressionStorageError, SessionError};
use crate::judge::{CancelToken, Judge, Verdict};
use crate::model::{Difficulty, Language, Question, QuestionId, Submission, UserId};
use crate::progress::ProgressionStore;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Passed,
    Failed,
    InfrastructureError,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Passed | RunState::Failed | RunState::InfrastructureError)
    }
}

/// Progress notifications, e.g. for unlock animations or the certificate.
/// Only sent when a run actually changed the solved set.
pub trait ProgressListener: Send + Sync {
    fn question_solved(&self, _user: &UserId, _question_id: QuestionId) {}

    fn question_unlocked(&self, _user: &UserId, _question_id: QuestionId) {}

    fn group_completed(&self, _user: &UserId, _language: Language, _difficulty: Difficulty) {}
}

#[derive(Debug)]
pub struct RunReport {
    pub verdict: Verdict,
    pub state: RunState,
    pub newly_solved: bool,
    pub unlocked: Option<QuestionId>,
    pub group_completed: bool,
    /// Persistence failures; the verdict above is valid regardless.
    pub storage_errors: Vec<ProgressionStorageError>,
}

#[derive(Debug, Default)]
struct RunSlot {
    state: RunState,
    cancel: Option<CancelToken>,
}

type RunKey = (UserId, QuestionId);
type RunTable = Mutex<HashMap<RunKey, RunSlot>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a pair as running; falls back to `Idle` if dropped without `finish`.
struct RunGuard<'a> {
    runs: &'a RunTable,
    key: RunKey,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, state: RunState) {
        set_state(self.runs, &self.key, state);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            set_state(self.runs, &self.key, RunState::Idle);
        }
    }
}

fn set_state(runs: &RunTable, key: &RunKey, state: RunState) {
    let mut runs = lock(runs);
    if state == RunState::Idle {
        runs.remove(key);
    } else {
        runs.insert(key.clone(), RunSlot { state, cancel: None });
    }
}

pub struct SessionOrchestrator {
    catalog: Arc<Catalog>,
    judge: Arc<Judge>,
    progress: Arc<ProgressionStore>,
    listeners: Vec<Arc<dyn ProgressListener>>,
    runs: RunTable,
}

impl SessionOrchestrator {
    pub fn new(catalog: Arc<Catalog>, judge: Arc<Judge>, progress: Arc<ProgressionStore>) -> Self {
        Self {
            catalog,
            judge,
            progress,
            listeners: Vec::new(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn progress(&self) -> &ProgressionStore {
        &self.progress
    }

    pub fn run_state(&self, user: &UserId, question_id: QuestionId) -> RunState {
        lock(&self.runs)
            .get(&(user.clone(), question_id))
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    /// The user edited the code or selected another question: a finished run
    /// goes back to `Idle`. A running one is left alone.
    pub fn touch(&self, user: &UserId, question_id: QuestionId) {
        let key = (user.clone(), question_id);
        let mut runs = lock(&self.runs);
        if runs.get(&key).is_some_and(|slot| slot.state.is_terminal()) {
            runs.remove(&key);
        }
    }

    /// Asks the in-flight run of the pair to stop. Returns false when nothing is running.
    pub fn cancel(&self, user: &UserId, question_id: QuestionId) -> bool {
        match lock(&self.runs).get(&(user.clone(), question_id)) {
            Some(RunSlot {
                state: RunState::Running,
                cancel: Some(token),
            }) => {
                token.cancel();
                info!("{user} cancelled the run of question {question_id}");
                true
            }
            _ => false,
        }
    }

    fn begin(&self, user: &UserId, question_id: QuestionId) -> Result<(RunGuard<'_>, CancelToken), SessionError> {
        let key = (user.clone(), question_id);
        let mut runs = lock(&self.runs);
        if runs.get(&key).is_some_and(|slot| slot.state == RunState::Running) {
            return Err(SessionError::RunInProgress(question_id));
        }
        let token = CancelToken::new();
        runs.insert(
            key.clone(),
            RunSlot {
                state: RunState::Running,
                cancel: Some(token.clone()),
            },
        );
        Ok((
            RunGuard {
                runs: &self.runs,
                key,
                finished: false,
            },
            token,
        ))
    }

    /// Judges `source` for the question and applies the result to the
    /// user's progression.
    pub fn submit(&self, user: &UserId, question_id: QuestionId, source: &str) -> Result<RunReport, SessionError> {
        let question = self
            .catalog
            .get_question(question_id)
            .ok_or(SessionError::UnknownQuestion(question_id))?;
        let mut storage_errors = Vec::new();
        // Unreadable progress must not cost the user a verdict: judge anyway.
        match self.progress.is_locked(question_id, user) {
            Ok(true) => return Err(SessionError::QuestionLocked(question_id)),
            Ok(false) => {}
            Err(err) => {
                warn!("lock state of question {question_id} unknown for {user}; judging anyway");
                collect_storage_error(err, &mut storage_errors)?;
            }
        }

        let (guard, cancel) = self.begin(user, question_id)?;

        if let Err(err) = self.progress.save_source(question_id, user, source) {
            collect_storage_error(err, &mut storage_errors)?;
        }

        let submission = Submission::new(question, source);
        let verdict = match self.judge.evaluate_with_cancel(&submission, question, &cancel) {
            Ok(_) if cancel.is_cancelled() => return Err(SessionError::Cancelled),
            Ok(verdict) => verdict,
            Err(JudgeError::Cancelled) => return Err(SessionError::Cancelled),
            Err(JudgeError::Infrastructure(err)) => {
                error!("run of question {question_id} for {user} failed: {err}");
                guard.finish(RunState::InfrastructureError);
                return Err(SessionError::Infrastructure(err));
            }
        };

        let mut report = RunReport {
            state: if verdict.overall_passed {
                RunState::Passed
            } else {
                RunState::Failed
            },
            verdict,
            newly_solved: false,
            unlocked: None,
            group_completed: false,
            storage_errors,
        };

        if report.verdict.overall_passed {
            self.apply_progress(user, question, &mut report)?;
        }

        let (passed, total) = report.verdict.summary();
        info!("{user} ran question {question_id}: {:?} ({passed}/{total})", report.state);
        guard.finish(report.state);
        Ok(report)
    }

    fn apply_progress(&self, user: &UserId, question: &Question, report: &mut RunReport) -> Result<(), SessionError> {
        let outcome = match self.progress.record_result(question.id, user, &report.verdict) {
            Ok(outcome) => outcome,
            Err(err) => return collect_storage_error(err, &mut report.storage_errors),
        };
        report.storage_errors.extend(outcome.storage_error);
        if !outcome.changed {
            return Ok(());
        }

        report.newly_solved = true;
        for listener in &self.listeners {
            listener.question_solved(user, question.id);
        }

        report.unlocked = self.progress.next_question(question.id);
        if let Some(next) = report.unlocked {
            info!("{user} unlocked question {next}");
            for listener in &self.listeners {
                listener.question_unlocked(user, next);
            }
        }

        match self.progress.all_complete(user, question.language, question.difficulty) {
            Ok(true) => {
                report.group_completed = true;
                info!("{user} completed {} {}", question.language, question.difficulty);
                for listener in &self.listeners {
                    listener.group_completed(user, question.language, question.difficulty);
                }
            }
            Ok(false) => {}
            Err(err) => collect_storage_error(err, &mut report.storage_errors)?,
        }
        Ok(())
    }
}

/// Storage failures are kept for the report; anything else aborts the run.
fn collect_storage_error(err: ProgressError, errors: &mut Vec<ProgressionStorageError>) -> Result<(), SessionError> {
    match err {
        ProgressError::Storage(err) => {
            warn!("progress storage failed: {err}");
            errors.push(err);
            Ok(())
        }
        ProgressError::UnknownQuestion(id) => Err(SessionError::UnknownQuestion(id)),
    }
}
