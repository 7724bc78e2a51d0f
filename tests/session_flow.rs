mod common;

use assert_matches::assert_matches;
use code_master::error::{EvaluationInfrastructureError, ProgressionStorageError, SessionError};
use code_master::judge::TestReport;
use code_master::model::{Difficulty, Language, UserId};
use code_master::progress::FileBackend;
use code_master::session::RunState;
use common::*;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

fn ana() -> UserId {
    UserId::new("ana")
}

#[test]
fn correct_submission_unlocks_the_next_question() {
    let h = harness();
    let progress = h.session.progress();
    assert!(progress.is_locked(2, &ana()).expect("locked"));

    let report = h.session.submit(&ana(), 1, CORRECT).expect("run");

    assert_eq!(report.state, RunState::Passed);
    assert!(report.verdict.overall_passed);
    assert_matches!(
        &report.verdict.per_test_results[..],
        [TestReport::Public { passed: true, actual: Some(actual), .. }] if actual == "5"
    );
    assert!(report.newly_solved);
    assert_eq!(report.unlocked, Some(2));
    assert!(!report.group_completed);
    assert!(report.storage_errors.is_empty());
    assert!(!progress.is_locked(2, &ana()).expect("locked"));
    assert_eq!(h.session.run_state(&ana(), 1), RunState::Passed);
    assert_eq!(h.listener.events(), vec!["solved ana 1", "unlocked ana 2"]);
}

#[test]
fn wrong_answer_changes_nothing() {
    let h = harness();
    let report = h.session.submit(&ana(), 1, ALWAYS_FOUR).expect("run");

    assert_eq!(report.state, RunState::Failed);
    assert!(!report.verdict.overall_passed);
    assert_matches!(
        &report.verdict.per_test_results[..],
        [TestReport::Public { passed: false, actual: Some(actual), expected, .. }]
            if actual == "4" && expected == "5"
    );
    assert!(!report.newly_solved);
    assert!(h.session.progress().is_locked(2, &ana()).expect("locked"));
    assert!(h.listener.events().is_empty());
}

#[test]
fn syntax_error_is_a_failing_verdict_without_execution() {
    let h = harness();
    let report = h.session.submit(&ana(), 1, BAD_SYNTAX).expect("run");

    assert_eq!(report.state, RunState::Failed);
    assert!(report.verdict.per_test_results.is_empty());
    assert_eq!(report.verdict.diagnostics.as_deref(), Some(SYNTAX_ERROR));
    assert_eq!(h.runner.checks.load(Ordering::SeqCst), 1);
    assert_eq!(h.runner.started.load(Ordering::SeqCst), 0);
}

#[test]
fn hidden_failure_is_reported_without_details() {
    let h = harness();
    h.session.submit(&ana(), 1, CORRECT).expect("unlock 2");

    let report = h.session.submit(&ana(), 2, BROKEN_ON_NEGATIVES).expect("run");
    let results = &report.verdict.per_test_results;

    assert!(!report.verdict.overall_passed);
    assert_eq!(results.len(), 3);
    assert_matches!(&results[0], TestReport::Public { passed: true, .. });
    assert_matches!(&results[1], TestReport::Public { passed: true, .. });
    assert_eq!(results[2], TestReport::Hidden { index: 2, passed: false });
    assert!(h.session.progress().is_locked(3, &ana()).expect("locked"));
}

#[test]
fn group_completes_exactly_on_the_last_solve() {
    let h = harness();
    let progress = h.session.progress();
    for id in [1, 2] {
        let report = h.session.submit(&ana(), id, CORRECT).expect("run");
        assert!(!report.group_completed);
        assert!(!progress.all_complete(&ana(), Language::Python, Difficulty::Beginner).expect("complete"));
    }

    let report = h.session.submit(&ana(), 3, CORRECT).expect("run");
    assert!(report.group_completed);
    assert_eq!(report.unlocked, None);
    assert!(progress.all_complete(&ana(), Language::Python, Difficulty::Beginner).expect("complete"));
    assert_eq!(
        h.listener.events().last().map(String::as_str),
        Some("completed ana python beginner")
    );

    // Solving again does not notify again.
    let again = h.session.submit(&ana(), 3, CORRECT).expect("run");
    assert!(!again.newly_solved);
    assert!(!again.group_completed);
    assert_eq!(
        h.listener
            .events()
            .iter()
            .filter(|e| e.starts_with("completed"))
            .count(),
        1
    );
}

#[test]
fn locked_and_unknown_questions_are_rejected() {
    let h = harness();
    assert_matches!(h.session.submit(&ana(), 2, CORRECT), Err(SessionError::QuestionLocked(2)));
    assert_matches!(h.session.submit(&ana(), 999, CORRECT), Err(SessionError::UnknownQuestion(999)));
    assert_eq!(h.runner.checks.load(Ordering::SeqCst), 0);
}

#[test]
fn second_submit_while_running_is_rejected() {
    let h = harness();
    h.runner.hold.store(true, Ordering::SeqCst);

    thread::scope(|scope| {
        let first = scope.spawn(|| h.session.submit(&ana(), 1, CORRECT));
        h.runner.wait_until_started(1);

        assert_eq!(h.session.run_state(&ana(), 1), RunState::Running);
        let second = h.session.submit(&ana(), 1, CORRECT);
        assert_matches!(&second, Err(SessionError::RunInProgress(1)));
        assert!(second.is_err_and(|e| e.is_retryable()));
        assert_eq!(h.session.run_state(&UserId::new("bob"), 1), RunState::Idle);

        h.runner.hold.store(false, Ordering::SeqCst);
        let report = first.join().expect("thread").expect("run");
        assert_eq!(report.state, RunState::Passed);
    });

    assert_eq!(h.session.run_state(&ana(), 1), RunState::Passed);
    h.session.touch(&ana(), 1);
    assert_eq!(h.session.run_state(&ana(), 1), RunState::Idle);
}

#[test]
fn different_users_run_the_same_question_concurrently() {
    let h = harness();
    h.runner.hold.store(true, Ordering::SeqCst);

    thread::scope(|scope| {
        let ana_run = scope.spawn(|| h.session.submit(&ana(), 1, CORRECT));
        let bob_run = scope.spawn(|| h.session.submit(&UserId::new("bob"), 1, ALWAYS_FOUR));
        h.runner.wait_until_started(2);
        h.runner.hold.store(false, Ordering::SeqCst);

        assert_eq!(ana_run.join().expect("thread").expect("run").state, RunState::Passed);
        assert_eq!(bob_run.join().expect("thread").expect("run").state, RunState::Failed);
    });
}

#[test]
fn cancelled_run_has_no_side_effects() {
    let h = harness();
    h.runner.hold.store(true, Ordering::SeqCst);

    thread::scope(|scope| {
        let run = scope.spawn(|| h.session.submit(&ana(), 1, CORRECT));
        h.runner.wait_until_started(1);
        assert!(h.session.cancel(&ana(), 1));

        assert_matches!(run.join().expect("thread"), Err(SessionError::Cancelled));
    });

    assert_eq!(h.session.run_state(&ana(), 1), RunState::Idle);
    assert!(!h.session.cancel(&ana(), 1));
    assert!(h.session.progress().solved(&ana(), Language::Python).expect("solved").is_empty());
    assert!(h.listener.events().is_empty());
}

#[test]
fn infrastructure_failure_is_not_a_verdict() {
    let h = harness();
    h.runner.broken.store(true, Ordering::SeqCst);

    let err = h.session.submit(&ana(), 1, CORRECT).expect_err("infrastructure");
    assert_matches!(&err, SessionError::Infrastructure(EvaluationInfrastructureError::Spawn { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.session.run_state(&ana(), 1), RunState::InfrastructureError);
    assert!(h.session.progress().is_locked(2, &ana()).expect("locked"));

    h.runner.broken.store(false, Ordering::SeqCst);
    let report = h.session.submit(&ana(), 1, CORRECT).expect("retry");
    assert_eq!(report.state, RunState::Passed);
}

#[test]
fn missing_runner_is_not_retryable() {
    let h = harness();
    let err = h.session.submit(&ana(), 20, CORRECT).expect_err("no javascript runner");
    assert_matches!(
        &err,
        SessionError::Infrastructure(EvaluationInfrastructureError::RunnerUnavailable(Language::JavaScript))
    );
    assert!(!err.is_retryable());
}

#[test]
fn storage_failure_keeps_the_verdict() {
    let h = harness();
    h.backend.fail_writes.store(true, Ordering::SeqCst);

    let report = h.session.submit(&ana(), 1, CORRECT).expect("run");
    assert!(report.verdict.overall_passed);
    assert!(report.newly_solved);
    assert_eq!(report.storage_errors.len(), 2);
    assert!(
        report
            .storage_errors
            .iter()
            .all(|e| matches!(e, ProgressionStorageError::Unavailable(_)))
    );
    assert!(!h.session.progress().is_locked(2, &ana()).expect("locked"));
}

#[test]
fn unreadable_progress_still_returns_a_verdict() {
    let h = harness();
    h.backend.fail_reads.store(true, Ordering::SeqCst);

    let report = h.session.submit(&ana(), 1, CORRECT).expect("run");
    assert!(report.verdict.overall_passed);
    assert_eq!(report.state, RunState::Passed);
    assert!(!report.newly_solved);
    assert!(!report.storage_errors.is_empty());
    assert!(
        report
            .storage_errors
            .iter()
            .all(|e| matches!(e, ProgressionStorageError::Unavailable(_)))
    );
    assert!(h.listener.events().is_empty());

    h.backend.fail_reads.store(false, Ordering::SeqCst);
    let report = h.session.submit(&ana(), 1, CORRECT).expect("run");
    assert!(report.newly_solved);
    assert!(report.storage_errors.is_empty());
    assert_eq!(report.unlocked, Some(2));
}

#[test]
fn corrupt_solved_file_does_not_block_judging() {
    let dir = tempfile::tempdir().expect("tempdir");
    let user_dir = dir.path().join("python").join(format!("u{}", hex::encode("ana")));
    fs::create_dir_all(&user_dir).expect("mkdir");
    fs::write(user_dir.join("solved.json"), "{not json").expect("write");
    let (_runner, _listener, session) = session_over(Arc::new(FileBackend::new(dir.path())));

    let report = session.submit(&ana(), 1, ALWAYS_FOUR).expect("run");
    assert_eq!(report.state, RunState::Failed);
    assert_matches!(
        &report.verdict.per_test_results[..],
        [TestReport::Public { passed: false, .. }]
    );
    assert_matches!(report.storage_errors.first(), Some(ProgressionStorageError::Corrupt { .. }));
}

#[test]
fn submitted_source_is_saved() {
    let h = harness();
    let progress = h.session.progress();
    assert_eq!(progress.load_source(1, &ana()).expect("load"), "def add(a, b):\n    pass\n");
    h.session.submit(&ana(), 1, ALWAYS_FOUR).expect("run");
    assert_eq!(progress.load_source(1, &ana()).expect("load"), ALWAYS_FOUR);
}
