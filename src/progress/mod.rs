//! Per-user progression: solved questions, saved sources and the lock and
//! completion state derived from them.
//!
//! Every (user, language) pair owns its own state behind its own lock, so
//! results recorded for the same pair are applied one at a time while other
//! users never wait on each other.

pub mod completion;
pub mod storage;

use crate::data::Catalog;
use crate::error::{ProgressError, ProgressionStorageError};
use crate::judge::Verdict;
use crate::model::{Difficulty, Language, Question, QuestionId, UserId};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use storage::{FileBackend, MemoryBackend, ProgressBackend};

#[derive(Debug, Default, Clone)]
pub struct ProgressionState {
    pub solved: BTreeSet<QuestionId>,
    pub sources: HashMap<QuestionId, String>,
}

/// What a `record_result` call did.
#[derive(Debug)]
pub struct RecordOutcome {
    pub solved: BTreeSet<QuestionId>,
    /// True only for the call that first added the question.
    pub changed: bool,
    /// The solved set could not be persisted; the in-memory state is still updated.
    pub storage_error: Option<ProgressionStorageError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub solved: usize,
}

type StateKey = (UserId, Language);

pub struct ProgressionStore {
    catalog: Arc<Catalog>,
    backend: Arc<dyn ProgressBackend>,
    states: Mutex<HashMap<StateKey, Arc<Mutex<ProgressionState>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressionStore {
    pub fn new(catalog: Arc<Catalog>, backend: Arc<dyn ProgressBackend>) -> Self {
        Self {
            catalog,
            backend,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn question(&self, question_id: QuestionId) -> Result<&Question, ProgressError> {
        self.catalog
            .get_question(question_id)
            .ok_or(ProgressError::UnknownQuestion(question_id))
    }

    /// State of (user, language), loading the solved set on first use. The
    /// load runs outside the map lock; if two callers race, the first insert wins.
    fn state(&self, user: &UserId, language: Language) -> Result<Arc<Mutex<ProgressionState>>, ProgressionStorageError> {
        let key = (user.clone(), language);
        if let Some(state) = lock(&self.states).get(&key) {
            return Ok(state.clone());
        }
        let solved = self.backend.load_solved(user, language)?;
        let state = lock(&self.states)
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ProgressionState {
                    solved,
                    sources: HashMap::new(),
                }))
            })
            .clone();
        Ok(state)
    }

    fn cached_solved(&self, user: &UserId, language: Language) -> Option<BTreeSet<QuestionId>> {
        let state = lock(&self.states).get(&(user.clone(), language))?.clone();
        let solved = lock(&state).solved.clone();
        Some(solved)
    }

    pub fn solved(&self, user: &UserId, language: Language) -> Result<BTreeSet<QuestionId>, ProgressError> {
        let state = self.state(user, language)?;
        let solved = lock(&state).solved.clone();
        Ok(solved)
    }

    pub fn is_locked(&self, question_id: QuestionId, user: &UserId) -> Result<bool, ProgressError> {
        let question = self.question(question_id)?;
        let state = self.state(user, question.language)?;
        let state = lock(&state);
        completion::is_locked(&self.catalog, &state.solved, question_id).ok_or(ProgressError::UnknownQuestion(question_id))
    }

    /// Adds the question to the solved set when the verdict passed. Calls for
    /// the same (user, language) are serialized; persistence happens under
    /// the same lock so stored sets are written in order.
    pub fn record_result(
        &self,
        question_id: QuestionId,
        user: &UserId,
        verdict: &Verdict,
    ) -> Result<RecordOutcome, ProgressError> {
        let question = self.question(question_id)?;
        let state = self.state(user, question.language)?;
        let mut state = lock(&state);

        let changed = verdict.overall_passed && state.solved.insert(question_id);
        let mut storage_error = None;
        if changed {
            info!("{user} solved question {question_id} ({})", question.language);
            if let Err(err) = self.backend.store_solved(user, question.language, &state.solved) {
                warn!("could not persist solved set for {user}: {err}");
                storage_error = Some(err);
            }
        }

        Ok(RecordOutcome {
            solved: state.solved.clone(),
            changed,
            storage_error,
        })
    }

    pub fn all_complete(&self, user: &UserId, language: Language, difficulty: Difficulty) -> Result<bool, ProgressError> {
        let state = self.state(user, language)?;
        let state = lock(&state);
        Ok(completion::is_group_complete(&self.catalog, &state.solved, language, difficulty))
    }

    pub fn unlocked(&self, user: &UserId, language: Language, difficulty: Difficulty) -> Result<Vec<QuestionId>, ProgressError> {
        let state = self.state(user, language)?;
        let state = lock(&state);
        Ok(completion::unlocked_in_group(&self.catalog, &state.solved, language, difficulty))
    }

    pub fn next_question(&self, question_id: QuestionId) -> Option<QuestionId> {
        self.catalog.next_question(question_id).map(|q| q.id)
    }

    /// The in-memory copy is updated even when the write fails.
    pub fn save_source(&self, question_id: QuestionId, user: &UserId, source: &str) -> Result<(), ProgressError> {
        let question = self.question(question_id)?;
        let state = self.state(user, question.language)?;
        let mut state = lock(&state);
        state.sources.insert(question_id, source.to_string());
        self.backend
            .store_source(user, question.language, question_id, source)
            .map_err(ProgressError::from)
    }

    /// Last saved text, or the question's starter code.
    pub fn load_source(&self, question_id: QuestionId, user: &UserId) -> Result<String, ProgressError> {
        let question = self.question(question_id)?;
        let state = self.state(user, question.language)?;
        let mut state = lock(&state);
        if let Some(source) = state.sources.get(&question_id) {
            return Ok(source.clone());
        }
        match self.backend.load_source(user, question.language, question_id)? {
            Some(source) => {
                state.sources.insert(question_id, source.clone());
                Ok(source)
            }
            None => Ok(question.starter_code.clone()),
        }
    }

    /// Explicit reset: forgets solved questions and saved sources of one language.
    pub fn reset(&self, user: &UserId, language: Language) -> Result<(), ProgressError> {
        let state = self.state(user, language)?;
        let mut state = lock(&state);
        self.backend.clear(user, language)?;
        *state = ProgressionState::default();
        info!("progress of {user} in {language} reset");
        Ok(())
    }

    /// Users ranked by solved questions, most first; ties by user id. Users
    /// not already in memory are read from the backend without being cached.
    pub fn leaderboard(&self, language: Language) -> Result<Vec<LeaderboardEntry>, ProgressError> {
        let mut users: BTreeSet<UserId> = self.backend.users(language)?.into_iter().collect();
        users.extend(
            lock(&self.states)
                .keys()
                .filter(|(_, l)| *l == language)
                .map(|(u, _)| u.clone()),
        );

        let mut entries = Vec::with_capacity(users.len());
        for user in users {
            let solved = match self.cached_solved(&user, language) {
                Some(solved) => solved,
                None => self.backend.load_solved(&user, language)?,
            };
            let solved = completion::solved_count(&self.catalog, &solved, language);
            if solved > 0 {
                entries.push(LeaderboardEntry { user, solved });
            }
        }
        entries.sort_by(|a, b| b.solved.cmp(&a.solved).then_with(|| a.user.cmp(&b.user)));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::TestReport;
    use std::thread;

    const CATALOG: &str = r#"
questions:
  - { id: 1, title: A, language: python, difficulty: beginner, starter_code: "def a():\n    pass\n", test_cases: [{ input: "a()", expected: "1" }] }
  - { id: 2, title: B, language: python, difficulty: beginner, test_cases: [{ input: "b()", expected: "1" }] }
  - { id: 3, title: C, language: python, difficulty: beginner, test_cases: [{ input: "c()", expected: "1" }] }
  - { id: 10, title: J, language: javascript, difficulty: beginner, test_cases: [{ input: "j()", expected: "1" }] }
"#;

    fn store() -> ProgressionStore {
        let catalog = Catalog::from_yaml(CATALOG).expect("catalog");
        ProgressionStore::new(Arc::new(catalog), Arc::new(MemoryBackend::new()))
    }

    fn verdict(passed: bool) -> Verdict {
        Verdict::from_reports(vec![TestReport::Hidden { index: 0, passed }], false)
    }

    #[test]
    fn passing_verdict_unlocks_next_question() {
        let store = store();
        let user = UserId::new("ana");
        assert!(store.is_locked(2, &user).expect("locked"));

        let outcome = store.record_result(1, &user, &verdict(true)).expect("record");
        assert!(outcome.changed);
        assert!(outcome.storage_error.is_none());
        assert_eq!(outcome.solved, BTreeSet::from([1]));
        assert!(!store.is_locked(2, &user).expect("locked"));
        assert!(store.is_locked(3, &user).expect("locked"));
    }

    #[test]
    fn failing_verdict_changes_nothing() {
        let store = store();
        let user = UserId::new("ana");
        let outcome = store.record_result(1, &user, &verdict(false)).expect("record");
        assert!(!outcome.changed);
        assert!(outcome.solved.is_empty());
        assert!(store.is_locked(2, &user).expect("locked"));
    }

    #[test]
    fn record_result_is_idempotent() {
        let store = store();
        let user = UserId::new("ana");
        assert!(store.record_result(1, &user, &verdict(true)).expect("record").changed);
        let again = store.record_result(1, &user, &verdict(true)).expect("record");
        assert!(!again.changed);
        assert_eq!(again.solved.len(), 1);
    }

    #[test]
    fn completion_flips_on_last_question() {
        let store = store();
        let user = UserId::new("ana");
        for id in [1, 2] {
            store.record_result(id, &user, &verdict(true)).expect("record");
            assert!(!store.all_complete(&user, Language::Python, Difficulty::Beginner).expect("complete"));
        }
        store.record_result(3, &user, &verdict(true)).expect("record");
        assert!(store.all_complete(&user, Language::Python, Difficulty::Beginner).expect("complete"));
        assert!(!store.all_complete(&user, Language::Python, Difficulty::Pro).expect("empty group"));
    }

    #[test]
    fn users_and_languages_are_isolated() {
        let store = store();
        let ana = UserId::new("ana");
        let bob = UserId::new("bob");
        store.record_result(1, &ana, &verdict(true)).expect("record");
        assert!(store.solved(&bob, Language::Python).expect("solved").is_empty());
        assert!(store.solved(&ana, Language::JavaScript).expect("solved").is_empty());
    }

    #[test]
    fn sources_fall_back_to_starter_code() {
        let store = store();
        let user = UserId::new("ana");
        assert_eq!(store.load_source(1, &user).expect("load"), "def a():\n    pass\n");
        store.save_source(1, &user, "def a():\n    return 1\n").expect("save");
        assert_eq!(store.load_source(1, &user).expect("load"), "def a():\n    return 1\n");
        assert!(matches!(store.load_source(99, &user), Err(ProgressError::UnknownQuestion(99))));
    }

    #[test]
    fn reset_clears_one_language() {
        let store = store();
        let user = UserId::new("ana");
        store.record_result(1, &user, &verdict(true)).expect("record");
        store.record_result(10, &user, &verdict(true)).expect("record");
        store.save_source(1, &user, "x").expect("save");

        store.reset(&user, Language::Python).expect("reset");
        assert!(store.solved(&user, Language::Python).expect("solved").is_empty());
        assert_eq!(store.load_source(1, &user).expect("load"), "def a():\n    pass\n");
        assert_eq!(store.solved(&user, Language::JavaScript).expect("solved"), BTreeSet::from([10]));
    }

    #[test]
    fn leaderboard_ranks_by_solved_count() {
        let store = store();
        let ana = UserId::new("ana");
        let bob = UserId::new("bob");
        let cid = UserId::new("cid");
        for id in [1, 2] {
            store.record_result(id, &bob, &verdict(true)).expect("record");
        }
        store.record_result(1, &ana, &verdict(true)).expect("record");
        store.record_result(1, &cid, &verdict(true)).expect("record");
        store.solved(&UserId::new("nobody"), Language::Python).expect("solved");

        let board = store.leaderboard(Language::Python).expect("leaderboard");
        let ranking: Vec<_> = board.iter().map(|e| (e.user.as_str(), e.solved)).collect();
        assert_eq!(ranking, vec![("bob", 2), ("ana", 1), ("cid", 1)]);
    }

    #[test]
    fn leaderboard_reads_stored_users_without_caching_them() {
        let catalog = Arc::new(Catalog::from_yaml(CATALOG).expect("catalog"));
        let backend = Arc::new(MemoryBackend::new());
        backend
            .store_solved(&UserId::new("eve"), Language::Python, &BTreeSet::from([1, 2]))
            .expect("store");
        let store = ProgressionStore::new(catalog, backend);

        let board = store.leaderboard(Language::Python).expect("leaderboard");
        assert_eq!(board, vec![LeaderboardEntry { user: UserId::new("eve"), solved: 2 }]);
        assert!(lock(&store.states).is_empty());
    }

    #[test]
    fn concurrent_records_do_not_lose_updates() {
        let store = Arc::new(store());
        let user = UserId::new("ana");
        let handles: Vec<_> = [1, 2, 3, 1, 2, 3]
            .into_iter()
            .map(|id| {
                let store = store.clone();
                let user = user.clone();
                thread::spawn(move || store.record_result(id, &user, &verdict(true)).expect("record").changed)
            })
            .collect();
        let changes = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|changed| *changed)
            .count();
        assert_eq!(changes, 3);
        assert_eq!(store.solved(&user, Language::Python).expect("solved"), BTreeSet::from([1, 2, 3]));
    }
}
